//! Bulk index writer
//!
//! The calling thread pulls records lazily, cuts them into numbered chunks
//! and feeds a bounded queue. A pool of scoped worker threads ships one bulk
//! request per chunk. Each worker keeps its own error list; the lists are
//! merged once every worker has been joined, so nothing outlives the call.

use crossbeam_channel::{bounded, Receiver};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{BackendError, BulkRequest, IndexBackend, ItemOutcome, WriteError, WriteOptions};
use crate::records::IndexRecord;

/// Outcome of one write call
#[derive(Debug, Default)]
pub struct WriteSummary {
    /// Records pulled from the input
    pub attempted: usize,
    /// Records the backend confirmed
    pub succeeded: usize,
    /// Bulk requests issued
    pub chunks: u64,
    /// Records that were not written
    pub errors: Vec<WriteError>,
    /// Wall time of the call
    pub elapsed: Duration,
}

impl WriteSummary {
    /// True if every attempted record was written
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Chunk of records handed to a worker
struct Chunk {
    sequence: u64,
    records: Vec<IndexRecord>,
}

/// Per-worker accumulator
#[derive(Default)]
struct WorkerReport {
    succeeded: usize,
    errors: Vec<WriteError>,
}

impl WorkerReport {
    fn record_chunk_failure(&mut self, records: &[IndexRecord], error: &BackendError) {
        let status = match error {
            BackendError::Status { status, .. } => Some(*status),
            _ => None,
        };
        let reason = error.to_string();

        for record in records {
            warn!("Failed to write document {} to {}: {}", record.id, record.index, reason);
            self.errors.push(WriteError {
                id: record.id.clone(),
                index: record.index.clone(),
                status,
                reason: reason.clone(),
            });
        }
    }

    fn record_outcomes(&mut self, records: &[IndexRecord], outcomes: Vec<ItemOutcome>) {
        if outcomes.len() != records.len() {
            warn!(
                "Bulk response reported {} items for {} records",
                outcomes.len(),
                records.len()
            );
        }

        // Items are matched by id; only items without one fall back to position
        let mut by_id: HashMap<String, VecDeque<ItemOutcome>> = HashMap::new();
        let mut unnamed = VecDeque::new();
        for outcome in outcomes {
            if outcome.id.is_empty() {
                unnamed.push_back(outcome);
            } else {
                by_id.entry(outcome.id.clone()).or_default().push_back(outcome);
            }
        }

        for record in records {
            let outcome = by_id
                .get_mut(&record.id)
                .and_then(VecDeque::pop_front)
                .or_else(|| unnamed.pop_front());

            match outcome {
                Some(outcome) if outcome.is_success() => self.succeeded += 1,
                Some(outcome) => {
                    let reason = outcome
                        .error
                        .unwrap_or_else(|| format!("status {}", outcome.status));
                    warn!("Failed to write document {} to {}: {}", record.id, record.index, reason);
                    self.errors.push(WriteError {
                        id: record.id.clone(),
                        index: record.index.clone(),
                        status: Some(outcome.status),
                        reason,
                    });
                }
                None => {
                    warn!("No result reported for document {}", record.id);
                    self.errors.push(WriteError {
                        id: record.id.clone(),
                        index: record.index.clone(),
                        status: None,
                        reason: "missing from bulk response".to_string(),
                    });
                }
            }
        }
    }
}

/// Writes record streams to an index backend with bounded parallelism
pub struct BulkIndexWriter<B> {
    backend: B,
    options: WriteOptions,
}

impl<B: IndexBackend> BulkIndexWriter<B> {
    /// Create a writer; zero-valued options are raised to 1
    pub fn new(backend: B, options: WriteOptions) -> Self {
        let options = WriteOptions {
            chunk_size: options.chunk_size.max(1),
            concurrency: options.concurrency.max(1),
            queue_size: options.queue_size.max(1),
        };
        Self { backend, options }
    }

    /// The backend records are written to
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Effective writer options
    pub fn options(&self) -> WriteOptions {
        self.options
    }

    /// Write every record, returning the ones that failed
    ///
    /// Never stops early: a failed chunk or record is reported and the
    /// remaining chunks are still sent. No retries are attempted.
    pub fn write<I>(&self, records: I) -> Vec<WriteError>
    where
        I: IntoIterator<Item = IndexRecord>,
    {
        self.write_summary(records).errors
    }

    /// Write every record and report counts alongside the failures
    pub fn write_summary<I>(&self, records: I) -> WriteSummary
    where
        I: IntoIterator<Item = IndexRecord>,
    {
        let started = Instant::now();
        let (sender, receiver) = bounded::<Chunk>(self.options.queue_size);

        let (attempted, chunks, reports) = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..self.options.concurrency)
                .map(|worker| {
                    let receiver = receiver.clone();
                    let backend = &self.backend;
                    scope.spawn(move || run_worker(worker, backend, receiver))
                })
                .collect();
            drop(receiver);

            let mut attempted = 0;
            let mut sequence = 0u64;
            let mut records = records.into_iter();
            loop {
                let batch: Vec<IndexRecord> =
                    records.by_ref().take(self.options.chunk_size).collect();
                if batch.is_empty() {
                    break;
                }
                attempted += batch.len();

                if sender.send(Chunk { sequence, records: batch }).is_err() {
                    // Only possible once every worker has exited
                    warn!("All bulk workers exited before chunk {}", sequence);
                    break;
                }
                sequence += 1;
            }
            drop(sender);

            let reports: Vec<WorkerReport> = handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
                })
                .collect();

            (attempted, sequence, reports)
        });

        let mut summary = WriteSummary {
            attempted,
            chunks,
            ..WriteSummary::default()
        };
        for report in reports {
            summary.succeeded += report.succeeded;
            summary.errors.extend(report.errors);
        }
        summary.elapsed = started.elapsed();

        info!(
            "Bulk write finished: {} records in {} chunks, {} succeeded, {} failed ({:?})",
            summary.attempted,
            summary.chunks,
            summary.succeeded,
            summary.errors.len(),
            summary.elapsed
        );
        summary
    }
}

fn run_worker<B>(worker: usize, backend: &B, chunks: Receiver<Chunk>) -> WorkerReport
where
    B: IndexBackend + ?Sized,
{
    let mut report = WorkerReport::default();

    for chunk in chunks.iter() {
        let request = BulkRequest {
            sequence: chunk.sequence,
            records: &chunk.records,
        };
        debug!(
            "Worker {} sending chunk {} ({} records)",
            worker,
            chunk.sequence,
            chunk.records.len()
        );

        match backend.bulk_upsert(&request) {
            Ok(outcomes) => report.record_outcomes(&chunk.records, outcomes),
            Err(e) => report.record_chunk_failure(&chunk.records, &e),
        }
    }

    report
}
