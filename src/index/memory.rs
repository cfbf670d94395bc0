//! In-process index backend
//!
//! Keeps documents in memory with the same upsert-by-id semantics as the
//! search service. Used for dry runs and for exercising the bulk writer.
//! Chunks or records can be made to fail on purpose.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{BackendError, BulkRequest, IndexBackend, ItemOutcome};
use crate::records::IndexRecord;

type ChunkFilter = Box<dyn Fn(u64) -> bool + Send + Sync>;
type RecordFilter = Box<dyn Fn(&IndexRecord) -> bool + Send + Sync>;

#[derive(Default)]
struct Rejections {
    chunks: Option<ChunkFilter>,
    records: Option<RecordFilter>,
}

/// Memory-backed index
#[derive(Default)]
pub struct MemoryIndex {
    indices: RwLock<HashMap<String, HashMap<String, Value>>>,
    rejections: RwLock<Rejections>,
    requests: AtomicU64,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every bulk request whose chunk sequence matches
    pub fn rejecting_chunks<F>(self, filter: F) -> Self
    where
        F: Fn(u64) -> bool + Send + Sync + 'static,
    {
        self.rejections.write().chunks = Some(Box::new(filter));
        self
    }

    /// Fail individual records that match, as a mapping error would
    pub fn rejecting_records<F>(self, filter: F) -> Self
    where
        F: Fn(&IndexRecord) -> bool + Send + Sync + 'static,
    {
        self.rejections.write().records = Some(Box::new(filter));
        self
    }

    /// Accept everything from now on
    pub fn clear_rejections(&self) {
        *self.rejections.write() = Rejections::default();
    }

    /// Stored document body
    pub fn get(&self, index: &str, id: &str) -> Option<Value> {
        self.indices.read().get(index)?.get(id).cloned()
    }

    pub fn contains(&self, index: &str, id: &str) -> bool {
        self.indices
            .read()
            .get(index)
            .is_some_and(|documents| documents.contains_key(id))
    }

    /// Number of documents in `index`
    pub fn len(&self, index: &str) -> usize {
        self.indices.read().get(index).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self, index: &str) -> bool {
        self.len(index) == 0
    }

    /// Bulk requests received, including rejected ones
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl IndexBackend for MemoryIndex {
    fn bulk_upsert(&self, request: &BulkRequest<'_>) -> Result<Vec<ItemOutcome>, BackendError> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        let rejections = self.rejections.read();
        if rejections
            .chunks
            .as_ref()
            .is_some_and(|reject| reject(request.sequence))
        {
            return Err(BackendError::Unavailable(format!(
                "chunk {} rejected",
                request.sequence
            )));
        }

        let mut indices = self.indices.write();
        let mut outcomes = Vec::with_capacity(request.records.len());

        for record in request.records {
            if rejections
                .records
                .as_ref()
                .is_some_and(|reject| reject(record))
            {
                outcomes.push(ItemOutcome {
                    id: record.id.clone(),
                    status: 400,
                    error: Some("mapper_parsing_exception: document rejected".to_string()),
                });
                continue;
            }

            match record.to_document() {
                Ok(document) => {
                    let replaced = indices
                        .entry(record.index.clone())
                        .or_default()
                        .insert(record.id.clone(), document)
                        .is_some();
                    let status = if replaced { 200 } else { 201 };
                    outcomes.push(ItemOutcome::ok(record.id.clone(), status));
                }
                Err(e) => outcomes.push(ItemOutcome {
                    id: record.id.clone(),
                    status: 400,
                    error: Some(e.to_string()),
                }),
            }
        }

        Ok(outcomes)
    }

    fn count(&self, index: &str) -> Result<u64, BackendError> {
        Ok(self.len(index) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{Detection, DocumentResult};
    use crate::records::RecordBuilder;

    fn records(texts: &[&str]) -> Vec<IndexRecord> {
        let results = vec![DocumentResult {
            document_name: "memo.png".to_string(),
            page_number: 0,
            detections: texts
                .iter()
                .map(|text| Detection {
                    boxes: [(0, 0), (1, 0), (1, 1), (0, 1)],
                    text: text.to_string(),
                    confidence: 0.5,
                })
                .collect(),
        }];
        RecordBuilder::new("run", "0", "idx").records(&results).collect()
    }

    #[test]
    fn test_upsert_reports_create_then_update() {
        let index = MemoryIndex::new();
        let batch = records(&["a", "b"]);
        let request = BulkRequest {
            sequence: 0,
            records: &batch,
        };

        let first = index.bulk_upsert(&request).unwrap();
        assert!(first.iter().all(|o| o.status == 201));
        let second = index.bulk_upsert(&request).unwrap();
        assert!(second.iter().all(|o| o.status == 200 && o.is_success()));

        assert_eq!(index.count("idx").unwrap(), 2);
        assert_eq!(index.request_count(), 2);
        assert!(index.is_empty("other"));
    }

    #[test]
    fn test_stored_body_has_no_routing_field() {
        let index = MemoryIndex::new();
        let batch = records(&["hello"]);
        index
            .bulk_upsert(&BulkRequest {
                sequence: 0,
                records: &batch,
            })
            .unwrap();

        let stored = index.get("idx", &batch[0].id).unwrap();
        assert_eq!(stored["text"], "hello");
        assert!(stored.get("index").is_none());
    }

    #[test]
    fn test_rejections() {
        let index = MemoryIndex::new()
            .rejecting_chunks(|sequence| sequence == 1)
            .rejecting_records(|record| record.text.is_empty());
        let batch = records(&["ok", ""]);

        let outcomes = index
            .bulk_upsert(&BulkRequest {
                sequence: 0,
                records: &batch,
            })
            .unwrap();
        assert!(outcomes[0].is_success());
        assert!(!outcomes[1].is_success());

        let rejected = index.bulk_upsert(&BulkRequest {
            sequence: 1,
            records: &batch,
        });
        assert!(matches!(rejected, Err(BackendError::Unavailable(_))));

        index.clear_rejections();
        index
            .bulk_upsert(&BulkRequest {
                sequence: 1,
                records: &batch,
            })
            .unwrap();
        assert_eq!(index.len("idx"), 2);
    }
}
