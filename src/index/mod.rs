//! Search Index Layer
//!
//! Writes index records in bulk with bounded parallelism. Every write is an
//! upsert keyed by the record's composite identifier, so a batch can be
//! re-submitted as a whole after a partial failure without duplicating
//! anything.

pub mod elasticsearch;
pub mod memory;
pub mod writer;

pub use elasticsearch::ElasticsearchBackend;
pub use memory::MemoryIndex;
pub use writer::{BulkIndexWriter, WriteSummary};

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::records::IndexRecord;

/// Index backend errors
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Index returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid bulk response: {0}")]
    InvalidResponse(String),

    #[error("Index unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// One chunk of records shipped in a single bulk request
#[derive(Debug, Clone, Copy)]
pub struct BulkRequest<'a> {
    /// Zero-based chunk number within one write call
    pub sequence: u64,
    /// Records to upsert
    pub records: &'a [IndexRecord],
}

/// Per-record result reported by the backend
#[derive(Debug, Clone, PartialEq)]
pub struct ItemOutcome {
    /// Record identifier
    pub id: String,
    /// HTTP-style status for this item
    pub status: u16,
    /// Failure detail, if any
    pub error: Option<String>,
}

impl ItemOutcome {
    /// A successful upsert
    pub fn ok(id: impl Into<String>, status: u16) -> Self {
        Self {
            id: id.into(),
            status,
            error: None,
        }
    }

    /// Whether the record was stored
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }
}

/// Capability to upsert records into a search index
pub trait IndexBackend: Send + Sync {
    /// Upsert every record of the request, keyed by `IndexRecord::id`
    ///
    /// `Err` means the whole chunk failed; `Ok` carries one outcome per
    /// record that the backend processed.
    fn bulk_upsert(&self, request: &BulkRequest<'_>) -> Result<Vec<ItemOutcome>, BackendError>;

    /// Number of documents currently stored in `index`
    fn count(&self, index: &str) -> Result<u64, BackendError>;
}

impl<B: IndexBackend + ?Sized> IndexBackend for Arc<B> {
    fn bulk_upsert(&self, request: &BulkRequest<'_>) -> Result<Vec<ItemOutcome>, BackendError> {
        (**self).bulk_upsert(request)
    }

    fn count(&self, index: &str) -> Result<u64, BackendError> {
        (**self).count(index)
    }
}

/// Bulk writer tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Records per bulk request
    pub chunk_size: usize,
    /// Parallel worker threads
    pub concurrency: usize,
    /// Chunks buffered between the producer and the workers
    pub queue_size: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            concurrency: 16,
            queue_size: 16,
        }
    }
}

/// A record that was not written
#[derive(Debug, Clone, PartialEq)]
pub struct WriteError {
    /// Composite identifier of the record
    pub id: String,
    /// Target index
    pub index: String,
    /// Item status, when the backend reported one
    pub status: Option<u16>,
    /// Failure detail
    pub reason: String,
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{}/{} [{}]: {}", self.index, self.id, status, self.reason),
            None => write!(f, "{}/{}: {}", self.index, self.id, self.reason),
        }
    }
}
