//! OCR drift monitoring
//!
//! Detects when incoming document images stop resembling the reference set
//! an OCR model was validated on, and indexes OCR output into a search
//! service with idempotent bulk writes.

pub mod config;
pub mod drift;
pub mod error;
pub mod imaging;
pub mod index;
pub mod ocr;
pub mod records;
pub mod storage;

pub use config::{AppConfig, DriftSettings, IndexSettings};
pub use drift::{DriftDetector, DriftModel};
pub use error::DriftError;
pub use imaging::{PageImage, PageRef};
pub use index::{BulkIndexWriter, IndexBackend, WriteError, WriteOptions};
pub use ocr::{Detection, DocumentResult};
pub use records::{build_records, IndexRecord, RecordBuilder};
