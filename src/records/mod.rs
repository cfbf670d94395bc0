//! Index record building
//!
//! Converts OCR results into canonical, content-addressed records. Records
//! are produced lazily, one at a time, so arbitrarily large result sets never
//! have to be materialized. Re-running the builder on the same results
//! recomputes the same records, including the same identifiers.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::iter::Enumerate;
use std::slice;

use crate::ocr::{Detection, DocumentResult, Point};

/// Separator between the segments of a composite identifier
pub const ID_SEPARATOR: &str = "-";

/// Indexable form of one detection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexRecord {
    /// Target index (routing only, not stored in the document body)
    #[serde(skip)]
    pub index: String,
    pub run_id: String,
    pub ocr_model_version: String,
    /// SHA-256 of the document name, hex encoded
    pub document_name_hash: String,
    pub document_name: String,
    pub page_number: u32,
    /// Zero-based position of the detection within its page
    pub detection_index: usize,
    pub boxes: [Point; 4],
    pub text: String,
    pub confidence: f32,
    /// Composite identifier, the upsert key
    pub id: String,
}

impl IndexRecord {
    /// Document body sent to the index
    pub fn to_document(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// Hex-encoded SHA-256 of a document name
pub fn document_name_hash(document_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_name.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic record identifier
///
/// Equal inputs always give equal identifiers, which is what makes
/// re-indexing overwrite instead of duplicate.
pub fn composite_id(
    model_version: &str,
    document_name_hash: &str,
    page_number: u32,
    detection_index: usize,
) -> String {
    [
        model_version.to_string(),
        document_name_hash.to_string(),
        page_number.to_string(),
        detection_index.to_string(),
    ]
    .join(ID_SEPARATOR)
}

/// Run-level fields shared by every record
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    run_id: String,
    model_version: String,
    index: String,
}

impl RecordBuilder {
    pub fn new(
        run_id: impl Into<String>,
        model_version: impl Into<String>,
        index: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            model_version: model_version.into(),
            index: index.into(),
        }
    }

    /// Lazily build records for `results`
    ///
    /// Order is result order, then detection order within each result.
    pub fn records<'a, I>(&self, results: I) -> Records<'a, I::IntoIter>
    where
        I: IntoIterator<Item = &'a DocumentResult>,
    {
        Records {
            builder: self.clone(),
            results: results.into_iter(),
            current: None,
        }
    }

    fn record(
        &self,
        result: &DocumentResult,
        name_hash: &str,
        detection_index: usize,
        detection: &Detection,
    ) -> IndexRecord {
        IndexRecord {
            index: self.index.clone(),
            run_id: self.run_id.clone(),
            ocr_model_version: self.model_version.clone(),
            document_name_hash: name_hash.to_string(),
            document_name: result.document_name.clone(),
            page_number: result.page_number,
            detection_index,
            boxes: detection.boxes,
            text: detection.text.clone(),
            confidence: detection.confidence,
            id: composite_id(&self.model_version, name_hash, result.page_number, detection_index),
        }
    }
}

/// Build records for a set of results in one call
pub fn build_records<'a>(
    results: &'a [DocumentResult],
    run_id: &str,
    model_version: &str,
    index: &str,
) -> Records<'a, slice::Iter<'a, DocumentResult>> {
    RecordBuilder::new(run_id, model_version, index).records(results)
}

struct CurrentResult<'a> {
    result: &'a DocumentResult,
    name_hash: String,
    detections: Enumerate<slice::Iter<'a, Detection>>,
}

/// Lazy record sequence returned by [`RecordBuilder::records`]
///
/// Holds only the source iterator and the result currently being expanded.
/// Cloning before iteration gives an independent replay from the source.
pub struct Records<'a, I> {
    builder: RecordBuilder,
    results: I,
    current: Option<CurrentResult<'a>>,
}

impl<'a, I> Iterator for Records<'a, I>
where
    I: Iterator<Item = &'a DocumentResult>,
{
    type Item = IndexRecord;

    fn next(&mut self) -> Option<IndexRecord> {
        loop {
            if let Some(current) = self.current.as_mut() {
                if let Some((detection_index, detection)) = current.detections.next() {
                    return Some(self.builder.record(
                        current.result,
                        &current.name_hash,
                        detection_index,
                        detection,
                    ));
                }
            }

            let result = self.results.next()?;
            self.current = Some(CurrentResult {
                result,
                name_hash: document_name_hash(&result.document_name),
                detections: result.detections.iter().enumerate(),
            });
        }
    }
}

impl<'a, I: Clone> Clone for Records<'a, I> {
    fn clone(&self) -> Self {
        Self {
            builder: self.builder.clone(),
            results: self.results.clone(),
            current: self.current.as_ref().map(|current| CurrentResult {
                result: current.result,
                name_hash: current.name_hash.clone(),
                detections: current.detections.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(text: &str) -> Detection {
        Detection {
            boxes: [(0, 0), (20, 0), (20, 8), (0, 8)],
            text: text.to_string(),
            confidence: 0.75,
        }
    }

    fn result(name: &str, page: u32, texts: &[&str]) -> DocumentResult {
        DocumentResult {
            document_name: name.to_string(),
            page_number: page,
            detections: texts.iter().map(|t| detection(t)).collect(),
        }
    }

    #[test]
    fn test_document_name_hash() {
        // sha256("abc")
        assert_eq!(
            document_name_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_invoice_ids_differ_only_in_detection_index() {
        let results = vec![result("invoice.pdf", 2, &["Invoice", "Total", ""])];
        let builder = RecordBuilder::new("run-1", "4", "ocr-results");
        let records: Vec<_> = builder.records(&results).collect();

        assert_eq!(records.len(), 3);
        let hash = document_name_hash("invoice.pdf");
        for (i, record) in records.iter().enumerate() {
            let segments: Vec<&str> = record.id.split(ID_SEPARATOR).collect();
            assert_eq!(segments, vec!["4", hash.as_str(), "2", i.to_string().as_str()]);
            assert_eq!(record.document_name_hash, hash);
            assert_eq!(record.detection_index, i);
        }
        assert_eq!(records[2].text, "");
    }

    #[test]
    fn test_order_follows_results_then_detections() {
        let results = vec![
            result("a.pdf", 0, &["a0", "a1"]),
            result("empty.pdf", 0, &[]),
            result("b.pdf", 3, &["b0"]),
        ];
        let builder = RecordBuilder::new("run", "0", "idx");
        let texts: Vec<_> = builder.records(&results).map(|r| r.text).collect();
        assert_eq!(texts, vec!["a0", "a1", "b0"]);
    }

    #[test]
    fn test_rebuild_is_identical() {
        let results = vec![result("x.pdf", 1, &["one", "two"]), result("y.pdf", 0, &["three"])];
        let first: Vec<_> = build_records(&results, "run", "0", "idx").collect();
        let second: Vec<_> = build_records(&results, "run", "0", "idx").collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_clone_replays_from_source() {
        let results = vec![result("x.pdf", 1, &["one", "two", "three"])];
        let builder = RecordBuilder::new("run", "0", "idx");

        let mut records = builder.records(&results);
        let replay = records.clone();
        assert_eq!(records.next().unwrap().text, "one");

        let ids: Vec<_> = replay.map(|r| r.id).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(records.count(), 2);
    }

    #[test]
    fn test_record_fields_and_document_body() {
        let results = vec![result("scan/report.pdf", 7, &["hello"])];
        let builder = RecordBuilder::new("run-42", "v3", "ocr-results");
        let record = builder.records(&results).next().unwrap();

        assert_eq!(record.index, "ocr-results");
        assert_eq!(record.run_id, "run-42");
        assert_eq!(record.ocr_model_version, "v3");
        assert_eq!(record.page_number, 7);

        let body = record.to_document().unwrap();
        assert!(body.get("index").is_none());
        assert_eq!(body["id"], record.id.as_str());
        assert_eq!(body["boxes"][1][0], 20);
        assert_eq!(body["text"], "hello");
    }

    #[test]
    fn test_different_model_versions_do_not_collide() {
        let results = vec![result("a.pdf", 0, &["t"])];
        let v0 = RecordBuilder::new("run", "0", "idx");
        let v1 = RecordBuilder::new("run", "1", "idx");
        let id0 = v0.records(&results).next().unwrap().id;
        let id1 = v1.records(&results).next().unwrap().id;
        assert_ne!(id0, id1);
    }
}
