//! OCR (Optical Character Recognition) capability
//!
//! The OCR engine itself is an external collaborator. This module defines the
//! detection types the rest of the pipeline works with, the `OcrModel`
//! capability, and adapters from raw engine output.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::imaging::{PageImage, PageRef};

/// Corner point of a detection box
pub type Point = (i32, i32);

/// OCR errors
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Invalid detection: {0}")]
    InvalidDetection(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Single OCR detection result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Quadrilateral corners, in engine order
    pub boxes: [Point; 4],
    /// Recognized text (may be empty)
    pub text: String,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
}

/// All detections of one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    /// Source document path or key
    pub document_name: String,
    /// Page number within the document
    pub page_number: u32,
    /// Detections in engine order (not necessarily reading order)
    pub detections: Vec<Detection>,
}

/// Capability to run OCR on a page
pub trait OcrModel: Send + Sync {
    /// Detect and recognize text on a page
    fn predict(&self, image: &PageImage) -> Result<Vec<Detection>, OcrError>;
}

/// Detection as emitted by dictionary-style OCR engines
///
/// Note the engine's field name for confidence is `confident`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDetection {
    pub boxes: Vec<Vec<i32>>,
    pub text: String,
    pub confident: f64,
}

impl TryFrom<RawDetection> for Detection {
    type Error = OcrError;

    fn try_from(raw: RawDetection) -> Result<Self, Self::Error> {
        if raw.boxes.len() != 4 {
            return Err(OcrError::InvalidDetection(format!(
                "expected 4 corners, got {}",
                raw.boxes.len()
            )));
        }

        let mut boxes = [(0, 0); 4];
        for (corner, point) in boxes.iter_mut().zip(&raw.boxes) {
            match point.as_slice() {
                [x, y] => *corner = (*x, *y),
                other => {
                    return Err(OcrError::InvalidDetection(format!(
                        "corner must have 2 coordinates, got {}",
                        other.len()
                    )))
                }
            }
        }

        if !raw.confident.is_finite() {
            return Err(OcrError::InvalidDetection("confidence is not finite".into()));
        }

        Ok(Detection {
            boxes,
            text: raw.text,
            confidence: raw.confident.clamp(0.0, 1.0) as f32,
        })
    }
}

/// Convert raw engine output into detections
pub fn wrap_raw_results(raw_results: Vec<RawDetection>) -> Result<Vec<Detection>, OcrError> {
    raw_results.into_iter().map(Detection::try_from).collect()
}

/// A page the OCR model failed on
#[derive(Debug, Clone)]
pub struct PageFailure {
    pub document: String,
    pub page_number: u32,
    pub reason: String,
}

/// Run a model over pages, keeping failures explicit
pub fn recognize_pages<M>(model: &M, pages: &[PageRef]) -> (Vec<DocumentResult>, Vec<PageFailure>)
where
    M: OcrModel + ?Sized,
{
    let mut results = Vec::with_capacity(pages.len());
    let mut failures = Vec::new();

    for page in pages {
        match model.predict(&page.image) {
            Ok(detections) => {
                debug!(
                    "{} page {}: {} detections",
                    page.document,
                    page.page_number,
                    detections.len()
                );
                results.push(DocumentResult {
                    document_name: page.document.clone(),
                    page_number: page.page_number,
                    detections,
                });
            }
            Err(e) => {
                warn!("OCR failed on {} page {}: {}", page.document, page.page_number, e);
                failures.push(PageFailure {
                    document: page.document.clone(),
                    page_number: page.page_number,
                    reason: e.to_string(),
                });
            }
        }
    }

    (results, failures)
}
