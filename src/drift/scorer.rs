//! Drift scoring
//!
//! Projects pages onto the reference manifold and measures how badly they
//! reconstruct. Scoring is read-only, so one model can serve many threads.

use ndarray::{Array1, Array2, Axis};
use tracing::debug;

use super::model::DriftModel;
use super::preprocess::feature_matrix;
use crate::error::{DriftError, Result};
use crate::imaging::PageImage;

/// Capability to score a batch of pages for drift
pub trait DriftDetector: Send + Sync {
    /// Aggregate drift score of a batch; larger means more anomalous
    fn score_pages(&self, pages: &[PageImage]) -> Result<f64>;
}

impl DriftDetector for DriftModel {
    fn score_pages(&self, pages: &[PageImage]) -> Result<f64> {
        self.score(pages)
    }
}

impl DriftModel {
    /// Mean squared reconstruction error over a whole batch
    pub fn score<'a, I>(&self, images: I) -> Result<f64>
    where
        I: IntoIterator<Item = &'a PageImage>,
    {
        let features = feature_matrix(images, self.resize_dim())?;
        self.score_features(&features)
    }

    /// Reconstruction error of each image in a batch
    ///
    /// The batch score is the mean of these values.
    pub fn score_items<'a, I>(&self, images: I) -> Result<Vec<f64>>
    where
        I: IntoIterator<Item = &'a PageImage>,
    {
        let features = feature_matrix(images, self.resize_dim())?;
        Ok(self.squared_residuals(&features)?.to_vec())
    }

    /// Score rows that are already resized and flattened
    pub fn score_features(&self, features: &Array2<f64>) -> Result<f64> {
        let per_item = self.squared_residuals(features)?;
        let score = per_item.mean().ok_or(DriftError::EmptyBatch)?;
        debug!("Scored batch of {} images: {}", per_item.len(), score);
        Ok(score)
    }

    /// Per-row mean squared difference between standardized input and its reconstruction
    fn squared_residuals(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        let (rows, cols) = features.dim();
        if rows == 0 {
            return Err(DriftError::EmptyBatch);
        }
        if cols != self.feature_len() {
            return Err(DriftError::DimensionMismatch {
                expected: self.feature_len(),
                actual: cols,
            });
        }

        let normalized = self.standardizer().transform(features);
        let basis = self.components();
        let latent = normalized.dot(&basis.t());
        let reconstructed = latent.dot(basis);

        let residual = normalized - reconstructed;
        residual
            .mapv(|r| r * r)
            .mean_axis(Axis(1))
            .ok_or(DriftError::EmptyBatch)
    }
}

/// Score a long run of pages in fixed-size batches
///
/// The final batch may be shorter than `batch_size`.
pub fn score_batches<D>(detector: &D, pages: &[PageImage], batch_size: usize) -> Result<Vec<f64>>
where
    D: DriftDetector + ?Sized,
{
    if pages.is_empty() {
        return Err(DriftError::EmptyBatch);
    }

    pages
        .chunks(batch_size.max(1))
        .map(|batch| detector.score_pages(batch))
        .collect()
}
