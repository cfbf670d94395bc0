//! Drift Detection Layer
//!
//! Learns a low-dimensional reference manifold from known-good page images
//! and scores new batches by how poorly they reconstruct from it. A rising
//! score means incoming documents no longer look like what the OCR model was
//! validated on.
//!
//! Pipeline: resize to `D x D` grayscale → flatten → standardize → project
//! onto `k` principal components → reconstruct → mean squared error.

pub mod linalg;
pub mod model;
pub mod pca;
pub mod preprocess;
pub mod scorer;

#[cfg(test)]
pub(crate) mod fixtures;

pub use model::{DriftModel, MODEL_FORMAT_VERSION};
pub use scorer::{score_batches, DriftDetector};
