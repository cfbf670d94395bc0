//! Image preprocessing for the drift model
//!
//! Handles resizing, grayscale conversion, flattening and scaling of page
//! images into fixed-length feature vectors.

use image::imageops::{self, FilterType};
use ndarray::{Array1, Array2};

use crate::error::{DriftError, Result};
use crate::imaging::PageImage;

/// Number of features produced for a canonical dimension `dim`
pub fn feature_len(dim: u32) -> usize {
    (dim as usize) * (dim as usize)
}

/// Resize a page to `dim x dim` grayscale and flatten it row-major
///
/// Pixel values are scaled from `0..=255` to `0.0..=1.0`.
pub fn flatten_resized(image: &PageImage, dim: u32) -> Array1<f64> {
    let gray = image.to_luma();
    let resized = if gray.dimensions() == (dim, dim) {
        gray
    } else {
        imageops::resize(&gray, dim, dim, FilterType::Triangle)
    };

    resized
        .into_raw()
        .into_iter()
        .map(|v| v as f64 / 255.0)
        .collect()
}

/// Build an `(images, dim * dim)` feature matrix
///
/// Fails on an empty input or if any flattened vector does not have exactly
/// `dim * dim` entries.
pub fn feature_matrix<'a, I>(images: I, dim: u32) -> Result<Array2<f64>>
where
    I: IntoIterator<Item = &'a PageImage>,
{
    let expected = feature_len(dim);
    let mut data = Vec::new();
    let mut rows = 0;

    for image in images {
        let row = flatten_resized(image, dim);
        if row.len() != expected {
            return Err(DriftError::DimensionMismatch {
                expected,
                actual: row.len(),
            });
        }
        data.extend(row.iter().copied());
        rows += 1;
    }

    if rows == 0 {
        return Err(DriftError::EmptyBatch);
    }

    Array2::from_shape_vec((rows, expected), data)
        .map_err(|e| DriftError::Numerical(e.to_string()))
}
