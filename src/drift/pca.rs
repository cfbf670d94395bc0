//! Standardization and principal component analysis

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::linalg::{fix_sign, symmetric_eigen};
use crate::error::{DriftError, Result};

/// Features whose standard deviation is below this are left unscaled
const CONSTANT_FEATURE_STD: f64 = 10.0 * f64::EPSILON;

/// Eigenvalues below this fraction of the largest count as numerically zero
const RANK_TOLERANCE: f64 = 1e-10;

/// Per-entry magnitude below which centered data is rounding noise
const NOISE_ENTRY: f64 = 64.0 * f64::EPSILON;

/// Per-feature zero-mean, unit-variance scaling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    /// Per-feature mean
    pub mean: Array1<f64>,
    /// Per-feature standard deviation (1.0 for constant features)
    pub scale: Array1<f64>,
}

impl Standardizer {
    /// Compute mean and population standard deviation of every column
    pub fn fit(data: &Array2<f64>) -> Result<Self> {
        let mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| DriftError::InsufficientData("no samples to standardize".into()))?;
        let scale = data.var_axis(Axis(0), 0.0).mapv(|var| {
            let std = var.sqrt();
            if std < CONSTANT_FEATURE_STD {
                1.0
            } else {
                std
            }
        });

        Ok(Self { mean, scale })
    }

    /// Number of features this standardizer was fit on
    pub fn features(&self) -> usize {
        self.mean.len()
    }

    /// Apply the scaling to every row
    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        (data - &self.mean) / &self.scale
    }
}

/// Principal axes of a standardized data set
#[derive(Debug, Clone)]
pub struct PrincipalComponents {
    /// Retained axes as rows, `(k, features)`
    pub components: Array2<f64>,
    /// Explained-variance ratio of every candidate axis, descending
    pub explained_variance_ratio: Array1<f64>,
}

/// Fit principal components and keep enough to reach `variance_threshold`
///
/// `data` must already be centered. When there are fewer samples than
/// features the `n x n` Gram matrix is decomposed instead of the covariance.
pub fn fit_components(data: &Array2<f64>, variance_threshold: f64) -> Result<PrincipalComponents> {
    let (samples, features) = data.dim();
    let use_gram = samples <= features;

    debug!(
        "Fitting PCA on {} samples x {} features ({} matrix)",
        samples,
        features,
        if use_gram { "Gram" } else { "covariance" }
    );

    let scatter = if use_gram {
        data.dot(&data.t())
    } else {
        data.t().dot(data)
    };
    let eigen = symmetric_eigen(&scatter)?;

    let values = eigen.values.mapv(|v| v.max(0.0));
    let total: f64 = values.sum();
    let largest = values.get(0).copied().unwrap_or(0.0);
    // Centering identical rows leaves residue of order epsilon, not zero
    let noise_floor = (samples * features) as f64 * NOISE_ENTRY * NOISE_ENTRY;
    if total <= noise_floor || largest <= 0.0 {
        return Err(DriftError::InsufficientData(
            "reference images carry no variance".into(),
        ));
    }

    let explained_variance_ratio = values.mapv(|v| v / total);
    let rank = values.iter().filter(|&&v| v > RANK_TOLERANCE * largest).count();
    let k = select_components(&explained_variance_ratio, variance_threshold).clamp(1, rank);

    let mut components = Array2::<f64>::zeros((k, features));
    for i in 0..k {
        let mut axis = if use_gram {
            let projected = data.t().dot(&eigen.vectors.column(i));
            let norm = projected.dot(&projected).sqrt();
            projected / norm
        } else {
            eigen.vectors.column(i).to_owned()
        };
        fix_sign(&mut axis);
        components.row_mut(i).assign(&axis);
    }

    Ok(PrincipalComponents {
        components,
        explained_variance_ratio,
    })
}

/// Running sum of explained-variance ratios
pub fn cumulative_variance(ratios: &Array1<f64>) -> Vec<f64> {
    ratios
        .iter()
        .scan(0.0, |acc, r| {
            *acc += r;
            Some(*acc)
        })
        .collect()
}

/// Pick the number of components for a variance threshold
///
/// Smallest count whose cumulative ratio reaches the threshold; if none does,
/// the count whose cumulative ratio is closest to it.
pub fn select_components(ratios: &Array1<f64>, variance_threshold: f64) -> usize {
    let cumulative = cumulative_variance(ratios);

    if let Some(index) = cumulative.iter().position(|&c| c >= variance_threshold) {
        return index + 1;
    }

    cumulative
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            (*a - variance_threshold)
                .abs()
                .total_cmp(&(*b - variance_threshold).abs())
        })
        .map(|(index, _)| index + 1)
        .unwrap_or(1)
}
