//! Fitted drift model
//!
//! Bundles the standardizer and the principal-component basis learned from a
//! reference set of known-good pages, and handles persisting the artifact.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info};

use super::pca::{cumulative_variance, fit_components, Standardizer};
use super::preprocess::{feature_len, feature_matrix};
use crate::config::DriftSettings;
use crate::error::{DriftError, Result};
use crate::imaging::PageImage;

/// Version tag written into every model artifact
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Reference manifold learned from known-good pages
///
/// Immutable once fit. The number of components is fixed at fit time and
/// scoring input must flatten to exactly `resize_dim²` features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftModel {
    format_version: u32,
    resize_dim: u32,
    variance_threshold: f64,
    reference_samples: usize,
    standardizer: Standardizer,
    /// Principal axes as rows, `(k, resize_dim²)`
    components: Array2<f64>,
    /// Explained-variance ratio of every candidate axis
    explained_variance_ratio: Array1<f64>,
}

impl DriftModel {
    /// Fit a model on reference pages
    pub fn fit<'a, I>(reference: I, settings: &DriftSettings) -> Result<Self>
    where
        I: IntoIterator<Item = &'a PageImage>,
    {
        settings.validate()?;
        let dim = settings.resize_dim;
        let features = feature_len(dim);

        let raw = match feature_matrix(reference, dim) {
            Ok(matrix) => matrix,
            Err(DriftError::EmptyBatch) => {
                return Err(DriftError::InsufficientData("reference set is empty".into()))
            }
            Err(e) => return Err(e),
        };

        let samples = raw.nrows();
        if samples < 2 {
            return Err(DriftError::InsufficientData(format!(
                "need at least 2 reference images, got {}",
                samples
            )));
        }
        if settings.require_full_rank && samples < features {
            return Err(DriftError::InsufficientData(format!(
                "{} reference images cannot span {} features ({}x{})",
                samples, features, dim, dim
            )));
        }

        info!(
            "Fitting drift model on {} reference images at {}x{}",
            samples, dim, dim
        );

        let standardizer = Standardizer::fit(&raw)?;
        let normalized = standardizer.transform(&raw);
        drop(raw);

        let pca = fit_components(&normalized, settings.variance_threshold)?;
        let model = Self {
            format_version: MODEL_FORMAT_VERSION,
            resize_dim: dim,
            variance_threshold: settings.variance_threshold,
            reference_samples: samples,
            standardizer,
            components: pca.components,
            explained_variance_ratio: pca.explained_variance_ratio,
        };

        let k = model.n_components();
        info!(
            "Selected {} components explaining {:.4} of variance (threshold {})",
            k,
            model.cumulative_explained_variance()[k - 1],
            settings.variance_threshold
        );

        Ok(model)
    }

    /// Canonical side length images are resized to
    pub fn resize_dim(&self) -> u32 {
        self.resize_dim
    }

    /// Length of the flattened feature vector (`resize_dim²`)
    pub fn feature_len(&self) -> usize {
        self.components.ncols()
    }

    /// Number of retained principal components `k`
    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }

    /// Threshold the component count was chosen for
    pub fn variance_threshold(&self) -> f64 {
        self.variance_threshold
    }

    /// Number of reference images the model was fit on
    pub fn reference_samples(&self) -> usize {
        self.reference_samples
    }

    /// Explained-variance ratio of every candidate component
    pub fn explained_variance_ratio(&self) -> &Array1<f64> {
        &self.explained_variance_ratio
    }

    /// Cumulative explained-variance ratio of every candidate component
    pub fn cumulative_explained_variance(&self) -> Vec<f64> {
        cumulative_variance(&self.explained_variance_ratio)
    }

    /// Share of reference variance explained by the `k` retained components
    pub fn retained_variance(&self) -> f64 {
        self.explained_variance_ratio
            .iter()
            .take(self.n_components())
            .sum()
    }

    pub(crate) fn standardizer(&self) -> &Standardizer {
        &self.standardizer
    }

    pub(crate) fn components(&self) -> &Array2<f64> {
        &self.components
    }

    /// Write the model as JSON to any byte sink
    pub fn save_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = BufWriter::new(writer);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Read and validate a model from any byte source
    pub fn load_from<R: Read>(reader: R) -> Result<Self> {
        let model: Self = serde_json::from_reader(BufReader::new(reader))?;
        model.validate()?;
        Ok(model)
    }

    /// Save to a file, replacing it atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let temp_path = path.with_extension("tmp");
        let file = File::create(&temp_path)?;
        if let Err(e) = self.save_to(file) {
            std::fs::remove_file(&temp_path).ok();
            return Err(e);
        }
        std::fs::rename(&temp_path, path)?;

        info!("Saved drift model ({} components) to {:?}", self.n_components(), path);
        Ok(())
    }

    /// Load a model file
    pub fn load(path: &Path) -> Result<Self> {
        let model = Self::load_from(File::open(path)?)?;
        debug!(
            "Loaded drift model from {:?}: {}x{}, {} components",
            path,
            model.resize_dim,
            model.resize_dim,
            model.n_components()
        );
        Ok(model)
    }

    /// Check shapes after deserialization
    fn validate(&self) -> Result<()> {
        if self.format_version != MODEL_FORMAT_VERSION {
            return Err(DriftError::ModelFormat(format!(
                "unsupported format version {} (expected {})",
                self.format_version, MODEL_FORMAT_VERSION
            )));
        }
        if self.resize_dim == 0 {
            return Err(DriftError::ModelFormat("resize_dim is zero".into()));
        }

        let features = feature_len(self.resize_dim);
        if self.standardizer.mean.len() != features || self.standardizer.scale.len() != features {
            return Err(DriftError::ModelFormat(format!(
                "normalization has {} features, expected {}",
                self.standardizer.mean.len(),
                features
            )));
        }
        if self.components.nrows() == 0 {
            return Err(DriftError::ModelFormat("basis has no components".into()));
        }
        if self.components.ncols() != features {
            return Err(DriftError::ModelFormat(format!(
                "basis has {} features, expected {}",
                self.components.ncols(),
                features
            )));
        }
        if self.explained_variance_ratio.len() < self.components.nrows() {
            return Err(DriftError::ModelFormat(
                "fewer variance ratios than components".into(),
            ));
        }
        if self.standardizer.scale.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(DriftError::ModelFormat("non-positive feature scale".into()));
        }

        Ok(())
    }
}
