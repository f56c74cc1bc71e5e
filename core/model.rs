//! # Model State and Prediction
//!
//! The public data structures for a fitted adjacency-regularized
//! classifier. `ModelConfig` is the complete blueprint of a fit;
//! `TrainedModel` is the immutable artifact that `estimate::train_model`
//! produces. Prediction is a fast, non-iterative pass over fitted
//! parameters; it never mutates the model, so calling it twice on the
//! same input yields identical output.
//!
//! A `TrainedModel` serializes to a human-readable TOML file so that
//! downstream prediction collaborators can consume it without rerunning
//! the fit.

use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Where the graph-smoothness penalty is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PenaltySpace {
    /// Penalize the linear predictor `f = Xw`: entities (rows) are genes
    /// and the Laplacian spans the same rows. This is the form used by the
    /// leave-one-gene-out engine.
    Predictions,
    /// Penalize the weight vector directly: columns of the design matrix
    /// correspond to genes (sample-level outcomes with gene features) and
    /// the Laplacian spans the columns.
    Coefficients,
}

/// The complete blueprint of a fit. Owned by the caller and passed in
/// explicitly; no process-wide state survives between pipeline runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Regularization strength. Zero reduces the fit to the unregularized
    /// base classifier.
    pub lambda: f64,
    /// Iteration budget for the optimizer. Timeouts are measured purely in
    /// iteration counts, never wall-clock.
    pub max_iters: usize,
    /// Convergence tolerance on the objective improvement between
    /// iterations.
    pub tol: f64,
    pub penalty_space: PenaltySpace,
    /// Seeds the random weight initialization. With `None` the weights
    /// start at zero and the whole fit is deterministic.
    pub seed: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            lambda: 1.0,
            max_iters: 500,
            tol: 1e-8,
            penalty_space: PenaltySpace::Predictions,
            seed: None,
        }
    }
}

/// Soft outcome of the optimization. Non-convergence is a warning
/// condition carried here, never an error: partial results are usable and
/// downstream evaluation can discount them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitSummary {
    pub converged: bool,
    pub iterations: usize,
    pub final_objective: f64,
    /// Set when a cooperative cancellation flag stopped the fit at an
    /// iteration boundary.
    pub cancelled: bool,
}

/// The immutable artifact of a completed fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    // Scalar before the table-valued fields so the TOML form serializes
    // cleanly.
    pub intercept: f64,
    pub config: ModelConfig,
    pub weights: Array1<f64>,
    pub summary: FitSummary,
}

/// Custom error type for model persistence and prediction.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Prediction data has {found} feature columns, but the model was trained on {expected}.")]
    MismatchedFeatureCount { found: usize, expected: usize },
    #[error("predict was invoked before fit; train the classifier first.")]
    NotFitted,
}

impl TrainedModel {
    /// Predicts class-1 probabilities for new feature rows.
    ///
    /// Pure function of the fitted parameters and the input: no side
    /// effects, no mutation, idempotent.
    pub fn predict(&self, features: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        if features.ncols() != self.weights.len() {
            return Err(ModelError::MismatchedFeatureCount {
                found: features.ncols(),
                expected: self.weights.len(),
            });
        }
        let z = features.dot(&self.weights) + self.intercept;
        Ok(z.mapv(sigmoid))
    }

    /// Saves the model as human-readable TOML.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let serialized = toml::to_string_pretty(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }

    /// Loads a model previously written by [`TrainedModel::save`].
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

/// Numerically stable logistic function.
pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}
