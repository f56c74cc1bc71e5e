//! # Adjacency-Regularized Model Estimation
//!
//! Fits a binary logistic classifier whose objective adds a graph-smoothness
//! penalty to the base loss:
//!
//! ```text
//!   J(w, b) = mean logistic loss  +  lambda * Q(w)
//! ```
//!
//! where `Q` is the quadratic form `f' L f` over the linear predictor
//! `f = Xw` (prediction-space smoothing across genes) or `w' L w`
//! (coefficient-space smoothing for sample-level designs). `L` is a graph
//! Laplacian from [`crate::graph`], symmetric PSD by construction, so the
//! combined objective stays convex and well-posed. The intercept is never
//! penalized.
//!
//! Optimization is deterministic gradient descent with Armijo backtracking.
//! Reaching the iteration budget without convergence is a warning carried
//! in [`FitSummary`], not an error: the partial fit is still usable. An
//! optional cancellation flag is checked once per iteration boundary; the
//! solver has no other suspension point.

use crate::model::{FitSummary, ModelConfig, ModelError, PenaltySpace, TrainedModel, sigmoid};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// A comprehensive error type for the model estimation process. Structural
/// and configuration failures abort immediately; numerical non-convergence
/// is deliberately absent here (see [`FitSummary`]).
#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("The regularization strength lambda must be finite and non-negative (got {0}).")]
    InvalidLambda(f64),
    #[error("The convergence tolerance must be finite and strictly positive (got {0}).")]
    InvalidTolerance(f64),
    #[error("The iteration budget max_iters must be greater than zero.")]
    InvalidMaxIterations,
    #[error("Feature matrix has {rows} rows, but {labels} labels were provided.")]
    DimensionMismatch { rows: usize, labels: usize },
    #[error("Labels must be exactly 0 or 1 (found {value} at row {row}).")]
    InvalidLabel { row: usize, value: f64 },
    #[error(
        "Laplacian is {nrows}x{ncols}, but {space} smoothing requires a square matrix over the {expected} {axis} of the design."
    )]
    LaplacianShapeMismatch {
        nrows: usize,
        ncols: usize,
        space: &'static str,
        expected: usize,
        axis: &'static str,
    },
    #[error("The training set is empty; at least one labeled gene is required to fit.")]
    EmptyTrainingSet,
}

/// Fits the adjacency-regularized classifier to convergence (or to the
/// iteration budget). The main entry point for training.
pub fn train_model<'a>(
    features: ArrayView2<'a, f64>,
    labels: ArrayView1<'a, f64>,
    laplacian: ArrayView2<'a, f64>,
    config: &ModelConfig,
) -> Result<TrainedModel, EstimationError> {
    train_model_cancellable(features, labels, laplacian, config, None)
}

/// Like [`train_model`], but checks `cancel` at each iteration boundary and
/// stops early when it is set, returning the partial (non-converged) state.
pub fn train_model_cancellable<'a>(
    features: ArrayView2<'a, f64>,
    labels: ArrayView1<'a, f64>,
    laplacian: ArrayView2<'a, f64>,
    config: &ModelConfig,
    cancel: Option<&AtomicBool>,
) -> Result<TrainedModel, EstimationError> {
    validate(features, labels, laplacian, config)?;

    let problem = internal::Problem {
        features,
        labels,
        laplacian,
        lambda: config.lambda,
        space: config.penalty_space,
    };

    let n_features = features.ncols();
    let mut weights = match config.seed {
        Some(seed) => {
            let mut rng = StdRng::seed_from_u64(seed);
            Array1::from_shape_fn(n_features, |_| rng.gen_range(-0.01..0.01))
        }
        None => Array1::zeros(n_features),
    };
    let mut intercept = 0.0_f64;

    let mut objective = problem.objective(&weights, intercept);
    let mut converged = false;
    let mut cancelled = false;
    let mut iterations = 0_usize;
    // Warm-started backtracking step; grown before each search so a
    // conservative step in one iteration does not pin later ones.
    let mut step = 1.0_f64;

    for iter in 1..=config.max_iters {
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                log::warn!(
                    "Fit cancelled at iteration boundary {iter} (objective {objective:.6e})."
                );
                cancelled = true;
                break;
            }
        }

        let (grad_w, grad_b) = problem.gradient(&weights, intercept);
        let grad_sq = grad_w.dot(&grad_w) + grad_b * grad_b;
        if grad_sq.sqrt() <= f64::EPSILON {
            converged = true;
            break;
        }

        step = (step * 2.0).min(1024.0);
        let mut accepted = None;
        while step >= 1e-16 {
            let w_trial = &weights - &(&grad_w * step);
            let b_trial = intercept - grad_b * step;
            let obj_trial = problem.objective(&w_trial, b_trial);
            if obj_trial <= objective - internal::ARMIJO_C * step * grad_sq {
                accepted = Some((w_trial, b_trial, obj_trial));
                break;
            }
            step *= 0.5;
        }

        let Some((w_new, b_new, obj_new)) = accepted else {
            // No representable step decreases the objective: flat to
            // machine precision.
            converged = true;
            break;
        };

        let improvement = objective - obj_new;
        weights = w_new;
        intercept = b_new;
        objective = obj_new;
        iterations = iter;

        if improvement < config.tol {
            converged = true;
            break;
        }
    }

    if !converged && !cancelled {
        log::warn!(
            "Fit did not converge within {} iterations (final objective {:.6e}); returning partial result.",
            config.max_iters,
            objective
        );
    }

    Ok(TrainedModel {
        config: config.clone(),
        weights,
        intercept,
        summary: FitSummary {
            converged,
            iterations,
            final_objective: objective,
            cancelled,
        },
    })
}

fn validate(
    features: ArrayView2<f64>,
    labels: ArrayView1<f64>,
    laplacian: ArrayView2<f64>,
    config: &ModelConfig,
) -> Result<(), EstimationError> {
    if !config.lambda.is_finite() || config.lambda < 0.0 {
        return Err(EstimationError::InvalidLambda(config.lambda));
    }
    if !config.tol.is_finite() || config.tol <= 0.0 {
        return Err(EstimationError::InvalidTolerance(config.tol));
    }
    if config.max_iters == 0 {
        return Err(EstimationError::InvalidMaxIterations);
    }
    if features.nrows() == 0 {
        return Err(EstimationError::EmptyTrainingSet);
    }
    if features.nrows() != labels.len() {
        return Err(EstimationError::DimensionMismatch {
            rows: features.nrows(),
            labels: labels.len(),
        });
    }
    for (row, &value) in labels.iter().enumerate() {
        if value != 0.0 && value != 1.0 {
            return Err(EstimationError::InvalidLabel { row, value });
        }
    }
    let (expected, axis, space) = match config.penalty_space {
        PenaltySpace::Predictions => (features.nrows(), "rows", "prediction-space"),
        PenaltySpace::Coefficients => (features.ncols(), "columns", "coefficient-space"),
    };
    if laplacian.nrows() != expected || laplacian.ncols() != expected {
        return Err(EstimationError::LaplacianShapeMismatch {
            nrows: laplacian.nrows(),
            ncols: laplacian.ncols(),
            space,
            expected,
            axis,
        });
    }
    Ok(())
}

/// A stateful fit/predict handle over [`train_model`]. `predict` before
/// `fit` is a programmer error surfaced as [`ModelError::NotFitted`].
#[derive(Debug)]
pub struct Classifier {
    config: ModelConfig,
    fitted: Option<TrainedModel>,
}

impl Classifier {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            fitted: None,
        }
    }

    pub fn fit<'a>(
        &mut self,
        features: ArrayView2<'a, f64>,
        labels: ArrayView1<'a, f64>,
        laplacian: ArrayView2<'a, f64>,
    ) -> Result<&TrainedModel, EstimationError> {
        let model = train_model(features, labels, laplacian, &self.config)?;
        self.fitted = Some(model);
        Ok(self.fitted.as_ref().expect("fit state was just stored"))
    }

    pub fn predict(&self, features: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        match &self.fitted {
            Some(model) => model.predict(features),
            None => Err(ModelError::NotFitted),
        }
    }

    pub fn model(&self) -> Option<&TrainedModel> {
        self.fitted.as_ref()
    }
}

/// Internal module holding the objective/gradient machinery.
mod internal {
    use super::*;

    /// Armijo sufficient-decrease constant for the backtracking search.
    pub(super) const ARMIJO_C: f64 = 1e-4;

    pub(super) struct Problem<'a> {
        pub features: ArrayView2<'a, f64>,
        pub labels: ArrayView1<'a, f64>,
        pub laplacian: ArrayView2<'a, f64>,
        pub lambda: f64,
        pub space: PenaltySpace,
    }

    impl Problem<'_> {
        /// Mean logistic loss plus the smoothness penalty. The loss term
        /// uses the overflow-safe `max(z,0) - y*z + ln(1 + e^{-|z|})` form.
        pub(super) fn objective(&self, weights: &Array1<f64>, intercept: f64) -> f64 {
            let z = self.features.dot(weights) + intercept;
            let n = self.labels.len() as f64;
            let mut loss = 0.0;
            for (&zi, &yi) in z.iter().zip(self.labels.iter()) {
                loss += zi.max(0.0) - yi * zi + (-zi.abs()).exp().ln_1p();
            }
            loss / n + self.lambda * self.penalty(weights)
        }

        /// The quadratic form `f' L f` (or `w' L w`). Symmetric PSD by
        /// construction of `L`, so the returned value is never negative up
        /// to roundoff; a zero Laplacian row (isolated gene) contributes
        /// exactly zero regardless of the gene's features.
        pub(super) fn penalty(&self, weights: &Array1<f64>) -> f64 {
            if self.lambda == 0.0 {
                return 0.0;
            }
            match self.space {
                PenaltySpace::Predictions => {
                    let f = self.features.dot(weights);
                    f.dot(&self.laplacian.dot(&f))
                }
                PenaltySpace::Coefficients => weights.dot(&self.laplacian.dot(weights)),
            }
        }

        pub(super) fn gradient(
            &self,
            weights: &Array1<f64>,
            intercept: f64,
        ) -> (Array1<f64>, f64) {
            let z = self.features.dot(weights) + intercept;
            let residual = z.mapv(sigmoid) - self.labels;
            let n = self.labels.len() as f64;
            let mut grad_w = self.features.t().dot(&residual) / n;
            let grad_b = residual.sum() / n;

            if self.lambda > 0.0 {
                match self.space {
                    PenaltySpace::Predictions => {
                        let lf = self.laplacian.dot(&self.features.dot(weights));
                        grad_w = grad_w + self.features.t().dot(&lf) * (2.0 * self.lambda);
                    }
                    PenaltySpace::Coefficients => {
                        grad_w = grad_w + self.laplacian.dot(weights) * (2.0 * self.lambda);
                    }
                }
            }
            (grad_w, grad_b)
        }
    }
}
