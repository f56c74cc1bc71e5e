//! Post-run aggregation of fold records. Pure computation; rendering and
//! plotting belong to external collaborators.

use crate::infer::FoldRecord;
use serde::{Deserialize, Serialize};

/// Aggregate quality of one leave-one-gene-out run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub folds: usize,
    /// Fraction of folds whose prediction, thresholded at 0.5, matches the
    /// actual label.
    pub accuracy: f64,
    /// Mean binary cross-entropy across folds, with predictions clamped
    /// away from 0 and 1 so a single confident miss stays finite.
    pub mean_log_loss: f64,
    /// Folds scored with the degraded population fallback. Downstream
    /// evaluation may want to discount these.
    pub degraded_folds: usize,
    /// Folds whose fit hit the iteration budget without converging.
    pub unconverged_folds: usize,
}

const PROB_FLOOR: f64 = 1e-12;

/// Aggregates per-fold records into a run summary.
pub fn summarize(records: &[FoldRecord]) -> RunSummary {
    let folds = records.len();
    if folds == 0 {
        return RunSummary {
            folds: 0,
            accuracy: 0.0,
            mean_log_loss: 0.0,
            degraded_folds: 0,
            unconverged_folds: 0,
        };
    }

    let mut correct = 0usize;
    let mut loss = 0.0f64;
    for record in records {
        let hard = if record.predicted >= 0.5 { 1.0 } else { 0.0 };
        if hard == record.actual {
            correct += 1;
        }
        let p = record.predicted.clamp(PROB_FLOOR, 1.0 - PROB_FLOOR);
        loss -= record.actual * p.ln() + (1.0 - record.actual) * (1.0 - p).ln();
    }

    RunSummary {
        folds,
        accuracy: correct as f64 / folds as f64,
        mean_log_loss: loss / folds as f64,
        degraded_folds: records.iter().filter(|r| r.metadata.degraded).count(),
        unconverged_folds: records.iter().filter(|r| !r.metadata.converged).count(),
    }
}
