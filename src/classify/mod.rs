//! Pattern classifier: decides whether the newest balance difference is an
//! anomaly by trying to explain the whole series with a known curve.

pub mod explain;
pub mod reason;

use std::fmt;

use crate::common::params::DetectorParams;
use crate::common::types::AnomalyFlag;
use crate::fitting::{fit_within, index_axis, CurveModel, FitBudget, FitOutcome};

/// What the classifier recognised in a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// The new observation has no historical cohort.
    NoHistory,
    /// Every value is below the tolerance; nothing worth fitting.
    WithinThreshold,
    /// The first curve that explained every point.
    Curve(CurveModel),
    /// No candidate curve explained the series.
    Unexplained,
}

impl Pattern {
    /// Human-readable label. Empty for [`Pattern::Unexplained`], whose
    /// reason comes from the reason rules or the explainer instead.
    pub fn label(&self) -> String {
        match self {
            Pattern::NoHistory => "No historical data available".to_string(),
            Pattern::WithinThreshold => "All balance differences are within the threshold".to_string(),
            Pattern::Curve(model) => format!("{} pattern observed", model.name()),
            Pattern::Unexplained => String::new(),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// The core decision for one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub anomaly: AnomalyFlag,
    pub pattern: Pattern,
}

impl Classification {
    fn expected(pattern: Pattern) -> Self {
        Classification {
            anomaly: AnomalyFlag::No,
            pattern,
        }
    }

    fn anomalous(pattern: Pattern) -> Self {
        Classification {
            anomaly: AnomalyFlag::Yes,
            pattern,
        }
    }
}

/// Classify `new_value` against its cohort values.
///
/// The series fitted is `new_value` followed by `cohort` in the order given;
/// an empty cohort is an anomaly with [`Pattern::NoHistory`].
pub fn classify(cohort: &[f64], new_value: f64, params: &DetectorParams) -> Classification {
    if cohort.is_empty() {
        tracing::debug!("no historical cohort, flagging as anomaly");
        return Classification::anomalous(Pattern::NoHistory);
    }

    let mut series = Vec::with_capacity(cohort.len() + 1);
    series.push(new_value);
    series.extend_from_slice(cohort);
    classify_series(&series, params)
}

/// Classify an already combined series (new observation plus history).
///
/// Checks run in a fixed order and stop at the first that settles the
/// decision: the tolerance check, then each curve in [`CurveModel::ALL`].
/// A curve is accepted only if every residual is below the tolerance.
pub fn classify_series(series: &[f64], params: &DetectorParams) -> Classification {
    let tolerance = params.tolerance;

    if series.iter().all(|v| v.abs() < tolerance) {
        tracing::debug!(points = series.len(), "all values within tolerance");
        return Classification::expected(Pattern::WithinThreshold);
    }

    let budget = FitBudget {
        default_patience: params.default_patience,
        extended_max_evaluations: params.extended_max_evaluations,
    };
    let x = index_axis(series.len());

    for model in CurveModel::ALL {
        match fit_within(model, &x, series, budget, tolerance) {
            FitOutcome::Fit(curve) if curve.explains(tolerance) => {
                tracing::debug!(model = %model, points = series.len(), "series explained");
                return Classification::expected(Pattern::Curve(model));
            }
            FitOutcome::Fit(curve) => {
                tracing::debug!(
                    model = %model,
                    max_residual = curve.max_abs_residual(),
                    "residuals exceed tolerance"
                );
            }
            FitOutcome::FitFailed { reason, .. } => {
                tracing::debug!(model = %model, reason = %reason, "fit failed");
            }
        }
    }

    Classification::anomalous(Pattern::Unexplained)
}
