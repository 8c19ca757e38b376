//! Reconciliation of general-ledger and inter-hub balances.
//!
//! For every new balance difference the detector pulls the account's
//! history, tries to explain the combined series with a linear, sinusoidal,
//! quadratic or logarithmic curve, and flags the observation as an anomaly
//! when none of them fits within tolerance.

pub mod classify;
pub mod common;
pub mod detector;
pub mod fitting;

pub use classify::explain::{Explainer, ExplainerConfig, ExplanationRequest, TimeBoundedExplainer};
pub use classify::{classify, classify_series, Classification, Pattern};
pub use common::error::{ExplainError, ReconError, Result};
pub use common::grouping::{combined_series, group_cohort, merge_results, KeyField, GROUP_FIELDS, MERGE_KEYS};
pub use common::params::DetectorParams;
pub use common::table_reader::read_observations;
pub use common::types::{AnomalyFlag, ClassificationResult, GroupKey, MergedRow, Observation};
pub use detector::AnomalyDetector;
pub use fitting::{fit, fit_from, fit_within, CurveModel, FitBudget, FitOutcome, FittedCurve};
