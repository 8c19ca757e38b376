use duckdb::Connection;
use rayon::prelude::*;
use std::sync::Arc;

use crate::classify::explain::{
    Explainer, ExplainerConfig, ExplanationRequest, TimeBoundedExplainer, Unavailable, FALLBACK_TEXT,
};
use crate::classify::reason::{rule_based_reason, NO_ACTION_NEEDED, REVIEW_HISTORY};
use crate::classify::{classify, Classification, Pattern};
use crate::common::error::Result;
use crate::common::grouping::{combined_series, group_cohort, merge_results, MERGE_KEYS};
use crate::common::params::DetectorParams;
use crate::common::table_reader::read_observations;
use crate::common::types::{AnomalyFlag, ClassificationResult, MergedRow, Observation};

/// Classifies new balance observations against their history.
///
/// Holds only read-only state, so one detector can serve many rows at once.
pub struct AnomalyDetector {
    params: DetectorParams,
    explainer: Arc<dyn Explainer>,
    fallback: String,
}

impl AnomalyDetector {
    /// Create a detector with no explanation backend. Free-text fields that
    /// need one get the fallback text.
    pub fn new(params: DetectorParams) -> Result<Self> {
        params.validate()?;
        Ok(AnomalyDetector {
            params,
            explainer: Arc::new(Unavailable),
            fallback: FALLBACK_TEXT.to_string(),
        })
    }

    /// Use `explainer` for anomaly reasons and next steps, bounded by the
    /// timeout in `config`.
    pub fn with_explainer(mut self, explainer: Arc<dyn Explainer>, config: &ExplainerConfig) -> Self {
        self.explainer = Arc::new(TimeBoundedExplainer::new(explainer, config));
        self.fallback = config.fallback.clone();
        self
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    /// Decide anomaly and pattern for one new observation. No text generation.
    pub fn classify_row(&self, historical: &[Observation], new: &Observation) -> (Classification, Vec<f64>) {
        let cohort = group_cohort(historical, &new.key);
        // combined_series always starts with the new value
        let series = combined_series(new, &cohort);
        let classification = classify(&series[1..], new.balance_difference, &self.params);
        (classification, series)
    }

    /// Build the full result row for one new observation.
    pub fn evaluate_row(&self, historical: &[Observation], new: &Observation) -> ClassificationResult {
        let (classification, series) = self.classify_row(historical, new);

        let (comment, next_steps) = match (classification.anomaly, classification.pattern) {
            (AnomalyFlag::Yes, Pattern::NoHistory) => {
                (Pattern::NoHistory.label(), REVIEW_HISTORY.to_string())
            }
            (AnomalyFlag::Yes, _) => {
                let comment = match rule_based_reason(&series, &self.params) {
                    Some(reason) => reason.to_string(),
                    None => self.explain(ExplanationRequest::AnomalyReason {
                        balance_diffs: series.clone(),
                    }),
                };
                let next_steps = self.explain(ExplanationRequest::NextSteps {
                    anomaly: AnomalyFlag::Yes,
                    balance_diffs: series,
                });
                (comment, next_steps)
            }
            (AnomalyFlag::No, pattern) => (pattern.label(), NO_ACTION_NEEDED.to_string()),
        };

        ClassificationResult::for_observation(new, comment, classification.anomaly, next_steps)
    }

    /// One result per new observation, in input order.
    ///
    /// Rows are evaluated in parallel; each sees the same read-only history.
    pub fn detect(&self, historical: &[Observation], new_rows: &[Observation]) -> Vec<ClassificationResult> {
        let results: Vec<ClassificationResult> = new_rows
            .par_iter()
            .map(|row| self.evaluate_row(historical, row))
            .collect();

        let anomalies = results.iter().filter(|r| r.anomaly.is_anomaly()).count();
        tracing::info!(
            rows = results.len(),
            history = historical.len(),
            anomalies,
            "anomaly detection finished"
        );
        results
    }

    /// Detect and left-join the results back onto `new_rows`.
    pub fn detect_and_merge(&self, historical: &[Observation], new_rows: &[Observation]) -> Vec<MergedRow> {
        let results = self.detect(historical, new_rows);
        merge_results(new_rows, &results, &MERGE_KEYS)
    }

    /// Read both tables from DuckDB, then detect and merge.
    pub fn detect_tables(
        &self,
        conn: &Connection,
        historical_table: &str,
        new_table: &str,
    ) -> Result<Vec<MergedRow>> {
        let historical = read_observations(conn, historical_table)?;
        let new_rows = read_observations(conn, new_table)?;
        Ok(self.detect_and_merge(&historical, &new_rows))
    }

    fn explain(&self, request: ExplanationRequest) -> String {
        match self.explainer.explain(&request) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "explanation unavailable, using fallback");
                self.fallback.clone()
            }
        }
    }
}
