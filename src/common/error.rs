//! Error types for ingestion, configuration and the explanation collaborator.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers of the reader and detector.
#[derive(Debug, Error)]
pub enum ReconError {
    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Table '{table}' is missing required columns: {}", columns.join(", "))]
    MissingColumns { table: String, columns: Vec<String> },

    #[error("Invalid row {row} in table '{table}': {reason}")]
    InvalidRow {
        table: String,
        row: usize,
        reason: String,
    },

    #[error("Invalid parameter: {name} - {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("DuckDB error: {0}")]
    Duckdb(#[from] duckdb::Error),
}

/// Errors from the external explanation collaborator.
///
/// These never reach the anomaly decision; the detector swaps them for the
/// configured fallback text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExplainError {
    #[error("Explainer unavailable: {0}")]
    Unavailable(String),

    #[error("Explainer timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Explainer failed: {0}")]
    Failed(String),
}

/// Result type for reader and detector operations.
pub type Result<T> = std::result::Result<T, ReconError>;
