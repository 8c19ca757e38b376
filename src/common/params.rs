use serde::{Deserialize, Serialize};

use super::error::{ReconError, Result};

/// Maximum absolute residual (or magnitude) for a series to count as explained.
pub const TOLERANCE: f64 = 1.0;

/// Range (max - min) above which an unexplained series is reported as a spike.
pub const SPIKE_THRESHOLD: f64 = 10_000.0;

/// Population standard deviation above which an unexplained series is
/// reported as inconsistent variation.
pub const STD_DEV_THRESHOLD: f64 = 500.0;

/// Solver evaluations allowed per (parameter + 1) for the easy models.
pub const DEFAULT_PATIENCE: usize = 200;

/// Total solver evaluations allowed for the sinusoidal and quadratic models.
pub const EXTENDED_MAX_EVALUATIONS: usize = 10_000;

/// Tunable thresholds for the classifier and reason rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    pub tolerance: f64,
    pub spike_threshold: f64,
    pub std_dev_threshold: f64,
    pub default_patience: usize,
    pub extended_max_evaluations: usize,
}

impl Default for DetectorParams {
    fn default() -> Self {
        DetectorParams {
            tolerance: TOLERANCE,
            spike_threshold: SPIKE_THRESHOLD,
            std_dev_threshold: STD_DEV_THRESHOLD,
            default_patience: DEFAULT_PATIENCE,
            extended_max_evaluations: EXTENDED_MAX_EVALUATIONS,
        }
    }
}

impl DetectorParams {
    /// Check that every threshold is a positive finite number and every
    /// evaluation budget is non-zero.
    pub fn validate(&self) -> Result<()> {
        positive_finite("tolerance", self.tolerance)?;
        positive_finite("spike_threshold", self.spike_threshold)?;
        positive_finite("std_dev_threshold", self.std_dev_threshold)?;

        if self.default_patience == 0 {
            return Err(invalid("default_patience", "must be a positive integer"));
        }
        if self.extended_max_evaluations == 0 {
            return Err(invalid("extended_max_evaluations", "must be a positive integer"));
        }
        Ok(())
    }
}

fn positive_finite(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid(
            name,
            &format!("must be a positive finite number, got {}", value),
        ));
    }
    Ok(())
}

fn invalid(name: &str, reason: &str) -> ReconError {
    ReconError::InvalidParameter {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let params = DetectorParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.tolerance, 1.0);
        assert_eq!(params.spike_threshold, 10_000.0);
        assert_eq!(params.std_dev_threshold, 500.0);
    }

    #[test]
    fn test_rejects_non_positive_tolerance() {
        let params = DetectorParams {
            tolerance: 0.0,
            ..DetectorParams::default()
        };
        let err = params.validate().unwrap_err();
        assert!(err.to_string().contains("tolerance"), "Error: {}", err);
    }

    #[test]
    fn test_rejects_nan_threshold() {
        let params = DetectorParams {
            std_dev_threshold: f64::NAN,
            ..DetectorParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_budget() {
        let params = DetectorParams {
            extended_max_evaluations: 0,
            ..DetectorParams::default()
        };
        let err = params.validate().unwrap_err();
        assert!(err.to_string().contains("extended_max_evaluations"), "Error: {}", err);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let params: DetectorParams = serde_json::from_str(r#"{"spike_threshold": 5000.0}"#).unwrap();
        assert_eq!(params.spike_threshold, 5_000.0);
        assert_eq!(params.tolerance, TOLERANCE);
        assert_eq!(params.extended_max_evaluations, EXTENDED_MAX_EVALUATIONS);
    }
}
