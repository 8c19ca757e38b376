use statrs::statistics::Statistics;

use crate::common::params::DetectorParams;

pub const SPIKE_REASON: &str = "Huge spike in balance detected";
pub const VARIATION_REASON: &str = "Inconsistent variation in balance detected";
pub const NO_ACTION_NEEDED: &str = "No action needed";
pub const REVIEW_HISTORY: &str = "Review account history";

/// Fixed reason for an unexplained series, if one of the rules applies.
///
/// A range above the spike threshold wins over a spread above the
/// standard-deviation threshold. `None` means the explainer has to supply
/// the reason.
pub fn rule_based_reason(series: &[f64], params: &DetectorParams) -> Option<&'static str> {
    if series.is_empty() {
        return None;
    }

    let max = series.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = series.iter().cloned().fold(f64::INFINITY, f64::min);
    if max - min > params.spike_threshold {
        return Some(SPIKE_REASON);
    }

    // Population standard deviation over the whole series
    let std_dev = series.iter().population_std_dev();
    if std_dev > params.std_dev_threshold {
        return Some(VARIATION_REASON);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spike_detected() {
        let series = vec![100.0, 12_000.0, -50.0];
        assert_eq!(rule_based_reason(&series, &DetectorParams::default()), Some(SPIKE_REASON));
    }

    #[test]
    fn test_variation_detected() {
        // Range 2,000 stays under the spike threshold, std-dev is 1,000
        let series = vec![-1_000.0, 1_000.0, -1_000.0, 1_000.0];
        assert_eq!(
            rule_based_reason(&series, &DetectorParams::default()),
            Some(VARIATION_REASON)
        );
    }

    #[test]
    fn test_small_spread_needs_explanation() {
        let series = vec![10.0, 35.0, -20.0, 60.0];
        assert_eq!(rule_based_reason(&series, &DetectorParams::default()), None);
    }

    #[test]
    fn test_thresholds_follow_params() {
        let series = vec![0.0, 6_000.0];
        assert_eq!(rule_based_reason(&series, &DetectorParams::default()), Some(VARIATION_REASON));

        let strict = DetectorParams {
            spike_threshold: 5_000.0,
            std_dev_threshold: 1_000.0,
            ..DetectorParams::default()
        };
        assert_eq!(rule_based_reason(&series, &strict), Some(SPIKE_REASON));
    }

    #[test]
    fn test_empty_series() {
        assert_eq!(rule_based_reason(&[], &DetectorParams::default()), None);
    }
}
