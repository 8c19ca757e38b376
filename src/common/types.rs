use serde::{Deserialize, Serialize};
use std::fmt;

/// The composite key that ties a new observation to its historical cohort.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub company: String,
    pub account: String,
    /// Accounting unit.
    pub au: String,
    pub currency: String,
    pub primary_account: String,
}

impl GroupKey {
    pub fn new(
        company: impl Into<String>,
        account: impl Into<String>,
        au: impl Into<String>,
        currency: impl Into<String>,
        primary_account: impl Into<String>,
    ) -> Self {
        GroupKey {
            company: company.into(),
            account: account.into(),
            au: au.into(),
            currency: currency.into(),
            primary_account: primary_account.into(),
        }
    }
}

/// One balance-difference reading for an account grouping on a given date.
///
/// `as_of_date` uses the DuckDB DATE representation: days since 1970-01-01.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub key: GroupKey,
    pub as_of_date: i32,
    /// GL balance minus inter-hub balance.
    pub balance_difference: f64,
}

impl Observation {
    pub fn new(key: GroupKey, as_of_date: i32, balance_difference: f64) -> Self {
        Observation {
            key,
            as_of_date,
            balance_difference,
        }
    }

    /// Builds an observation from the two ledger balances.
    pub fn from_balances(key: GroupKey, as_of_date: i32, gl_balance: f64, ihub_balance: f64) -> Self {
        Observation::new(key, as_of_date, gl_balance - ihub_balance)
    }
}

/// Binary anomaly decision, rendered as "Yes"/"No" in result tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyFlag {
    Yes,
    No,
}

impl AnomalyFlag {
    pub fn is_anomaly(self) -> bool {
        self == AnomalyFlag::Yes
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyFlag::Yes => "Yes",
            AnomalyFlag::No => "No",
        }
    }
}

impl fmt::Display for AnomalyFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One output row of the detector, keyed back to its input observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub company: String,
    pub account: String,
    pub au: String,
    pub currency: String,
    #[serde(rename = "primary account")]
    pub primary_account: String,
    #[serde(rename = "as of date")]
    pub as_of_date: i32,
    #[serde(rename = "Comments")]
    pub comment: String,
    pub anomaly: AnomalyFlag,
    #[serde(rename = "next steps")]
    pub next_steps: String,
}

impl ClassificationResult {
    pub fn for_observation(
        observation: &Observation,
        comment: String,
        anomaly: AnomalyFlag,
        next_steps: String,
    ) -> Self {
        let key = &observation.key;
        ClassificationResult {
            company: key.company.clone(),
            account: key.account.clone(),
            au: key.au.clone(),
            currency: key.currency.clone(),
            primary_account: key.primary_account.clone(),
            as_of_date: observation.as_of_date,
            comment,
            anomaly,
            next_steps,
        }
    }

    /// Reassembles the grouping key this result was produced for.
    pub fn group_key(&self) -> GroupKey {
        GroupKey::new(
            self.company.clone(),
            self.account.clone(),
            self.au.clone(),
            self.currency.clone(),
            self.primary_account.clone(),
        )
    }
}

/// An original input row with the classification joined onto it (left join).
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRow {
    pub observation: Observation,
    pub result: Option<ClassificationResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_balances_subtracts_ihub() {
        let key = GroupKey::new("c1", "a1", "au1", "usd", "p1");
        let obs = Observation::from_balances(key, 19_723, 1_000.0, 250.0);
        assert_eq!(obs.balance_difference, 750.0);
    }

    #[test]
    fn test_anomaly_flag_display() {
        assert_eq!(AnomalyFlag::Yes.to_string(), "Yes");
        assert_eq!(AnomalyFlag::No.to_string(), "No");
        assert!(AnomalyFlag::Yes.is_anomaly());
        assert!(!AnomalyFlag::No.is_anomaly());
    }

    #[test]
    fn test_result_uses_output_column_names() {
        let key = GroupKey::new("c1", "a1", "au1", "usd", "p1");
        let obs = Observation::new(key.clone(), 19_723, 5.0);
        let result = ClassificationResult::for_observation(
            &obs,
            "Linear pattern observed".to_string(),
            AnomalyFlag::No,
            "No action needed".to_string(),
        );
        assert_eq!(result.group_key(), key);

        let json = serde_json::to_value(&result).unwrap();
        for column in [
            "company",
            "account",
            "au",
            "currency",
            "primary account",
            "as of date",
            "Comments",
            "anomaly",
            "next steps",
        ] {
            assert!(json.get(column).is_some(), "missing column {}", column);
        }
        assert_eq!(json["anomaly"], "No");
    }
}
