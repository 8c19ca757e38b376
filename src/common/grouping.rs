use std::collections::HashMap;

use super::types::{ClassificationResult, GroupKey, MergedRow, Observation};

/// A column that can take part in a grouping or join key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyField {
    Company,
    Account,
    Au,
    Currency,
    PrimaryAccount,
    AsOfDate,
}

/// Fields a cohort is matched on.
pub const GROUP_FIELDS: [KeyField; 5] = [
    KeyField::Company,
    KeyField::Account,
    KeyField::Au,
    KeyField::Currency,
    KeyField::PrimaryAccount,
];

/// Fields results are joined back onto the input rows with.
pub const MERGE_KEYS: [KeyField; 6] = [
    KeyField::Company,
    KeyField::Account,
    KeyField::Au,
    KeyField::Currency,
    KeyField::PrimaryAccount,
    KeyField::AsOfDate,
];

impl KeyField {
    /// The column name used in input and output tables.
    pub fn column_name(self) -> &'static str {
        match self {
            KeyField::Company => "company",
            KeyField::Account => "account",
            KeyField::Au => "au",
            KeyField::Currency => "currency",
            KeyField::PrimaryAccount => "primary account",
            KeyField::AsOfDate => "as of date",
        }
    }

    fn from_key(self, key: &GroupKey, as_of_date: i32) -> String {
        match self {
            KeyField::Company => key.company.clone(),
            KeyField::Account => key.account.clone(),
            KeyField::Au => key.au.clone(),
            KeyField::Currency => key.currency.clone(),
            KeyField::PrimaryAccount => key.primary_account.clone(),
            KeyField::AsOfDate => as_of_date.to_string(),
        }
    }

    pub fn value_of(self, observation: &Observation) -> String {
        self.from_key(&observation.key, observation.as_of_date)
    }

    pub fn value_of_result(self, result: &ClassificationResult) -> String {
        match self {
            KeyField::Company => result.company.clone(),
            KeyField::Account => result.account.clone(),
            KeyField::Au => result.au.clone(),
            KeyField::Currency => result.currency.clone(),
            KeyField::PrimaryAccount => result.primary_account.clone(),
            KeyField::AsOfDate => result.as_of_date.to_string(),
        }
    }
}

/// Composite key values for an observation, in `fields` order.
pub fn composite_key(observation: &Observation, fields: &[KeyField]) -> Vec<String> {
    fields.iter().map(|f| f.value_of(observation)).collect()
}

/// Select the historical observations sharing `key` exactly.
///
/// No normalization happens here; callers hand in keys that are already
/// comparable.
pub fn group_cohort<'a>(historical: &'a [Observation], key: &GroupKey) -> Vec<&'a Observation> {
    historical.iter().filter(|obs| &obs.key == key).collect()
}

/// Like [`group_cohort`] but matching only the chosen fields of `target`.
pub fn group_cohort_by<'a>(
    historical: &'a [Observation],
    target: &Observation,
    fields: &[KeyField],
) -> Vec<&'a Observation> {
    let wanted = composite_key(target, fields);
    historical
        .iter()
        .filter(|obs| fields.iter().zip(&wanted).all(|(f, v)| &f.value_of(obs) == v))
        .collect()
}

/// Build the series the classifier fits: the new value first, then the
/// cohort from newest to oldest date.
///
/// Rows equal to one already taken (same key, date and value) are dropped,
/// so a historical copy of the new observation does not count twice.
pub fn combined_series(new: &Observation, cohort: &[&Observation]) -> Vec<f64> {
    let mut ordered: Vec<&Observation> = cohort.to_vec();
    // Stable sort keeps input order among rows sharing a date.
    ordered.sort_by(|a, b| b.as_of_date.cmp(&a.as_of_date));

    let mut taken: Vec<&Observation> = Vec::with_capacity(ordered.len() + 1);
    taken.push(new);
    for obs in ordered {
        if !taken.iter().any(|t| *t == obs) {
            taken.push(obs);
        }
    }

    taken.iter().map(|obs| obs.balance_difference).collect()
}

/// Left-join classification results onto the original rows.
///
/// Every original row appears exactly once, in input order. When several
/// results share a join key the first one wins; results with no matching
/// row are ignored.
pub fn merge_results(
    original: &[Observation],
    results: &[ClassificationResult],
    merge_keys: &[KeyField],
) -> Vec<MergedRow> {
    let mut by_key: HashMap<Vec<String>, &ClassificationResult> = HashMap::with_capacity(results.len());
    for result in results {
        let key: Vec<String> = merge_keys.iter().map(|f| f.value_of_result(result)).collect();
        by_key.entry(key).or_insert(result);
    }

    original
        .iter()
        .map(|obs| MergedRow {
            observation: obs.clone(),
            result: by_key.get(&composite_key(obs, merge_keys)).map(|r| (*r).clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::AnomalyFlag;

    fn key(account: &str) -> GroupKey {
        GroupKey::new("c1", account, "au1", "usd", "p1")
    }

    fn obs(account: &str, date: i32, value: f64) -> Observation {
        Observation::new(key(account), date, value)
    }

    fn result_for(o: &Observation, comment: &str) -> ClassificationResult {
        ClassificationResult::for_observation(
            o,
            comment.to_string(),
            AnomalyFlag::No,
            "No action needed".to_string(),
        )
    }

    #[test]
    fn test_merge_key_column_names() {
        let names: Vec<&str> = MERGE_KEYS.iter().map(|f| f.column_name()).collect();
        assert_eq!(
            names,
            vec!["company", "account", "au", "currency", "primary account", "as of date"]
        );
    }

    #[test]
    fn test_group_cohort_exact_match() {
        let history = vec![obs("a1", 1, 10.0), obs("a2", 1, 20.0), obs("a1", 2, 30.0)];
        let cohort = group_cohort(&history, &key("a1"));
        assert_eq!(cohort.len(), 2);
        assert!(cohort.iter().all(|o| o.key.account == "a1"));

        // No case folding or trimming at this layer
        assert!(group_cohort(&history, &key("A1")).is_empty());
        assert!(group_cohort(&history, &key(" a1")).is_empty());
    }

    #[test]
    fn test_group_cohort_by_subset_of_fields() {
        let mut other_company = obs("a1", 1, 5.0);
        other_company.key.company = "c2".to_string();
        let history = vec![obs("a1", 1, 10.0), other_company];
        let target = obs("a1", 9, 0.0);

        assert_eq!(group_cohort_by(&history, &target, &GROUP_FIELDS).len(), 1);
        assert_eq!(group_cohort_by(&history, &target, &[KeyField::Account]).len(), 2);
    }

    #[test]
    fn test_combined_series_new_first_then_newest_history() {
        let history = vec![obs("a1", 10, 100.0), obs("a1", 11, 200.0), obs("a1", 12, 300.0)];
        let cohort = group_cohort(&history, &key("a1"));
        let new = obs("a1", 13, 400.0);
        assert_eq!(combined_series(&new, &cohort), vec![400.0, 300.0, 200.0, 100.0]);
    }

    #[test]
    fn test_combined_series_length_is_cohort_plus_one() {
        let history = vec![obs("a1", 3, 7.0), obs("a1", 1, 7.0), obs("a1", 2, 9.0)];
        let cohort = group_cohort(&history, &key("a1"));
        let new = obs("a1", 4, 1.0);
        assert_eq!(combined_series(&new, &cohort).len(), cohort.len() + 1);
    }

    #[test]
    fn test_combined_series_drops_duplicate_rows() {
        let new = obs("a1", 5, 42.0);
        let history = vec![obs("a1", 4, 10.0), new.clone(), obs("a1", 4, 10.0)];
        let cohort = group_cohort(&history, &key("a1"));
        assert_eq!(combined_series(&new, &cohort), vec![42.0, 10.0]);
    }

    #[test]
    fn test_merge_keeps_every_original_row() {
        let original = vec![obs("a1", 1, 1.0), obs("a2", 1, 2.0), obs("a3", 1, 3.0)];
        let results = vec![
            result_for(&original[0], "first"),
            result_for(&original[0], "duplicate"),
            result_for(&obs("zz", 1, 0.0), "orphan"),
            result_for(&original[2], "third"),
        ];

        let merged = merge_results(&original, &results, &MERGE_KEYS);
        assert_eq!(merged.len(), original.len());
        assert_eq!(merged[0].result.as_ref().unwrap().comment, "first");
        assert!(merged[1].result.is_none());
        assert_eq!(merged[2].result.as_ref().unwrap().comment, "third");
        assert_eq!(merged[1].observation, original[1]);
    }

    #[test]
    fn test_merge_requires_date_match() {
        let original = vec![obs("a1", 1, 1.0)];
        let results = vec![result_for(&obs("a1", 2, 1.0), "other day")];
        let merged = merge_results(&original, &results, &MERGE_KEYS);
        assert!(merged[0].result.is_none());

        // Without the date in the join key, the same result matches.
        let merged = merge_results(&original, &results, &GROUP_FIELDS);
        assert!(merged[0].result.is_some());
    }
}
