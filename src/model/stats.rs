/*!
Precomputed validation statistics for one snapshot.

The accumulator is kept in memory by the stat store while observations
stream in, then serialized to a per-snapshot JSON summary at finalize.
The same shape is returned by filtered stat queries recomputed from the
backing table, so the two paths stay comparable.
*/

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::validation::RecordValidation;

/// Facet over the record-level validity flag.
pub const FACET_RECORD_IS_VALID: &str = "record_is_valid";
/// Facet over the record-level transformed flag.
pub const FACET_RECORD_IS_TRANSFORMED: &str = "record_is_transformed";
/// Facet counting, per rule id, the records the rule passed on.
pub const FACET_VALID_RULES: &str = "valid_rules";
/// Facet counting, per rule id, the records the rule failed on.
pub const FACET_INVALID_RULES: &str = "invalid_rules";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
/// Valid/invalid record counts for one rule.
pub struct RuleCounters {
    /// Records the rule passed on.
    pub valid: u64,
    /// Records the rule failed on.
    pub invalid: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
/// Aggregate validation statistics for one snapshot.
pub struct SnapshotValidationStats {
    /// Number of records observed.
    pub total_records: u64,
    /// Records whose mandatory rules all passed.
    pub valid_records: u64,
    /// Records changed by transformation.
    pub transformed_records: u64,
    /// Per-rule counters keyed by rule id.
    pub rule_stats: BTreeMap<u64, RuleCounters>,
    /// Facet name to value to count.
    pub facets: BTreeMap<String, BTreeMap<String, u64>>,
}

impl SnapshotValidationStats {
    /// A zero-valued accumulator.
    pub fn new() -> Self {
        SnapshotValidationStats::default()
    }

    /// Fold one observation into the accumulator.
    pub fn observe(&mut self, validation: &RecordValidation) {
        self.total_records += 1;
        if validation.record_is_valid {
            self.valid_records += 1;
        }
        if validation.is_transformed {
            self.transformed_records += 1;
        }
        self.bump_facet(
            FACET_RECORD_IS_VALID,
            &validation.record_is_valid.to_string(),
        );
        self.bump_facet(
            FACET_RECORD_IS_TRANSFORMED,
            &validation.is_transformed.to_string(),
        );
        for fact in &validation.rule_facts {
            let counters = self.rule_stats.entry(fact.rule_id).or_default();
            if fact.is_valid {
                counters.valid += 1;
                self.bump_facet(FACET_VALID_RULES, &fact.rule_id.to_string());
            } else {
                counters.invalid += 1;
                self.bump_facet(FACET_INVALID_RULES, &fact.rule_id.to_string());
            }
        }
    }

    fn bump_facet(&mut self, facet: &str, value: &str) {
        *self
            .facets
            .entry(facet.to_owned())
            .or_default()
            .entry(value.to_owned())
            .or_insert(0) += 1;
    }

    /// Sum of all values of a facet, zero when the facet is absent.
    pub fn facet_total(&self, facet: &str) -> u64 {
        self.facets
            .get(facet)
            .map(|values| values.values().sum())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::validation::RuleFact;
    use chrono::Utc;
    use proptest::prelude::*;

    fn validation(valid: bool, transformed: bool, facts: Vec<(u64, bool)>) -> RecordValidation {
        RecordValidation {
            identifier_hash: crate::util::md5_hex("oai:test:1"),
            identifier: "oai:test:1".to_owned(),
            datestamp: Utc::now(),
            record_is_valid: valid,
            is_transformed: transformed,
            published_metadata_hash: String::new(),
            rule_facts: facts
                .into_iter()
                .map(|(rule_id, is_valid)| RuleFact {
                    rule_id,
                    is_valid,
                    valid_occurrences: vec![],
                    invalid_occurrences: vec![],
                })
                .collect(),
        }
    }

    #[test]
    fn test_observe_counts() {
        let mut stats = SnapshotValidationStats::new();
        stats.observe(&validation(true, false, vec![(1, true), (2, false)]));
        stats.observe(&validation(false, true, vec![(1, false), (2, false)]));

        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.valid_records, 1);
        assert_eq!(stats.transformed_records, 1);
        assert_eq!(stats.rule_stats[&1].valid, 1);
        assert_eq!(stats.rule_stats[&1].invalid, 1);
        assert_eq!(stats.rule_stats[&2].invalid, 2);
        assert_eq!(stats.facets[FACET_RECORD_IS_VALID]["true"], 1);
        assert_eq!(stats.facets[FACET_RECORD_IS_VALID]["false"], 1);
        assert_eq!(stats.facets[FACET_INVALID_RULES]["2"], 2);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut stats = SnapshotValidationStats::new();
        stats.observe(&validation(true, true, vec![(9, true)]));
        let json = serde_json::to_string(&stats).unwrap();
        let back: SnapshotValidationStats = serde_json::from_str(&json).unwrap();
        assert_eq!(stats, back);
    }

    proptest! {
        // Record-level facets always sum to the observation count, and
        // rule-membership facets never exceed records times rules.
        #[test]
        fn test_facet_coherence(records in proptest::collection::vec(
            (any::<bool>(), any::<bool>(), proptest::collection::vec(any::<bool>(), 0..4)),
            0..20,
        )) {
            let mut stats = SnapshotValidationStats::new();
            let mut max_rules = 0;
            for (valid, transformed, rule_verdicts) in &records {
                max_rules = max_rules.max(rule_verdicts.len() as u64);
                let facts = rule_verdicts
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (i as u64, *v))
                    .collect();
                stats.observe(&validation(*valid, *transformed, facts));
            }
            prop_assert_eq!(stats.facet_total(FACET_RECORD_IS_VALID), stats.total_records);
            prop_assert_eq!(stats.facet_total(FACET_RECORD_IS_TRANSFORMED), stats.total_records);
            let rule_total = stats.facet_total(FACET_VALID_RULES)
                + stats.facet_total(FACET_INVALID_RULES);
            prop_assert!(rule_total <= stats.total_records * max_rules.max(1));
        }
    }
}
