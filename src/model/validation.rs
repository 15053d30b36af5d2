/*!
Per-record validation verdicts.

A [ValidatorResult] is the in-memory verdict for one record, reused across
records by the worker loop. A [RecordValidation] is the persisted row shape
kept by the stat store, one [RuleFact] per rule.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Received value recorded when a rule was evaluated against a field with
/// no occurrences.
pub const NO_OCCURRENCES_FOUND: &str = "no_occurrences_found";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Constraint on how many occurrences of a field must satisfy a rule's
/// predicate for the rule to pass.
pub enum Quantifier {
    /// No occurrence may satisfy the predicate.
    ZeroOnly,
    /// Exactly one occurrence must satisfy the predicate.
    OneOnly,
    /// An absent field is tolerated; a present field needs at least one
    /// satisfying occurrence.
    ZeroOrMore,
    /// At least one occurrence must satisfy the predicate.
    #[default]
    OneOrMore,
    /// Every occurrence must satisfy the predicate.
    All,
}

impl Quantifier {
    /// Collapse per-occurrence outcomes into a rule verdict.
    ///
    /// `valid_count` is the number of occurrences that satisfied the
    /// predicate, `occurrence_count` the number of occurrences processed.
    /// A field with zero occurrences still fails `ZERO_OR_MORE` once a
    /// synthetic invalid entry was processed for it, so the zero case is
    /// keyed on `occurrence_count` alone.
    pub fn evaluate(&self, valid_count: usize, occurrence_count: usize) -> bool {
        match self {
            Quantifier::ZeroOnly => valid_count == 0,
            Quantifier::OneOnly => valid_count == 1,
            Quantifier::ZeroOrMore => occurrence_count == 0 || valid_count >= 1,
            Quantifier::OneOrMore => valid_count >= 1,
            Quantifier::All => valid_count == occurrence_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
/// One occurrence's verdict under a rule's predicate.
pub struct ContentValidatorResult {
    /// Whether the occurrence satisfied the predicate.
    pub valid: bool,
    /// The occurrence value, truncated for diagnostics.
    pub received_value: String,
}

impl ContentValidatorResult {
    /// A verdict for the given occurrence value, truncating long values.
    pub fn new(valid: bool, received_value: &str) -> Self {
        ContentValidatorResult {
            valid,
            received_value: crate::util::truncate_received_value(received_value),
        }
    }

    /// The synthetic verdict recorded when the field has no occurrences.
    pub fn no_occurrences() -> Self {
        ContentValidatorResult {
            valid: false,
            received_value: NO_OCCURRENCES_FOUND.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
/// Verdict of one rule over one record, with per-occurrence detail.
pub struct ValidatorRuleResult {
    /// Id of the evaluated rule.
    pub rule_id: u64,
    /// The rule verdict after quantifier collapse.
    pub valid: bool,
    /// Per-occurrence outcomes, in document order.
    pub results: Vec<ContentValidatorResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Reusable per-record verdict buffer owned by the worker loop.
pub struct ValidatorResult {
    /// Conjunction of all mandatory rule verdicts.
    pub valid: bool,
    /// Whether any transformer changed the record.
    pub transformed: bool,
    /// Hash of the record XML as published.
    pub metadata_hash: String,
    /// One entry per rule, in configuration order.
    pub rules_results: Vec<ValidatorRuleResult>,
}

impl ValidatorResult {
    /// A cleared result buffer.
    pub fn new() -> Self {
        ValidatorResult::default()
    }

    /// Clear all fields so the buffer can be reused for the next record.
    pub fn reset(&mut self) {
        self.valid = false;
        self.transformed = false;
        self.metadata_hash.clear();
        self.rules_results.clear();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
/// The persisted result of one rule applied to one record.
pub struct RuleFact {
    /// Id of the rule.
    pub rule_id: u64,
    /// The rule verdict.
    pub is_valid: bool,
    /// Occurrence values that satisfied the predicate. Populated only in
    /// detailed-diagnose mode for rules that store occurrences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub valid_occurrences: Vec<String>,
    /// Occurrence values that failed the predicate, same gating.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invalid_occurrences: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
/// Persisted validation row for one record within a snapshot.
pub struct RecordValidation {
    /// MD5 of the identifier, primary key within the snapshot.
    pub identifier_hash: String,
    /// Repository-assigned OAI identifier.
    pub identifier: String,
    /// Record datestamp at validation time.
    pub datestamp: DateTime<Utc>,
    /// Conjunction of all mandatory rule verdicts.
    pub record_is_valid: bool,
    /// Whether any transformer changed the record.
    pub is_transformed: bool,
    /// Hash of the published record XML.
    pub published_metadata_hash: String,
    /// One fact per rule, in configuration order.
    pub rule_facts: Vec<RuleFact>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_quantifier_zero_occurrences() {
        assert!(Quantifier::ZeroOrMore.evaluate(0, 0));
        assert!(Quantifier::ZeroOnly.evaluate(0, 0));
        assert!(Quantifier::All.evaluate(0, 0));
        assert!(!Quantifier::OneOrMore.evaluate(0, 0));
        assert!(!Quantifier::OneOnly.evaluate(0, 0));
    }

    #[test]
    fn test_quantifier_present_but_invalid() {
        // A present field with only invalid occurrences fails ZERO_OR_MORE.
        assert!(!Quantifier::ZeroOrMore.evaluate(0, 2));
        assert!(Quantifier::ZeroOrMore.evaluate(1, 2));
    }

    #[test]
    fn test_quantifier_serde_names() {
        let json = serde_json::to_string(&Quantifier::OneOrMore).unwrap();
        assert_eq!(json, r#""ONE_OR_MORE""#);
        let q: Quantifier = serde_json::from_str(r#""ZERO_ONLY""#).unwrap();
        assert_eq!(q, Quantifier::ZeroOnly);
    }

    #[test]
    fn test_received_value_truncation() {
        let long = "a".repeat(200);
        let result = ContentValidatorResult::new(true, &long);
        assert_eq!(result.received_value.len(), 103);
        assert!(result.received_value.ends_with("..."));
    }

    #[test]
    fn test_reset_clears_all_fields() {
        let mut result = ValidatorResult::new();
        result.valid = true;
        result.transformed = true;
        result.metadata_hash = "abc".to_owned();
        result.rules_results.push(ValidatorRuleResult {
            rule_id: 1,
            valid: true,
            results: vec![],
        });
        result.reset();
        assert_eq!(result, ValidatorResult::new());
    }

    fn quantifier_strategy() -> impl Strategy<Value = Quantifier> {
        prop_oneof![
            Just(Quantifier::ZeroOnly),
            Just(Quantifier::OneOnly),
            Just(Quantifier::ZeroOrMore),
            Just(Quantifier::OneOrMore),
            Just(Quantifier::All),
        ]
    }

    proptest! {
        #[test]
        fn test_quantifier_table(q in quantifier_strategy(),
            valid in 0usize..20, extra in 0usize..20) {
            let total = valid + extra;
            let expected = match q {
                Quantifier::ZeroOnly => valid == 0,
                Quantifier::OneOnly => valid == 1,
                Quantifier::ZeroOrMore => total == 0 || valid >= 1,
                Quantifier::OneOrMore => valid >= 1,
                Quantifier::All => valid == total,
            };
            prop_assert_eq!(q.evaluate(valid, total), expected);
        }
    }
}
