/*!
Validator rules and their evaluation.

A [ValidatorRule] is the persisted configuration: an envelope with the
fields every rule shares plus a tagged [ValidatorKind]. A [Validator] is
the compiled form applied to records: patterns compiled, controlled-value
lists loaded, expressions parsed. Compilation never fails the whole
validator; a rule that cannot be compiled evaluates as invalid with the
failure message as its received value, so the pipeline keeps making
progress and the diagnostics surface in the stat store.
*/

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::OaiError;
use crate::metadata::{FieldPath, RecordMetadata};
use crate::model::validation::{
    ContentValidatorResult, Quantifier, ValidatorResult, ValidatorRuleResult,
};
use crate::rules::expression::Expression;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "@class")]
/// The concrete validator variants.
pub enum ValidatorKind {
    /// Each occurrence of a field must match a regex.
    #[serde(rename = "validator.field.regex", rename_all = "kebab-case")]
    RegexField {
        /// Dotted path of the validated field.
        field_name: String,
        /// The pattern each occurrence is tested against.
        pattern: String,
    },
    /// Each occurrence of a field must belong to a configured list.
    #[serde(rename = "validator.field.controlled-value", rename_all = "kebab-case")]
    ControlledValueField {
        /// Dotted path of the validated field.
        field_name: String,
        /// The allowed values.
        controlled_values: Vec<String>,
    },
    /// Like the controlled-value rule, with the list loaded from CSV
    /// content or an external UTF-8 file, one value per line.
    #[serde(
        rename = "validator.field.controlled-value-large",
        rename_all = "kebab-case"
    )]
    LargeControlledValueField {
        /// Dotted path of the validated field.
        field_name: String,
        /// Inline CSV content, one value per line.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        controlled_values_csv: Option<String>,
        /// Path of a UTF-8 file with one value per line.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        controlled_values_file: Option<String>,
    },
    /// A boolean expression over metadata fields.
    #[serde(rename = "validator.field.expression", rename_all = "kebab-case")]
    FieldExpression {
        /// The expression source, see [crate::rules::expression].
        field_expression: String,
    },
}

impl ValidatorKind {
    /// The `@class` discriminator of this variant.
    pub fn class_name(&self) -> &'static str {
        match self {
            ValidatorKind::RegexField { .. } => "validator.field.regex",
            ValidatorKind::ControlledValueField { .. } => "validator.field.controlled-value",
            ValidatorKind::LargeControlledValueField { .. } => {
                "validator.field.controlled-value-large"
            }
            ValidatorKind::FieldExpression { .. } => "validator.field.expression",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
/// One configured validator rule.
pub struct ValidatorRule {
    /// Id of the rule, also the name of its stat-store column.
    pub rule_id: u64,
    /// Whether a failure invalidates the whole record.
    #[serde(default)]
    pub mandatory: bool,
    /// How many occurrences must satisfy the predicate.
    #[serde(default)]
    pub quantifier: Quantifier,
    /// Whether per-occurrence values are kept in detailed-diagnose mode.
    #[serde(default)]
    pub store_occurrences: bool,
    /// The concrete variant.
    #[serde(flatten)]
    pub kind: ValidatorKind,
}

/// Per-occurrence predicate of a compiled field-content rule.
enum Predicate {
    Regex(Regex),
    Controlled(HashSet<String>),
}

impl Predicate {
    fn test(&self, value: &str) -> bool {
        match self {
            Predicate::Regex(regex) => regex.is_match(value),
            Predicate::Controlled(values) => values.contains(value),
        }
    }
}

/// Compiled evaluator for one rule.
enum Evaluator {
    Content { path: FieldPath, predicate: Predicate },
    Expression(Expression),
    /// The rule could not be compiled; always evaluates invalid with the
    /// failure message as received value.
    Broken(String),
}

struct CompiledRule {
    rule: ValidatorRule,
    evaluator: Evaluator,
}

impl CompiledRule {
    fn evaluate(&self, metadata: &RecordMetadata) -> ValidatorRuleResult {
        let (valid, results) = match &self.evaluator {
            Evaluator::Content { path, predicate } => {
                let occurrences = metadata.field_occurrences(path);
                if occurrences.is_empty() {
                    (
                        self.rule.quantifier.evaluate(0, 0),
                        vec![ContentValidatorResult::no_occurrences()],
                    )
                } else {
                    let results: Vec<ContentValidatorResult> = occurrences
                        .iter()
                        .map(|value| ContentValidatorResult::new(predicate.test(value), value))
                        .collect();
                    let valid_count = results.iter().filter(|result| result.valid).count();
                    (
                        self.rule.quantifier.evaluate(valid_count, results.len()),
                        results,
                    )
                }
            }
            Evaluator::Expression(expression) => {
                let valid = expression.evaluate(metadata, self.rule.quantifier);
                (
                    valid,
                    vec![ContentValidatorResult::new(valid, expression.source())],
                )
            }
            Evaluator::Broken(message) => {
                warn!(
                    rule_id = self.rule.rule_id,
                    message, "broken validator rule evaluated"
                );
                (false, vec![ContentValidatorResult::new(false, message)])
            }
        };
        ValidatorRuleResult {
            rule_id: self.rule.rule_id,
            valid,
            results,
        }
    }
}

/// Values loaded from CSV content: every field of every record counts.
fn controlled_values_from_csv(content: &str) -> Result<HashSet<String>, csv::Error> {
    let mut values = HashSet::new();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());
    for record in reader.records() {
        for field in record?.iter() {
            let field = field.trim();
            if !field.is_empty() {
                values.insert(field.to_owned());
            }
        }
    }
    Ok(values)
}

fn compile(rule: &ValidatorRule) -> Evaluator {
    match &rule.kind {
        ValidatorKind::RegexField {
            field_name,
            pattern,
        } => match Regex::new(pattern) {
            Ok(regex) => Evaluator::Content {
                path: FieldPath::parse(field_name),
                predicate: Predicate::Regex(regex),
            },
            Err(err) => Evaluator::Broken(format!("invalid pattern `{}`: {}", pattern, err)),
        },
        ValidatorKind::ControlledValueField {
            field_name,
            controlled_values,
        } => Evaluator::Content {
            path: FieldPath::parse(field_name),
            predicate: Predicate::Controlled(controlled_values.iter().cloned().collect()),
        },
        ValidatorKind::LargeControlledValueField {
            field_name,
            controlled_values_csv,
            controlled_values_file,
        } => {
            let content = match (controlled_values_csv, controlled_values_file) {
                (Some(csv), _) => Ok(csv.clone()),
                (None, Some(file)) => std::fs::read_to_string(file)
                    .map_err(|err| format!("cannot read `{}`: {}", file, err)),
                (None, None) => Err("no controlled value source configured".to_owned()),
            };
            match content.and_then(|content| {
                controlled_values_from_csv(&content).map_err(|err| err.to_string())
            }) {
                Ok(values) => Evaluator::Content {
                    path: FieldPath::parse(field_name),
                    predicate: Predicate::Controlled(values),
                },
                Err(message) => Evaluator::Broken(message),
            }
        }
        ValidatorKind::FieldExpression { field_expression } => {
            match Expression::parse(field_expression) {
                Ok(expression) => Evaluator::Expression(expression),
                Err(OaiError::Expression(message)) => Evaluator::Broken(message),
                Err(err) => Evaluator::Broken(err.to_string()),
            }
        }
    }
}

/// A compiled, ordered list of validator rules.
pub struct Validator {
    rules: Vec<CompiledRule>,
}

impl Validator {
    /// Compile the configured rules, keeping their order.
    pub fn new(rules: &[ValidatorRule]) -> Self {
        Validator {
            rules: rules
                .iter()
                .map(|rule| CompiledRule {
                    rule: rule.clone(),
                    evaluator: compile(rule),
                })
                .collect(),
        }
    }

    /// Number of compiled rules.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// True when no rules are configured.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The configured rules, in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = &ValidatorRule> {
        self.rules.iter().map(|compiled| &compiled.rule)
    }

    /// Evaluate every rule against the record, filling the reusable
    /// result buffer. The record verdict is the conjunction of the
    /// mandatory rules; non-mandatory failures contribute facts only.
    pub fn validate(&self, metadata: &RecordMetadata, result: &mut ValidatorResult) {
        let mut record_valid = true;
        for compiled in &self.rules {
            let rule_result = compiled.evaluate(metadata);
            if compiled.rule.mandatory && !rule_result.valid {
                record_valid = false;
            }
            result.rules_results.push(rule_result);
        }
        result.valid = record_valid;
    }
}
