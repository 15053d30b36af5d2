/*!
Snapshot metadata and the snapshot status state machine.

A snapshot is a frozen point-in-time copy of one network's records,
identified by a numeric id. Its metadata lives in the external snapshot
catalog and is read through [crate::catalog::SnapshotStore]; the worker
only updates counters and status through that trait.
*/

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::network::NetworkInfo;
use crate::model::validation::Quantifier;
use crate::rules::ValidatorRule;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// States a snapshot moves through from harvest to index.
pub enum SnapshotStatus {
    /// Created but not yet harvesting.
    #[default]
    Initialized,
    /// Harvest in progress.
    Harvesting,
    /// Harvest retrying after a transient failure.
    Retrying,
    /// Harvest finished with errors.
    HarvestingFinishedError,
    /// Harvest finished and the snapshot is ready for validation.
    HarvestingFinishedValid,
    /// Harvest stopped by an operator.
    HarvestingStopped,
    /// Indexing in progress.
    Indexing,
    /// Indexing finished with errors.
    IndexingFinishedError,
    /// Indexing finished successfully.
    IndexingFinishedValid,
    /// Validated and ready to be indexed.
    Valid,
    /// State could not be determined.
    Unknown,
    /// Incremental harvest found no new records.
    EmptyIncremental,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
/// Summary of one validator rule, frozen into the snapshot metadata when
/// validation data is initialized. The stat store derives its per-rule
/// columns from these, so the key set is immutable for the lifetime of the
/// snapshot's validation data.
pub struct RuleDef {
    /// Id of the rule.
    pub rule_id: u64,
    /// Class discriminator of the rule variant.
    pub class: String,
    /// Whether a failure invalidates the whole record.
    pub mandatory: bool,
    /// The rule's quantifier.
    pub quantifier: Quantifier,
    /// Whether per-occurrence values are kept in detailed-diagnose mode.
    pub store_occurrences: bool,
}

impl RuleDef {
    /// The definition summary of a configured validator rule.
    pub fn from_rule(rule: &ValidatorRule) -> Self {
        RuleDef {
            rule_id: rule.rule_id,
            class: rule.kind.class_name().to_owned(),
            mandatory: rule.mandatory,
            quantifier: rule.quantifier,
            store_occurrences: rule.store_occurrences,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Catalog metadata for one snapshot.
pub struct SnapshotMetadata {
    /// Numeric snapshot id, unique across the catalog.
    pub snapshot_id: u64,
    /// The network this snapshot belongs to.
    pub network: NetworkInfo,
    /// Number of harvested records.
    #[serde(default)]
    pub size: u64,
    /// Current state of the snapshot.
    #[serde(default)]
    pub status: SnapshotStatus,
    /// Number of records that passed validation.
    #[serde(default)]
    pub valid_size: u64,
    /// Number of records changed by transformation.
    #[serde(default)]
    pub transformed_size: u64,
    /// Validator rule definitions keyed by rule id, fixed at validation
    /// initialize time.
    #[serde(default)]
    pub rule_definitions: BTreeMap<u64, RuleDef>,
}

impl SnapshotMetadata {
    /// Metadata for a fresh snapshot of the given network. The rule
    /// definitions are frozen from the network's validator configuration.
    pub fn new(snapshot_id: u64, network: NetworkInfo) -> Self {
        let rule_definitions = network
            .validator
            .iter()
            .flatten()
            .map(|rule| (rule.rule_id, RuleDef::from_rule(rule)))
            .collect();
        SnapshotMetadata {
            snapshot_id,
            network,
            size: 0,
            status: SnapshotStatus::default(),
            valid_size: 0,
            transformed_size: 0,
            rule_definitions,
        }
    }

    /// True when per-occurrence diagnostics should be stored for this
    /// snapshot's network.
    pub fn detailed_diagnose(&self) -> bool {
        self.network.detailed_diagnose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&SnapshotStatus::HarvestingFinishedValid).unwrap();
        assert_eq!(json, r#""HARVESTING_FINISHED_VALID""#);
        let status: SnapshotStatus = serde_json::from_str(r#""EMPTY_INCREMENTAL""#).unwrap();
        assert_eq!(status, SnapshotStatus::EmptyIncremental);
    }

    #[test]
    fn test_rule_definitions_frozen_from_validator() {
        let network: NetworkInfo = serde_json::from_str(
            r#"
            {
                "acronym": "TEST",
                "validator": [
                    {
                        "@class": "validator.field.regex",
                        "rule-id": 7,
                        "mandatory": true,
                        "quantifier": "ONE_OR_MORE",
                        "store-occurrences": true,
                        "field-name": "dc.title.none",
                        "pattern": "^Hello$"
                    }
                ]
            }
        "#,
        )
        .unwrap();
        let metadata = SnapshotMetadata::new(1, network);
        let def = metadata.rule_definitions.get(&7).unwrap();
        assert_eq!(def.class, "validator.field.regex");
        assert!(def.mandatory);
        assert!(def.store_occurrences);
    }
}
