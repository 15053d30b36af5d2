/*!
A network is a configured upstream repository: institution, OAI endpoint
and the rule sets applied to its harvested records.
*/

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rules::{TransformerRule, ValidatorRule};

/// Network property enabling per-occurrence diagnostics in the stat store.
pub const PROPERTY_DETAILED_DIAGNOSE: &str = "DETAILED_DIAGNOSE";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
/// Configuration of one harvested network.
pub struct NetworkInfo {
    /// Unique acronym, used as the directory name in the snapshot layout.
    pub acronym: String,
    /// Display name of the network.
    #[serde(default)]
    pub name: String,
    /// Name of the institution running the repository.
    #[serde(default)]
    pub institution_name: String,
    /// Acronym of the institution running the repository.
    #[serde(default)]
    pub institution_acronym: String,
    /// OAI metadata prefix requested during harvest.
    #[serde(default)]
    pub metadata_prefix: String,
    /// Schema name of the harvested metadata store documents.
    #[serde(default)]
    pub metadata_store_schema: String,
    /// Base URL of the harvested OAI endpoint.
    #[serde(default)]
    pub origin_url: String,
    /// Free-form attributes, read by provenance transformer rules.
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
    /// Boolean properties such as `DETAILED_DIAGNOSE`.
    #[serde(default)]
    pub properties: HashMap<String, bool>,
    /// OAI sets harvested for this network, in configuration order.
    #[serde(default)]
    pub sets: Vec<String>,
    /// Validator rules, in configuration order.
    #[serde(default)]
    pub validator: Option<Vec<ValidatorRule>>,
    /// Primary transformer rules.
    #[serde(default)]
    pub transformer: Option<Vec<TransformerRule>>,
    /// Secondary transformer rules, applied after the primary set.
    #[serde(default)]
    pub secondary_transformer: Option<Vec<TransformerRule>>,
}

impl NetworkInfo {
    /// A network with the given acronym and no rules.
    pub fn new(acronym: impl Into<String>) -> Self {
        NetworkInfo {
            acronym: acronym.into(),
            ..Default::default()
        }
    }

    /// Value of a boolean property, false when unset.
    pub fn property(&self, name: &str) -> bool {
        self.properties.get(name).copied().unwrap_or(false)
    }

    /// A free-form attribute as a string, if present.
    pub fn attribute(&self, name: &str) -> Option<String> {
        self.attributes.get(name).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// True when per-occurrence diagnostics should be stored.
    pub fn detailed_diagnose(&self) -> bool {
        self.property(PROPERTY_DETAILED_DIAGNOSE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_network() {
        let data = r#"{"acronym": "TEST"}"#;
        let network: NetworkInfo = serde_json::from_str(data).unwrap();
        assert_eq!(network.acronym, "TEST");
        assert!(network.validator.is_none());
        assert!(!network.detailed_diagnose());
    }

    #[test]
    fn test_properties_and_attributes() {
        let data = r#"
            {
                "acronym": "TEST",
                "properties": {"DETAILED_DIAGNOSE": true},
                "attributes": {"repository_url": "https://repo.test", "opendoar_id": 42}
            }
        "#;
        let network: NetworkInfo = serde_json::from_str(data).unwrap();
        assert!(network.detailed_diagnose());
        assert_eq!(
            network.attribute("repository_url").as_deref(),
            Some("https://repo.test")
        );
        assert_eq!(network.attribute("opendoar_id").as_deref(), Some("42"));
        assert_eq!(network.attribute("missing"), None);
    }
}
