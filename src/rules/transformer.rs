/*!
Transformer rules and their application.

A [TransformerRule] is the persisted configuration: the shared envelope
plus a tagged [TransformerKind]. A [Transformer] is the compiled ordered
list applied to records. Unlike the validator side, compilation and
application are strict: transformations are structural, so a failing rule
aborts the record with [OaiError::Transform] instead of being recorded as
a diagnostic.
*/

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OaiError, Result};
use crate::metadata::{FieldPath, RecordMetadata};
use crate::model::{HarvestedRecord, NetworkInfo, Quantifier};
use crate::rules::expression::Expression;

/// Safety cap on occurrences moved by one name-translation pass.
const MAX_TRANSLATED_OCCURRENCES: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
/// A search/replace pair used by the bulk and priority translations.
pub struct Translation {
    /// Value (or field name) looked for.
    pub search: String,
    /// Value (or field name) written on a match.
    pub replace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
/// Target field names injected by the provenance transformer. The values
/// come from the network configuration and the record; only the names are
/// configurable, owned by the rule instance.
pub struct ProvenanceFields {
    /// Repository type, from the `repository_type` attribute.
    pub repository_type: String,
    /// Repository URL, from the `repository_url` attribute.
    pub repository_url: String,
    /// Institution type, from the `institution_type` attribute.
    pub institution_type: String,
    /// Institution URL, from the `institution_url` attribute.
    pub institution_url: String,
    /// Harvested OAI endpoint of the network.
    pub base_url: String,
    /// Contact mail, from the `mail` attribute.
    pub mail: String,
    /// Country, from the `country` attribute.
    pub country: String,
    /// DOI prefix, from the `doi` attribute.
    pub doi: String,
    /// ISSN, from the `issn` attribute.
    pub issn: String,
    /// Linking ISSN, from the `issn_l` attribute.
    pub issn_l: String,
    /// The record's own OAI identifier.
    pub identifier: String,
    /// OpenDOAR id of the repository, written with an `opendoar:` prefix.
    pub repository_id: String,
    /// Datestamp of the harvested record.
    pub harvest_date: String,
    /// Display name of the network.
    pub name: String,
}

impl Default for ProvenanceFields {
    fn default() -> Self {
        ProvenanceFields {
            repository_type: "repository:repositoryType".to_owned(),
            repository_url: "repository:repositoryURL".to_owned(),
            institution_type: "repository:institutionType".to_owned(),
            institution_url: "repository:institutionURL".to_owned(),
            base_url: "repository:baseURL".to_owned(),
            mail: "repository:mail".to_owned(),
            country: "repository:country".to_owned(),
            doi: "repository:DOI".to_owned(),
            issn: "repository:ISSN".to_owned(),
            issn_l: "repository:ISSN_L".to_owned(),
            identifier: "others:identifier".to_owned(),
            repository_id: "repository:repositoryID".to_owned(),
            harvest_date: "repository:harvestDate".to_owned(),
            name: "repository:name".to_owned(),
        }
    }
}

fn default_repo_name_field() -> String {
    "repository:name".to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "@class")]
/// The concrete transformer variants.
pub enum TransformerKind {
    /// Append a fixed value to a field. Always reports a change.
    #[serde(rename = "transformer.field.add", rename_all = "kebab-case")]
    FieldAdd {
        /// Dotted path the value is appended to.
        target_field_name: String,
        /// The appended value.
        value: String,
    },
    /// Move every occurrence of one field under another field name.
    #[serde(rename = "transformer.field.name-translate", rename_all = "kebab-case")]
    FieldNameTranslate {
        /// Dotted path the occurrences are moved from.
        source_field_name: String,
        /// Dotted path the occurrences are moved to.
        target_field_name: String,
    },
    /// [TransformerKind::FieldNameTranslate] applied sequentially across
    /// an ordered list of search/replace field names.
    #[serde(
        rename = "transformer.field.name-bulk-translate",
        rename_all = "kebab-case"
    )]
    FieldNameBulkTranslate {
        /// Field-name pairs, applied in order.
        translations: Vec<Translation>,
    },
    /// Remove invalid and/or duplicated occurrences of a field.
    #[serde(rename = "transformer.field.content-normalize", rename_all = "kebab-case")]
    FieldContentNormalize {
        /// Dotted path of the normalized field.
        field_name: String,
        /// Occurrences not matching this pattern are invalid.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
        /// Drop occurrences failing the pattern.
        #[serde(default)]
        remove_invalid_occurrences: bool,
        /// Drop subsequent equal occurrences, keeping the first.
        #[serde(default)]
        remove_duplicated_occurrences: bool,
    },
    /// Translate field content by priority: the first matching
    /// translation wins.
    #[serde(
        rename = "transformer.field.content-priority-translate",
        rename_all = "kebab-case"
    )]
    FieldContentPriorityTranslate {
        /// Dotted path whose occurrences are tested.
        test_field_name: String,
        /// Dotted path the replacement is written under.
        write_field_name: String,
        /// Translations in priority order.
        translations: Vec<Translation>,
        /// Remove the matched source occurrence.
        #[serde(default)]
        replace_occurrence: bool,
        /// Match when the occurrence starts with the search value instead
        /// of exact equality.
        #[serde(default)]
        test_value_as_prefix: bool,
        /// Keep scanning after the first match.
        #[serde(default)]
        replace_all_matching_occurrences: bool,
    },
    /// Add a value to a field when a boolean expression holds.
    #[serde(
        rename = "transformer.field.content-conditional-add",
        rename_all = "kebab-case"
    )]
    FieldContentConditionalAddOccr {
        /// Dotted path the value is appended to.
        field_name: String,
        /// The appended value.
        value_to_add: String,
        /// Expression gating the addition, see [crate::rules::expression].
        conditional_expression: String,
        /// De-duplicate the field afterwards.
        #[serde(default)]
        remove_duplicated_occurrences: bool,
    },
    /// Strip all whitespace characters from each occurrence.
    #[serde(
        rename = "transformer.field.content-remove-whitespaces",
        rename_all = "kebab-case"
    )]
    FieldContentRemoveWhitespaces {
        /// Dotted path of the stripped field.
        field_name: String,
    },
    /// Keep only the first occurrence of a field.
    #[serde(
        rename = "transformer.field.remove-all-but-first",
        rename_all = "kebab-case"
    )]
    RemoveAllButFirstOccr {
        /// Dotted path of the pruned field.
        field_name: String,
    },
    /// Remove subsequent equal occurrences, keeping the first.
    #[serde(rename = "transformer.field.remove-duplicates", rename_all = "kebab-case")]
    RemoveDuplicateOccrs {
        /// Dotted path of the de-duplicated field.
        field_name: String,
    },
    /// Among occurrences found in an ordered vocabulary, keep the one
    /// with the smallest vocabulary index.
    #[serde(
        rename = "transformer.field.remove-duplicate-vocabulary",
        rename_all = "kebab-case"
    )]
    RemoveDuplicateVocabularyOccrs {
        /// Dotted path of the pruned field.
        field_name: String,
        /// The vocabulary, best value first.
        vocabulary: Vec<String>,
    },
    /// Drop occurrences whose value appears in a blacklist.
    #[serde(rename = "transformer.field.remove-blacklist", rename_all = "kebab-case")]
    RemoveBlacklistOccrs {
        /// Dotted path of the filtered field.
        field_name: String,
        /// Values to drop.
        blacklist: Vec<String>,
    },
    /// Remove all occurrences of each listed field.
    #[serde(rename = "transformer.record.reduce-heavy", rename_all = "kebab-case")]
    ReduceHeavyRecords {
        /// Dotted paths to clear.
        fields_to_remove: Vec<String>,
    },
    /// Rewrite the record identifier with `replaceAll` semantics. Mutates
    /// the record, not the metadata tree.
    #[serde(rename = "transformer.record.identifier-regex", rename_all = "kebab-case")]
    IdentifierRegex {
        /// Pattern searched in the identifier.
        regex_search: String,
        /// Replacement, `$n` group references allowed.
        regex_replace: String,
    },
    /// Inject provenance fields derived from the network configuration.
    #[serde(rename = "transformer.record.add-provenance", rename_all = "kebab-case")]
    AddProvenanceMetadata {
        /// Field names to write; the default set when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fields: Option<ProvenanceFields>,
    },
    /// Inject the repository display name and, when configured, the
    /// institution name and acronym.
    #[serde(rename = "transformer.record.add-repo-name", rename_all = "kebab-case")]
    AddRepoName {
        /// Field the network name is written to.
        #[serde(default = "default_repo_name_field")]
        target_field_name: String,
        /// Field the institution name is written to, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        institution_name_field: Option<String>,
        /// Field the institution acronym is written to, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        institution_acronym_field: Option<String>,
    },
}

impl TransformerKind {
    /// The `@class` discriminator of this variant.
    pub fn class_name(&self) -> &'static str {
        match self {
            TransformerKind::FieldAdd { .. } => "transformer.field.add",
            TransformerKind::FieldNameTranslate { .. } => "transformer.field.name-translate",
            TransformerKind::FieldNameBulkTranslate { .. } => {
                "transformer.field.name-bulk-translate"
            }
            TransformerKind::FieldContentNormalize { .. } => "transformer.field.content-normalize",
            TransformerKind::FieldContentPriorityTranslate { .. } => {
                "transformer.field.content-priority-translate"
            }
            TransformerKind::FieldContentConditionalAddOccr { .. } => {
                "transformer.field.content-conditional-add"
            }
            TransformerKind::FieldContentRemoveWhitespaces { .. } => {
                "transformer.field.content-remove-whitespaces"
            }
            TransformerKind::RemoveAllButFirstOccr { .. } => "transformer.field.remove-all-but-first",
            TransformerKind::RemoveDuplicateOccrs { .. } => "transformer.field.remove-duplicates",
            TransformerKind::RemoveDuplicateVocabularyOccrs { .. } => {
                "transformer.field.remove-duplicate-vocabulary"
            }
            TransformerKind::RemoveBlacklistOccrs { .. } => "transformer.field.remove-blacklist",
            TransformerKind::ReduceHeavyRecords { .. } => "transformer.record.reduce-heavy",
            TransformerKind::IdentifierRegex { .. } => "transformer.record.identifier-regex",
            TransformerKind::AddProvenanceMetadata { .. } => "transformer.record.add-provenance",
            TransformerKind::AddRepoName { .. } => "transformer.record.add-repo-name",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
/// One configured transformer rule.
pub struct TransformerRule {
    /// Id of the rule.
    pub rule_id: u64,
    /// Execution order; lower runs first, ties keep configuration order.
    #[serde(default)]
    pub runorder: i32,
    /// The concrete variant.
    #[serde(flatten)]
    pub kind: TransformerKind,
}

#[derive(Debug)]
struct CompiledRule {
    rule: TransformerRule,
    regex: Option<Regex>,
    expression: Option<Expression>,
}

/// A compiled, ordered list of transformer rules.
#[derive(Debug)]
pub struct Transformer {
    rules: Vec<CompiledRule>,
}

impl Transformer {
    /// Compile the configured rules, sorting by ascending runorder.
    /// Compilation is strict; a bad pattern or expression fails here.
    pub fn new(rules: &[TransformerRule]) -> Result<Self> {
        let mut sorted: Vec<TransformerRule> = rules.to_vec();
        sorted.sort_by_key(|rule| rule.runorder);
        let rules = sorted
            .into_iter()
            .map(|rule| {
                let compiled = CompiledRule::compile(rule.clone());
                compiled.map_err(|message| OaiError::Transform {
                    rule_id: rule.rule_id,
                    class: rule.kind.class_name(),
                    record: "(configuration)".to_owned(),
                    message,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Transformer { rules })
    }

    /// Number of compiled rules.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Apply every rule in order. Returns true when any rule changed the
    /// record or its metadata; the caller decides whether to touch the
    /// record datestamp.
    pub fn transform(
        &self,
        network: &NetworkInfo,
        record: &mut HarvestedRecord,
        metadata: &mut RecordMetadata,
    ) -> Result<bool> {
        let mut changed = false;
        for compiled in &self.rules {
            let rule_changed = compiled
                .apply(network, record, metadata)
                .map_err(|message| OaiError::Transform {
                    rule_id: compiled.rule.rule_id,
                    class: compiled.rule.kind.class_name(),
                    record: record.identifier.clone(),
                    message,
                })?;
            if rule_changed {
                debug!(
                    rule_id = compiled.rule.rule_id,
                    class = compiled.rule.kind.class_name(),
                    record = %record.identifier,
                    "transformer rule changed record"
                );
            }
            changed |= rule_changed;
        }
        Ok(changed)
    }
}

impl CompiledRule {
    fn compile(rule: TransformerRule) -> std::result::Result<Self, String> {
        let mut regex = None;
        let mut expression = None;
        match &rule.kind {
            TransformerKind::IdentifierRegex { regex_search, .. } => {
                regex = Some(
                    Regex::new(regex_search)
                        .map_err(|err| format!("invalid pattern `{}`: {}", regex_search, err))?,
                );
            }
            TransformerKind::FieldContentNormalize {
                pattern: Some(pattern),
                ..
            } => {
                regex = Some(
                    Regex::new(pattern)
                        .map_err(|err| format!("invalid pattern `{}`: {}", pattern, err))?,
                );
            }
            TransformerKind::FieldContentConditionalAddOccr {
                conditional_expression,
                ..
            } => {
                expression =
                    Some(Expression::parse(conditional_expression).map_err(|err| err.to_string())?);
            }
            _ => {}
        }
        Ok(CompiledRule {
            rule,
            regex,
            expression,
        })
    }

    fn apply(
        &self,
        network: &NetworkInfo,
        record: &mut HarvestedRecord,
        metadata: &mut RecordMetadata,
    ) -> std::result::Result<bool, String> {
        match &self.rule.kind {
            TransformerKind::FieldAdd {
                target_field_name,
                value,
            } => {
                metadata.add_field_occurrence(&FieldPath::parse(target_field_name), value.clone());
                Ok(true)
            }
            TransformerKind::FieldNameTranslate {
                source_field_name,
                target_field_name,
            } => Ok(translate_field_name(
                metadata,
                source_field_name,
                target_field_name,
            )),
            TransformerKind::FieldNameBulkTranslate { translations } => {
                let mut changed = false;
                for translation in translations {
                    changed |=
                        translate_field_name(metadata, &translation.search, &translation.replace);
                }
                Ok(changed)
            }
            TransformerKind::FieldContentNormalize {
                field_name,
                remove_invalid_occurrences,
                remove_duplicated_occurrences,
                ..
            } => {
                let path = FieldPath::parse(field_name);
                let mut changed = false;
                if *remove_invalid_occurrences {
                    if let Some(regex) = &self.regex {
                        for node in metadata.field_nodes(&path) {
                            if let Some(value) = metadata.node_value(node) {
                                if !regex.is_match(value) {
                                    metadata.remove_node(node);
                                    changed = true;
                                }
                            }
                        }
                    }
                }
                if *remove_duplicated_occurrences {
                    changed |= remove_duplicates(metadata, &path);
                }
                Ok(changed)
            }
            TransformerKind::FieldContentPriorityTranslate {
                test_field_name,
                write_field_name,
                translations,
                replace_occurrence,
                test_value_as_prefix,
                replace_all_matching_occurrences,
            } => {
                let test_path = FieldPath::parse(test_field_name);
                let write_path = FieldPath::parse(write_field_name);
                let mut match_found = false;
                'translations: for translation in translations {
                    for node in metadata.field_nodes(&test_path) {
                        let value = match metadata.node_value(node) {
                            Some(value) => value,
                            None => continue,
                        };
                        let matched = if *test_value_as_prefix {
                            value.starts_with(&translation.search)
                        } else {
                            value == translation.search
                        };
                        if !matched {
                            continue;
                        }
                        match_found = true;
                        if *replace_occurrence {
                            metadata.remove_node(node);
                        }
                        let existing = metadata.field_occurrences(&write_path);
                        if !existing.iter().any(|value| value == &translation.replace) {
                            metadata
                                .add_field_occurrence(&write_path, translation.replace.clone());
                        }
                        if !*replace_all_matching_occurrences {
                            break 'translations;
                        }
                    }
                }
                Ok(match_found)
            }
            TransformerKind::FieldContentConditionalAddOccr {
                field_name,
                value_to_add,
                remove_duplicated_occurrences,
                ..
            } => {
                let expression = self
                    .expression
                    .as_ref()
                    .ok_or("conditional expression not compiled")?;
                if !expression.evaluate(metadata, Quantifier::OneOrMore) {
                    return Ok(false);
                }
                let path = FieldPath::parse(field_name);
                metadata.add_field_occurrence(&path, value_to_add.clone());
                if *remove_duplicated_occurrences {
                    remove_duplicates(metadata, &path);
                }
                Ok(true)
            }
            TransformerKind::FieldContentRemoveWhitespaces { field_name } => {
                let path = FieldPath::parse(field_name);
                let mut changed = false;
                for node in metadata.field_nodes(&path) {
                    if let Some(value) = metadata.node_value(node) {
                        let stripped: String =
                            value.chars().filter(|c| !c.is_whitespace()).collect();
                        if stripped.len() < value.len() {
                            metadata.set_node_value(node, stripped);
                            changed = true;
                        }
                    }
                }
                Ok(changed)
            }
            TransformerKind::RemoveAllButFirstOccr { field_name } => {
                let nodes = metadata.field_nodes(&FieldPath::parse(field_name));
                let mut changed = false;
                for node in nodes.into_iter().skip(1) {
                    metadata.remove_node(node);
                    changed = true;
                }
                Ok(changed)
            }
            TransformerKind::RemoveDuplicateOccrs { field_name } => {
                Ok(remove_duplicates(metadata, &FieldPath::parse(field_name)))
            }
            TransformerKind::RemoveDuplicateVocabularyOccrs {
                field_name,
                vocabulary,
            } => {
                let index: HashMap<&str, usize> = vocabulary
                    .iter()
                    .enumerate()
                    .map(|(position, value)| (value.as_str(), position))
                    .collect();
                let mut in_vocabulary = Vec::new();
                for node in metadata.field_nodes(&FieldPath::parse(field_name)) {
                    if let Some(position) = metadata
                        .node_value(node)
                        .and_then(|value| index.get(value).copied())
                    {
                        in_vocabulary.push((node, position));
                    }
                }
                if in_vocabulary.len() < 2 {
                    return Ok(false);
                }
                let best = in_vocabulary
                    .iter()
                    .min_by_key(|(_, position)| *position)
                    .map(|(node, _)| *node);
                let mut changed = false;
                for (node, _) in in_vocabulary {
                    if Some(node) != best {
                        metadata.remove_node(node);
                        changed = true;
                    }
                }
                Ok(changed)
            }
            TransformerKind::RemoveBlacklistOccrs {
                field_name,
                blacklist,
            } => {
                let blacklist: HashSet<&str> =
                    blacklist.iter().map(String::as_str).collect();
                let mut changed = false;
                for node in metadata.field_nodes(&FieldPath::parse(field_name)) {
                    if let Some(value) = metadata.node_value(node) {
                        if blacklist.contains(value) {
                            metadata.remove_node(node);
                            changed = true;
                        }
                    }
                }
                Ok(changed)
            }
            TransformerKind::ReduceHeavyRecords { fields_to_remove } => {
                let mut changed = false;
                for field in fields_to_remove {
                    let path = FieldPath::parse(field);
                    if metadata.field_occurrence_count(&path) > 0 {
                        metadata.remove_field_occurrence(&path);
                        changed = true;
                    }
                }
                Ok(changed)
            }
            TransformerKind::IdentifierRegex { regex_replace, .. } => {
                let regex = self.regex.as_ref().ok_or("identifier regex not compiled")?;
                let rewritten = regex
                    .replace_all(&record.identifier, regex_replace.as_str())
                    .into_owned();
                let changed = rewritten != record.identifier;
                record.identifier = rewritten;
                Ok(changed)
            }
            TransformerKind::AddProvenanceMetadata { fields } => {
                let defaults = ProvenanceFields::default();
                let fields = fields.as_ref().unwrap_or(&defaults);
                Ok(add_provenance(network, record, metadata, fields))
            }
            TransformerKind::AddRepoName {
                target_field_name,
                institution_name_field,
                institution_acronym_field,
            } => {
                let mut changed = add_if_present(metadata, target_field_name, &network.name);
                if let Some(field) = institution_name_field {
                    changed |= add_if_present(metadata, field, &network.institution_name);
                }
                if let Some(field) = institution_acronym_field {
                    changed |= add_if_present(metadata, field, &network.institution_acronym);
                }
                Ok(changed)
            }
        }
    }
}

/// Move occurrences from one field name to another, bounded by the
/// safety cap.
fn translate_field_name(metadata: &mut RecordMetadata, source: &str, target: &str) -> bool {
    let source_path = FieldPath::parse(source);
    let target_path = FieldPath::parse(target);
    let mut moved = 0usize;
    for node in metadata.field_nodes(&source_path) {
        if moved >= MAX_TRANSLATED_OCCURRENCES {
            break;
        }
        if let Some(value) = metadata.node_value(node).map(str::to_owned) {
            metadata.add_field_occurrence(&target_path, value);
            metadata.remove_node(node);
            moved += 1;
        }
    }
    moved > 0
}

/// Remove subsequent equal occurrences, keeping the first.
fn remove_duplicates(metadata: &mut RecordMetadata, path: &FieldPath) -> bool {
    let mut seen = HashSet::new();
    let mut changed = false;
    for node in metadata.field_nodes(path) {
        if let Some(value) = metadata.node_value(node).map(str::to_owned) {
            if !seen.insert(value) {
                metadata.remove_node(node);
                changed = true;
            }
        }
    }
    changed
}

fn add_if_present(metadata: &mut RecordMetadata, field: &str, value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    metadata.add_field_occurrence(&FieldPath::parse(field), value.to_owned());
    true
}

fn add_provenance(
    network: &NetworkInfo,
    record: &HarvestedRecord,
    metadata: &mut RecordMetadata,
    fields: &ProvenanceFields,
) -> bool {
    let mut changed = false;
    let mut add = |field: &str, value: Option<String>| {
        if let Some(value) = value.filter(|value| !value.is_empty()) {
            metadata.add_field_occurrence(&FieldPath::parse(field), value);
            changed = true;
        }
    };
    add(&fields.repository_type, network.attribute("repository_type"));
    add(&fields.repository_url, network.attribute("repository_url"));
    add(
        &fields.institution_type,
        network.attribute("institution_type"),
    );
    add(
        &fields.institution_url,
        network.attribute("institution_url"),
    );
    add(&fields.base_url, Some(network.origin_url.clone()));
    add(&fields.mail, network.attribute("mail"));
    add(&fields.country, network.attribute("country"));
    add(&fields.doi, network.attribute("doi"));
    add(&fields.issn, network.attribute("issn"));
    add(&fields.issn_l, network.attribute("issn_l"));
    add(&fields.identifier, Some(record.identifier.clone()));
    add(
        &fields.repository_id,
        network
            .attribute("opendoar_id")
            .map(|id| format!("opendoar:{}", id)),
    );
    add(
        &fields.harvest_date,
        Some(record.datestamp.to_rfc3339()),
    );
    add(&fields.name, Some(network.name.clone()));
    changed
}
