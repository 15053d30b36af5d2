/*!
Schema introspection for the rule registry.

Every rule variant registers a [RuleDescriptor]: a human-readable title
and help text plus ordered per-field annotations. From a descriptor the
module emits a JSON-Schema-like description together with an ordered form
layout, localized through a [MessageCatalog]. This powers dynamic form
generation in the admin surfaces; the engine itself never reads it.
*/

use std::collections::HashMap;

use lazy_static::lazy_static;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Annotation of one configurable rule field.
pub struct FieldDescriptor {
    /// Field name as it appears in the persisted JSON.
    pub name: &'static str,
    /// Short label shown next to the form control.
    pub title: &'static str,
    /// Longer help text.
    pub description: &'static str,
    /// JSON type of the field.
    pub field_type: &'static str,
    /// Hint for the form control, e.g. `textarea`.
    pub ui_type: Option<&'static str>,
    /// Default value pre-filled in the form.
    pub default_value: Option<&'static str>,
    /// Position in the form layout.
    pub order: u32,
}

const fn field(
    name: &'static str,
    title: &'static str,
    description: &'static str,
    field_type: &'static str,
    order: u32,
) -> FieldDescriptor {
    FieldDescriptor {
        name,
        title,
        description,
        field_type,
        ui_type: None,
        default_value: None,
        order,
    }
}

const fn field_ui(
    name: &'static str,
    title: &'static str,
    description: &'static str,
    field_type: &'static str,
    ui_type: &'static str,
    order: u32,
) -> FieldDescriptor {
    FieldDescriptor {
        name,
        title,
        description,
        field_type,
        ui_type: Some(ui_type),
        default_value: None,
        order,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Registered description of one rule variant.
pub struct RuleDescriptor {
    /// The `@class` discriminator.
    pub class: &'static str,
    /// Human-readable rule name.
    pub title: &'static str,
    /// Help text shown in the rule editor.
    pub help: &'static str,
    /// Per-field annotations, form order.
    pub fields: Vec<FieldDescriptor>,
}

/// Localization catalog for schema labels. Keys are
/// `<class>.<field>.title` / `.description` (or `<class>.title` for the
/// rule itself); a miss falls back to the registered English text.
#[derive(Debug, Clone, Default)]
pub struct MessageCatalog {
    messages: HashMap<String, String>,
}

impl MessageCatalog {
    /// An empty catalog; every lookup falls back to the default text.
    pub fn new() -> Self {
        MessageCatalog::default()
    }

    /// Add or replace a message.
    pub fn insert(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.messages.insert(key.into(), message.into());
    }

    /// The message for a key, or the fallback text.
    pub fn text<'a>(&'a self, key: &str, fallback: &'a str) -> &'a str {
        self.messages.get(key).map(String::as_str).unwrap_or(fallback)
    }
}

fn validator_envelope(order_base: u32) -> Vec<FieldDescriptor> {
    vec![
        field("rule-id", "Rule id", "Unique id of the rule.", "integer", order_base),
        field(
            "mandatory",
            "Mandatory",
            "A failure invalidates the whole record.",
            "boolean",
            order_base + 1,
        ),
        field(
            "quantifier",
            "Quantifier",
            "How many occurrences must satisfy the rule.",
            "string",
            order_base + 2,
        ),
        field(
            "store-occurrences",
            "Store occurrences",
            "Keep per-occurrence values in detailed-diagnose mode.",
            "boolean",
            order_base + 3,
        ),
    ]
}

fn transformer_envelope(order_base: u32) -> Vec<FieldDescriptor> {
    vec![
        field("rule-id", "Rule id", "Unique id of the rule.", "integer", order_base),
        field(
            "runorder",
            "Run order",
            "Lower values run first.",
            "integer",
            order_base + 1,
        ),
    ]
}

fn descriptor(
    class: &'static str,
    title: &'static str,
    help: &'static str,
    envelope: Vec<FieldDescriptor>,
    own: Vec<FieldDescriptor>,
) -> RuleDescriptor {
    let mut fields = envelope;
    fields.extend(own);
    fields.sort_by_key(|field| field.order);
    RuleDescriptor {
        class,
        title,
        help,
        fields,
    }
}

lazy_static! {
    static ref REGISTRY: Vec<RuleDescriptor> = build_registry();
}

fn build_registry() -> Vec<RuleDescriptor> {
    vec![
        descriptor(
            "validator.field.regex",
            "Regex field validator",
            "Each occurrence of the field must match a regular expression.",
            validator_envelope(0),
            vec![
                field("field-name", "Field", "Dotted path of the validated field.", "string", 10),
                field("pattern", "Pattern", "Regular expression tested per occurrence.", "string", 11),
            ],
        ),
        descriptor(
            "validator.field.controlled-value",
            "Controlled value validator",
            "Each occurrence must belong to a configured value list.",
            validator_envelope(0),
            vec![
                field("field-name", "Field", "Dotted path of the validated field.", "string", 10),
                field_ui(
                    "controlled-values",
                    "Allowed values",
                    "One allowed value per entry.",
                    "array",
                    "textarea",
                    11,
                ),
            ],
        ),
        descriptor(
            "validator.field.controlled-value-large",
            "Large controlled value validator",
            "Controlled values loaded from CSV content or an external file.",
            validator_envelope(0),
            vec![
                field("field-name", "Field", "Dotted path of the validated field.", "string", 10),
                field_ui(
                    "controlled-values-csv",
                    "CSV content",
                    "Inline list, one value per line.",
                    "string",
                    "textarea",
                    11,
                ),
                field(
                    "controlled-values-file",
                    "File path",
                    "UTF-8 file with one value per line.",
                    "string",
                    12,
                ),
            ],
        ),
        descriptor(
            "validator.field.expression",
            "Field expression validator",
            "Boolean expression over metadata fields with AND, OR, NOT, \
             == and =% operators.",
            validator_envelope(0),
            vec![field_ui(
                "field-expression",
                "Expression",
                "e.g. dc.title.none=='Hello' AND NOT dc.type.none=%'^draft'",
                "string",
                "textarea",
                10,
            )],
        ),
        descriptor(
            "transformer.field.add",
            "Add field occurrence",
            "Appends a fixed value to a field.",
            transformer_envelope(0),
            vec![
                field("target-field-name", "Target field", "Dotted path written to.", "string", 10),
                field("value", "Value", "The appended value.", "string", 11),
            ],
        ),
        descriptor(
            "transformer.field.name-translate",
            "Translate field name",
            "Moves every occurrence of one field under another field name.",
            transformer_envelope(0),
            vec![
                field("source-field-name", "Source field", "Field moved from.", "string", 10),
                field("target-field-name", "Target field", "Field moved to.", "string", 11),
            ],
        ),
        descriptor(
            "transformer.field.name-bulk-translate",
            "Bulk translate field names",
            "Applies an ordered list of field-name translations.",
            transformer_envelope(0),
            vec![field("translations", "Translations", "Ordered search/replace pairs.", "array", 10)],
        ),
        descriptor(
            "transformer.field.content-normalize",
            "Normalize field content",
            "Removes invalid and/or duplicated occurrences.",
            transformer_envelope(0),
            vec![
                field("field-name", "Field", "Dotted path of the normalized field.", "string", 10),
                field("pattern", "Pattern", "Occurrences failing this pattern are invalid.", "string", 11),
                field(
                    "remove-invalid-occurrences",
                    "Remove invalid",
                    "Drop occurrences failing the pattern.",
                    "boolean",
                    12,
                ),
                field(
                    "remove-duplicated-occurrences",
                    "Remove duplicates",
                    "Drop subsequent equal occurrences.",
                    "boolean",
                    13,
                ),
            ],
        ),
        descriptor(
            "transformer.field.content-priority-translate",
            "Priority translate field content",
            "Translates occurrences by priority; the first matching \
             translation wins.",
            transformer_envelope(0),
            vec![
                field("test-field-name", "Test field", "Field whose occurrences are tested.", "string", 10),
                field("write-field-name", "Write field", "Field the replacement is written to.", "string", 11),
                field("translations", "Translations", "Pairs in priority order.", "array", 12),
                field("replace-occurrence", "Replace occurrence", "Remove the matched source occurrence.", "boolean", 13),
                field("test-value-as-prefix", "Prefix match", "Match on prefix instead of equality.", "boolean", 14),
                field(
                    "replace-all-matching-occurrences",
                    "Replace all",
                    "Keep scanning after the first match.",
                    "boolean",
                    15,
                ),
            ],
        ),
        descriptor(
            "transformer.field.content-conditional-add",
            "Conditionally add occurrence",
            "Adds a value when a boolean expression holds.",
            transformer_envelope(0),
            vec![
                field("field-name", "Field", "Dotted path written to.", "string", 10),
                field("value-to-add", "Value", "The appended value.", "string", 11),
                field_ui(
                    "conditional-expression",
                    "Condition",
                    "Expression gating the addition.",
                    "string",
                    "textarea",
                    12,
                ),
                field(
                    "remove-duplicated-occurrences",
                    "Deduplicate",
                    "De-duplicate the field afterwards.",
                    "boolean",
                    13,
                ),
            ],
        ),
        descriptor(
            "transformer.field.content-remove-whitespaces",
            "Remove whitespaces",
            "Strips all whitespace characters from each occurrence.",
            transformer_envelope(0),
            vec![field("field-name", "Field", "Dotted path of the stripped field.", "string", 10)],
        ),
        descriptor(
            "transformer.field.remove-all-but-first",
            "Keep first occurrence",
            "Keeps only the first occurrence of the field.",
            transformer_envelope(0),
            vec![field("field-name", "Field", "Dotted path of the pruned field.", "string", 10)],
        ),
        descriptor(
            "transformer.field.remove-duplicates",
            "Remove duplicate occurrences",
            "Removes subsequent equal occurrences, keeping the first.",
            transformer_envelope(0),
            vec![field("field-name", "Field", "Dotted path of the field.", "string", 10)],
        ),
        descriptor(
            "transformer.field.remove-duplicate-vocabulary",
            "Remove duplicate vocabulary occurrences",
            "Among occurrences found in an ordered vocabulary, keeps the \
             best-ranked one.",
            transformer_envelope(0),
            vec![
                field("field-name", "Field", "Dotted path of the field.", "string", 10),
                field_ui("vocabulary", "Vocabulary", "Values, best first.", "array", "textarea", 11),
            ],
        ),
        descriptor(
            "transformer.field.remove-blacklist",
            "Remove blacklisted occurrences",
            "Drops occurrences whose value appears in a blacklist.",
            transformer_envelope(0),
            vec![
                field("field-name", "Field", "Dotted path of the field.", "string", 10),
                field_ui("blacklist", "Blacklist", "Values to drop.", "array", "textarea", 11),
            ],
        ),
        descriptor(
            "transformer.record.reduce-heavy",
            "Reduce heavy records",
            "Removes all occurrences of each listed field.",
            transformer_envelope(0),
            vec![field_ui(
                "fields-to-remove",
                "Fields",
                "Dotted paths to clear.",
                "array",
                "textarea",
                10,
            )],
        ),
        descriptor(
            "transformer.record.identifier-regex",
            "Rewrite identifier",
            "Rewrites the record identifier with replace-all semantics.",
            transformer_envelope(0),
            vec![
                field("regex-search", "Search", "Pattern searched in the identifier.", "string", 10),
                field("regex-replace", "Replace", "Replacement text, $n groups allowed.", "string", 11),
            ],
        ),
        descriptor(
            "transformer.record.add-provenance",
            "Add provenance metadata",
            "Injects provenance fields derived from the network \
             configuration and the record.",
            transformer_envelope(0),
            vec![field(
                "fields",
                "Field names",
                "Target field names; the default set when omitted.",
                "object",
                10,
            )],
        ),
        descriptor(
            "transformer.record.add-repo-name",
            "Add repository name",
            "Injects the network display name and optionally the \
             institution name and acronym.",
            transformer_envelope(0),
            vec![
                field("target-field-name", "Name field", "Field the network name is written to.", "string", 10),
                field(
                    "institution-name-field",
                    "Institution name field",
                    "Optional field for the institution name.",
                    "string",
                    11,
                ),
                field(
                    "institution-acronym-field",
                    "Institution acronym field",
                    "Optional field for the institution acronym.",
                    "string",
                    12,
                ),
            ],
        ),
    ]
}

/// All registered rule descriptors.
pub fn registry() -> &'static [RuleDescriptor] {
    &REGISTRY
}

/// The descriptor registered for a class, if any.
pub fn descriptor_for(class: &str) -> Option<&'static RuleDescriptor> {
    REGISTRY.iter().find(|descriptor| descriptor.class == class)
}

/// Emit a JSON-Schema-like description plus ordered form layout for a
/// rule class, localized through the catalog.
pub fn form_schema(class: &str, catalog: &MessageCatalog) -> Option<Value> {
    let descriptor = descriptor_for(class)?;
    let mut properties = serde_json::Map::new();
    let mut form = Vec::new();
    for field in &descriptor.fields {
        let title_key = format!("{}.{}.title", class, field.name);
        let description_key = format!("{}.{}.description", class, field.name);
        let mut property = serde_json::Map::new();
        property.insert(
            "title".to_owned(),
            json!(catalog.text(&title_key, field.title)),
        );
        property.insert(
            "description".to_owned(),
            json!(catalog.text(&description_key, field.description)),
        );
        property.insert("type".to_owned(), json!(field.field_type));
        if let Some(ui_type) = field.ui_type {
            property.insert("ui-type".to_owned(), json!(ui_type));
        }
        if let Some(default_value) = field.default_value {
            property.insert("default".to_owned(), json!(default_value));
        }
        properties.insert(field.name.to_owned(), Value::Object(property));
        form.push(json!(field.name));
    }
    Some(json!({
        "title": catalog.text(&format!("{}.title", class), descriptor.title),
        "description": catalog.text(&format!("{}.help", class), descriptor.help),
        "type": "object",
        "properties": Value::Object(properties),
        "form": form,
    }))
}
