/*!
The filter string language of the stat queries.

Each filter is `field@@value` (preferred) or `field:value`; values may be
double-quoted. `"true"`/`"false"` coerce to booleans, everything else
stays a string. Multiple filters combine with logical AND. Malformed
syntax fails [validate_filters]; unrecognized fields parse fine and are
ignored later by the query engine with a warning.

Recognized fields: `record_is_valid`, `record_is_transformed`,
`valid_rules` and `invalid_rules` (value = rule id), `identifier`.
*/

use crate::error::{OaiError, Result};

/// Filter field selecting on the record validity flag.
pub const FIELD_RECORD_IS_VALID: &str = "record_is_valid";
/// Filter field selecting on the record transformed flag.
pub const FIELD_RECORD_IS_TRANSFORMED: &str = "record_is_transformed";
/// Filter field selecting records a given rule passed on.
pub const FIELD_VALID_RULES: &str = "valid_rules";
/// Filter field selecting records a given rule failed on.
pub const FIELD_INVALID_RULES: &str = "invalid_rules";
/// Filter field selecting one record by identifier.
pub const FIELD_IDENTIFIER: &str = "identifier";

#[derive(Debug, Clone, PartialEq, Eq)]
/// A coerced filter value.
pub enum FilterValue {
    /// `"true"` or `"false"`.
    Bool(bool),
    /// Any other value, unquoted.
    Text(String),
}

impl FilterValue {
    fn coerce(raw: &str) -> Self {
        let unquoted = raw
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
            .unwrap_or(raw);
        match unquoted {
            "true" => FilterValue::Bool(true),
            "false" => FilterValue::Bool(false),
            other => FilterValue::Text(other.to_owned()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One parsed filter. The field is kept verbatim; the query engine
/// decides which fields it recognizes.
pub struct Filter {
    /// Field name, e.g. `record_is_valid`.
    pub field: String,
    /// Coerced value.
    pub value: FilterValue,
}

/// Parse one filter string. `None` means malformed syntax.
fn parse_filter(raw: &str) -> Option<Filter> {
    let (field, value) = raw
        .split_once("@@")
        .or_else(|| raw.split_once(':'))?;
    if field.is_empty() || value.is_empty() {
        return None;
    }
    Some(Filter {
        field: field.to_owned(),
        value: FilterValue::coerce(value),
    })
}

/// True when every filter string is syntactically valid.
pub fn validate_filters<S: AsRef<str>>(filters: &[S]) -> bool {
    filters
        .iter()
        .all(|filter| parse_filter(filter.as_ref()).is_some())
}

/// Parse a filter list, rejecting malformed syntax.
pub fn parse_filters<S: AsRef<str>>(filters: &[S]) -> Result<Vec<Filter>> {
    filters
        .iter()
        .map(|filter| {
            parse_filter(filter.as_ref()).ok_or_else(|| {
                OaiError::Statistics(format!("invalid filter `{}`", filter.as_ref()))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferred_separator() {
        let filter = parse_filter("record_is_valid@@true").unwrap();
        assert_eq!(filter.field, "record_is_valid");
        assert_eq!(filter.value, FilterValue::Bool(true));
    }

    #[test]
    fn test_legacy_separator() {
        let filter = parse_filter("valid_rules:12").unwrap();
        assert_eq!(filter.field, "valid_rules");
        assert_eq!(filter.value, FilterValue::Text("12".to_owned()));
    }

    #[test]
    fn test_quoted_value_unwrapped() {
        let filter = parse_filter(r#"identifier@@"oai:test:1""#).unwrap();
        assert_eq!(filter.value, FilterValue::Text("oai:test:1".to_owned()));
    }

    #[test]
    fn test_identifier_with_colons_prefers_double_at() {
        // The identifier itself contains colons; `@@` keeps it intact.
        let filter = parse_filter("identifier@@oai:test:1").unwrap();
        assert_eq!(filter.value, FilterValue::Text("oai:test:1".to_owned()));
    }

    #[test]
    fn test_malformed_filters_rejected() {
        assert!(!validate_filters(&["no separator"]));
        assert!(!validate_filters(&["@@value"]));
        assert!(!validate_filters(&["field@@"]));
        assert!(validate_filters(&["record_is_valid@@true", "valid_rules@@3"]));
        assert!(!validate_filters(&["record_is_valid@@true", "broken"]));
        assert!(parse_filters(&["broken"]).is_err());
    }

    #[test]
    fn test_unknown_field_parses() {
        // Unknown fields are a query-engine concern, not a syntax error.
        assert!(validate_filters(&["some_future_field@@x"]));
    }
}
