/*!
 * Hashing and formatting helpers shared across the crate.
*/

use md5::Context;

/// Maximum length of a received value kept in a rule diagnostic.
pub const MAX_RECEIVED_VALUE_LEN: usize = 100;

/// Lowercase hex MD5 digest of the given UTF-8 string.
pub fn md5_hex(content: &str) -> String {
    let mut context = Context::new();
    context.consume(content.as_bytes());
    format!("{:x}", context.compute())
}

/// Truncate a received value for diagnostics, appending `...` when the
/// value exceeds [MAX_RECEIVED_VALUE_LEN] characters.
pub fn truncate_received_value(value: &str) -> String {
    if value.chars().count() <= MAX_RECEIVED_VALUE_LEN {
        value.to_owned()
    } else {
        let truncated: String = value.chars().take(MAX_RECEIVED_VALUE_LEN).collect();
        truncated + "..."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("Hello"), "8b1a9953c4611296a827abf8c47804d7");
    }

    #[test]
    fn test_truncate_short_value_unchanged() {
        assert_eq!(truncate_received_value("Hello"), "Hello");
    }

    #[test]
    fn test_truncate_long_value() {
        let long = "x".repeat(250);
        let truncated = truncate_received_value(&long);
        assert_eq!(truncated.len(), MAX_RECEIVED_VALUE_LEN + 3);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_truncate_exact_boundary() {
        let exact = "y".repeat(MAX_RECEIVED_VALUE_LEN);
        assert_eq!(truncate_received_value(&exact), exact);
    }
}
