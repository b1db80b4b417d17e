//! Pure helpers with no database dependency (grounded on `utils.py`):
//! label-name validation, a stable hash for advisory-lock keys, and
//! COPY-format escaping.

use sha2::{Digest, Sha256};
use thiserror::Error;

const MAX_LABEL_LENGTH: usize = 63;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid label name: label cannot be empty")]
    Empty,
    #[error("invalid label name '{label}': exceeds maximum length of {MAX_LABEL_LENGTH} characters")]
    TooLong { label: String },
    #[error(
        "invalid label name '{label}': must start with letter or underscore, \
         and contain only alphanumeric characters and underscores"
    )]
    InvalidCharacters { label: String },
}

fn is_valid_label_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_valid_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Validate that a label is safe to interpolate into SQL/Cypher identifier
/// position. Same grammar as the wire-level label regex in §6:
/// `^[A-Za-z_][A-Za-z0-9_]{0,62}$`.
pub fn validate_label_name(label: &str) -> Result<(), ValidationError> {
    if label.is_empty() {
        return Err(ValidationError::Empty);
    }
    if label.len() > MAX_LABEL_LENGTH {
        return Err(ValidationError::TooLong { label: label.to_string() });
    }
    let mut chars = label.chars();
    let first = chars.next().expect("checked non-empty above");
    if !is_valid_label_start(first) || !chars.all(is_valid_label_char) {
        return Err(ValidationError::InvalidCharacters { label: label.to_string() });
    }
    Ok(())
}

/// Stable hash for `pg_advisory_xact_lock` keys: SHA-256 of `key`, first 16
/// hex chars (64 bits) read as `u64`, masked into the signed 64-bit range
/// so the value is accepted by Postgres's `bigint` advisory-lock argument
/// regardless of representation.
pub fn compute_stable_hash(key: &str) -> i64 {
    let digest = Sha256::digest(key.as_bytes());
    let hex = hex::encode(&digest[..8]);
    let value = u64::from_str_radix(&hex, 16).expect("16 hex chars always parse as u64");
    (value & 0x7FFF_FFFF_FFFF_FFFF) as i64
}

/// Escape a value for PostgreSQL COPY's tab-delimited text format. Order
/// matters: backslash must be escaped before the other three, or their
/// escape sequences would themselves be re-escaped.
pub fn escape_copy_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\t', "\\t")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_label() {
        assert!(validate_label_name("person").is_ok());
        assert!(validate_label_name("_private").is_ok());
        assert!(validate_label_name("a1_B2").is_ok());
    }

    #[test]
    fn rejects_empty_label() {
        assert_eq!(validate_label_name("").unwrap_err(), ValidationError::Empty);
    }

    #[test]
    fn rejects_label_starting_with_digit() {
        assert!(matches!(
            validate_label_name("1person").unwrap_err(),
            ValidationError::InvalidCharacters { .. }
        ));
    }

    #[test]
    fn rejects_label_with_hyphen() {
        assert!(matches!(
            validate_label_name("person-name").unwrap_err(),
            ValidationError::InvalidCharacters { .. }
        ));
    }

    #[test]
    fn rejects_label_over_max_length() {
        let label = "a".repeat(64);
        assert!(matches!(
            validate_label_name(&label).unwrap_err(),
            ValidationError::TooLong { .. }
        ));
        assert!(validate_label_name(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn stable_hash_is_deterministic_and_non_negative() {
        let a = compute_stable_hash("kartograph:person");
        let b = compute_stable_hash("kartograph:person");
        assert_eq!(a, b);
        assert!(a >= 0);
    }

    #[test]
    fn stable_hash_differs_across_keys() {
        assert_ne!(
            compute_stable_hash("kartograph:person"),
            compute_stable_hash("kartograph:knows")
        );
    }

    #[test]
    fn escape_order_handles_backslash_before_other_escapes() {
        assert_eq!(escape_copy_value("a\\tb"), "a\\\\tb");
        assert_eq!(escape_copy_value("line1\nline2"), "line1\\nline2");
        assert_eq!(escape_copy_value("col1\tcol2"), "col1\\tcol2");
        assert_eq!(escape_copy_value("cr\r"), "cr\\r");
    }
}
