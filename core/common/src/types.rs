//! Common types used throughout attrsync.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::limits::MAX_KEY_LENGTH;

/// Prefix reserved for native attributes written by dedicated setters.
pub const RESERVED_KEY_PREFIX: char = '$';

/// Check a raw key against the key rules.
///
/// Keys are 1 to 30 characters of ASCII letters, digits or underscores.
fn validate_key(raw: &str, what: &str) -> crate::Result<String> {
    if raw.is_empty() {
        return Err(crate::Error::InvalidInput(format!("{} cannot be empty", what)));
    }
    if raw.chars().count() > MAX_KEY_LENGTH {
        return Err(crate::Error::InvalidInput(format!(
            "{} '{}' is longer than {} characters",
            what, raw, MAX_KEY_LENGTH
        )));
    }
    if !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(crate::Error::InvalidInput(format!(
            "{} '{}' may only contain letters, digits and underscores",
            what, raw
        )));
    }
    Ok(raw.to_ascii_lowercase())
}

/// A validated, case-normalized attribute key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeKey(String);

impl AttributeKey {
    /// Create a new key from user input.
    ///
    /// # Errors
    /// - Returns error if the key is empty, too long or has disallowed characters
    pub fn new(key: impl AsRef<str>) -> crate::Result<Self> {
        validate_key(key.as_ref(), "Attribute key").map(Self)
    }

    /// Key for a native attribute such as `$language`.
    ///
    /// Native keys skip user validation and are never counted against caps.
    pub fn native(name: &str) -> Self {
        Self(format!("{}{}", RESERVED_KEY_PREFIX, name))
    }

    /// Whether this key belongs to a native attribute.
    pub fn is_native(&self) -> bool {
        self.0.starts_with(RESERVED_KEY_PREFIX)
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated, case-normalized tag collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagCollection(String);

impl TagCollection {
    /// Create a new collection name. Same rules as attribute keys.
    pub fn new(name: impl AsRef<str>) -> crate::Result<Self> {
        validate_key(name.as_ref(), "Tag collection").map(Self)
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_key_is_lowercased() {
        let key = AttributeKey::new("Favorite_Color").unwrap();
        assert_eq!(key.as_str(), "favorite_color");
    }

    #[test]
    fn test_key_rejects_bad_input() {
        assert!(AttributeKey::new("").is_err());
        assert!(AttributeKey::new("has space").is_err());
        assert!(AttributeKey::new("dash-ed").is_err());
        assert!(AttributeKey::new("$language").is_err());
        assert!(AttributeKey::new("a".repeat(31)).is_err());
        assert!(AttributeKey::new("a".repeat(30)).is_ok());
    }

    #[test]
    fn test_native_key() {
        let key = AttributeKey::native("language");
        assert_eq!(key.as_str(), "$language");
        assert!(key.is_native());
        assert!(!AttributeKey::new("language").unwrap().is_native());
    }

    #[test]
    fn test_tag_collection_rules() {
        assert_eq!(TagCollection::new("Interests").unwrap().as_str(), "interests");
        assert!(TagCollection::new("with.dot").is_err());
    }

    proptest! {
        #[test]
        fn prop_valid_keys_accepted(key in "[A-Za-z0-9_]{1,30}") {
            let parsed = AttributeKey::new(&key).unwrap();
            prop_assert_eq!(parsed.as_str(), key.to_ascii_lowercase());
        }

        #[test]
        fn prop_long_keys_rejected(key in "[a-z]{31,60}") {
            prop_assert!(AttributeKey::new(&key).is_err());
        }

        #[test]
        fn prop_disallowed_chars_rejected(prefix in "[a-z]{0,10}", bad in "[^A-Za-z0-9_]", suffix in "[a-z]{0,10}") {
            let key = format!("{}{}{}", prefix, bad, suffix);
            prop_assert!(AttributeKey::new(&key).is_err());
        }
    }
}
