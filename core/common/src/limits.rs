//! Limits that are part of the observable contract.

/// Maximum length of an attribute key or tag collection name.
pub const MAX_KEY_LENGTH: usize = 30;

/// Maximum length of a string attribute value.
pub const MAX_STRING_LENGTH: usize = 64;

/// Maximum length of a URL attribute value.
pub const MAX_URL_LENGTH: usize = 2048;

/// Maximum length of a single array item or tag.
pub const MAX_ARRAY_ITEM_LENGTH: usize = 64;

/// Maximum length of an email address.
pub const MAX_EMAIL_LENGTH: usize = 256;

/// Maximum length of a language or region code.
pub const MAX_LOCALE_LENGTH: usize = 128;

/// Default cap on the number of user attributes.
pub const DEFAULT_MAX_ATTRIBUTES: usize = 50;

/// Default cap on the number of ARRAY attributes.
pub const DEFAULT_MAX_ARRAY_ATTRIBUTES: usize = 15;

/// Default cap on the number of items in a materialized array.
pub const DEFAULT_MAX_ARRAY_ITEMS: usize = 25;
