//! Names of the persisted keys.

/// Attribute map (`key -> AttributeValue`).
pub const ATTRIBUTES: &str = "attributes";

/// Tag map (`collection -> [tag]`).
pub const TAGS: &str = "attributes_tags";

/// Local attribute version counter.
pub const VERSION: &str = "attributes_version";

/// Server-issued transaction id for the current version.
pub const TRANSACTION_ID: &str = "attributes_txid";

/// Epoch millis of the last successful check.
pub const LAST_CHECK: &str = "attributes_last_check";

/// Last project key reported by the check webservice.
pub const PROJECT_KEY: &str = "project_key";

/// Set once the installation leaves push probation.
pub const PUSH_OUT_OF_PROBATION: &str = "push_out_of_probation";

/// Set once the installation leaves profile probation.
pub const PROFILE_OUT_OF_PROBATION: &str = "profile_out_of_probation";

/// Installation id generated by the command-line client.
pub const INSTALLATION_ID: &str = "installation_id";
