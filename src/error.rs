use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum PolicyError {
    #[error(
        "Cannot specify '{field}' as shorthand and '{canonical}' at the same time (shorthand={shorthand_value}, canonical={canonical_value})"
    )]
    InvalidFieldUsage {
        field: String,
        canonical: String,
        shorthand_value: String,
        canonical_value: String,
    },

    #[error("Cannot specify '{field}' or '{canonical}' in this statement")]
    ForbiddenField { field: String, canonical: String },

    #[error("Key '{key}' is deprecated: {reason}")]
    DeprecatedKey { key: String, reason: String },

    #[error("Statement is missing required properties: {}", missing.join("; "))]
    MissingRequiredFields { missing: Vec<String> },

    #[error(
        "Statement has conflicting keys, please only choose one of [{}] (found [{}])",
        group.join(", "),
        found.join(", ")
    )]
    ConflictingFields { group: Vec<String>, found: Vec<String> },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown account specified: '{account}' (available: {})", available.join(", "))]
    UnknownAccount {
        account: String,
        available: Vec<String>,
    },

    #[error("No __self__ {target} for this policy (self type is '{self_type}')")]
    InvalidSelfReference { target: String, self_type: String },

    #[error(
        "Sorry, don't support this resource type here: wanted '{wanted}', available [{}]",
        available.join(", ")
    )]
    UnsupportedResourceType {
        wanted: String,
        available: Vec<String>,
    },

    #[error("Unknown service '{service}': {reason}")]
    UnknownService { service: String, reason: String },

    #[error("Generic arn specified without specifying 'identity'")]
    MissingIdentity,

    #[error("Cannot merge principals: {reason}")]
    PrincipalMergeConflict { reason: String },

    #[error("Defaulted effect is being overridden: default '{default}', got '{overridden}'")]
    OverriddenEffect { default: String, overridden: String },

    #[error("Specifying opposite principal type in statement: wanted '{wanted}', got '{got}'")]
    OppositePrincipal { wanted: String, got: String },

    #[error("Document wasn't valid json: {error} (document: {document})")]
    InvalidDocument { document: String, error: String },

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

impl From<serde_json::Error> for PolicyError {
    fn from(err: serde_json::Error) -> Self {
        PolicyError::InvalidFormat(err.to_string())
    }
}

impl PolicyError {
    pub(crate) fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        PolicyError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
