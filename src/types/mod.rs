//! Data model types for compiled policy statements.
//!
//! Canonical shapes:
//! - List fields: absent when empty, a bare string for one value, a sorted
//!   list otherwise
//! - Principal: `"*"` or `{"AWS" | "Federated" | "Service": <list field>}`
//! - Document: `{"Version": "2012-10-17", "Statement": [..]}`
//!
//! Shorthand references (`{"iam": ..}`, `{"s3": ..}`, `{"kms": ..}`,
//! `{"arn": ..}`) are expanded by [`resolve_resources`] and
//! [`resolve_principals`].

mod document;
mod effect;
mod grant;
mod one_or_many;
mod principal;
mod resource;
mod statement;

pub use document::{Document, POLICY_VERSION, render};
pub use effect::Effect;
pub use grant::GrantStatement;
pub use one_or_many::OneOrMany;
pub(crate) use one_or_many::strings_from_value;
pub use principal::{
    Principal, PrincipalEntry, PrincipalType, literal_principals, merge_principals,
    resolve_principals,
};
pub use resource::{KmsKey, ResourceReference, SELF_MARKER, Scope, ServiceKind, resolve_resources};
pub use statement::{
    ASSUME_ROLE_ACTION, ASSUME_ROLE_WITH_SAML_ACTION, PermissionStatement, PolicyCore,
    ResourcePolicyStatement, Statement, TrustStatement,
};
