// src/lib.rs
pub use compiler::{
    PrincipalSide, apply_default_effect, compile, compile_document, compile_key_policy,
    compile_permission_document, compile_trust_document, compile_with, default_key_statements,
    wrap_trust_principal,
};
pub use context::{EnvironmentConfig, ResolveContext, SelfType};
pub use differ::{DiffInput, GrantPlan, diff, normalise, plan_grants};
pub use error::PolicyError;
pub use fields::{FieldKey, FieldKind, FieldSpec, FieldValue, ResolvedFields, StatementSchema};
pub use schema::StatementKind;
pub use traits::{FromResolvedFields, RenderStatement};
pub use types::*;

pub mod schema;

mod compiler;
mod context;
mod differ;
mod error;
mod fields;
mod traits;
mod types;

#[cfg(test)]
mod tests;
