//! The built-in statement kinds and their registration table.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::error::PolicyError;
use crate::fields::{FieldKey, FieldKind, ResolvedFields, StatementSchema};
use crate::traits::FromResolvedFields;
use crate::types::{
    Effect, GrantStatement, PermissionStatement, ResourcePolicyStatement, ServiceKind, Statement,
    TrustStatement,
};

pub const SID: FieldKey = FieldKey::new(&["sid"]);
pub const EFFECT: FieldKey = FieldKey::new(&["effect"]);
pub const ACTION: FieldKey = FieldKey::new(&["action"]);
pub const NOT_ACTION: FieldKey = FieldKey::new(&["not", "action"]).with_separator("");
pub const RESOURCE: FieldKey = FieldKey::new(&["resource"]);
pub const NOT_RESOURCE: FieldKey = FieldKey::new(&["not", "resource"]).with_separator("");
pub const PRINCIPAL: FieldKey = FieldKey::new(&["principal"]);
pub const NOT_PRINCIPAL: FieldKey = FieldKey::new(&["not", "principal"]).with_separator("");
pub const CONDITION: FieldKey = FieldKey::new(&["condition"]);
pub const NOT_CONDITION: FieldKey = FieldKey::new(&["not", "condition"]).with_separator("");
pub const GRANTEE: FieldKey = FieldKey::new(&["grantee"]);
pub const RETIREE: FieldKey = FieldKey::new(&["retiree"]);
pub const OPERATIONS: FieldKey = FieldKey::new(&["operations"]);
pub const CONSTRAINTS: FieldKey = FieldKey::new(&["constraints"]);
pub const GRANT_TOKENS: FieldKey = FieldKey::new(&["grant", "tokens"]);

const GRANT_PRINCIPAL_SERVICES: &[ServiceKind] = &[ServiceKind::Iam];

/// The statement kinds known to the compiler.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StatementKind {
    Permission,
    ResourcePolicy,
    Trust,
    Grant,
}

impl StatementKind {
    pub const ALL: [StatementKind; 4] = [
        StatementKind::Permission,
        StatementKind::ResourcePolicy,
        StatementKind::Trust,
        StatementKind::Grant,
    ];

    pub fn schema(self) -> &'static StatementSchema {
        &self.registration().schema
    }

    pub(crate) fn registration(self) -> &'static Registration {
        match self {
            StatementKind::Permission => &REGISTRY.permission,
            StatementKind::ResourcePolicy => &REGISTRY.resource_policy,
            StatementKind::Trust => &REGISTRY.trust,
            StatementKind::Grant => &REGISTRY.grant,
        }
    }
}

pub(crate) struct Registration {
    pub schema: StatementSchema,
    pub build: fn(ResolvedFields) -> Result<Statement, PolicyError>,
}

struct Registry {
    permission: Registration,
    resource_policy: Registration,
    trust: Registration,
    grant: Registration,
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| Registry {
    permission: Registration {
        schema: permission_schema(),
        build: build::<PermissionStatement>,
    },
    resource_policy: Registration {
        schema: resource_policy_schema(),
        build: build::<ResourcePolicyStatement>,
    },
    trust: Registration {
        schema: resource_policy_schema(),
        build: build::<TrustStatement>,
    },
    grant: Registration {
        schema: grant_schema(),
        build: build::<GrantStatement>,
    },
});

fn build<T>(fields: ResolvedFields) -> Result<Statement, PolicyError>
where
    T: FromResolvedFields + Into<Statement>,
{
    T::from_fields(fields).map(Into::into)
}

/// Fields shared by every policy statement kind.
fn policy_schema() -> StatementSchema {
    StatementSchema::new()
        .field(SID, FieldKind::Text)
        .field(EFFECT, FieldKind::Choice(Effect::CHOICES))
        .field(ACTION, FieldKind::Strings)
        .field(NOT_ACTION, FieldKind::Strings)
        .field(RESOURCE, FieldKind::Resources { only: None })
        .field(NOT_RESOURCE, FieldKind::Resources { only: None })
        .field(CONDITION, FieldKind::Mapping)
        .field(NOT_CONDITION, FieldKind::Mapping)
        .conflict(&[ACTION, NOT_ACTION])
        .conflict(&[RESOURCE, NOT_RESOURCE])
}

fn permission_schema() -> StatementSchema {
    policy_schema()
        .require(&[ACTION, NOT_ACTION])
        .require(&[EFFECT])
        .require(&[RESOURCE, NOT_RESOURCE])
        .forbid(PRINCIPAL)
        .forbid(NOT_PRINCIPAL)
}

fn resource_policy_schema() -> StatementSchema {
    policy_schema()
        .field(PRINCIPAL, FieldKind::Principals)
        .field(NOT_PRINCIPAL, FieldKind::Principals)
        .conflict(&[PRINCIPAL, NOT_PRINCIPAL])
}

fn grant_schema() -> StatementSchema {
    StatementSchema::new()
        .field(
            GRANTEE,
            FieldKind::Resources {
                only: Some(GRANT_PRINCIPAL_SERVICES),
            },
        )
        .field(
            RETIREE,
            FieldKind::Resources {
                only: Some(GRANT_PRINCIPAL_SERVICES),
            },
        )
        .field(OPERATIONS, FieldKind::Strings)
        .field(CONSTRAINTS, FieldKind::Mapping)
        .field(GRANT_TOKENS, FieldKind::Strings)
}
