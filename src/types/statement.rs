//! Compiled statements and their canonical rendering.
//!
//! Rendering is pure and runs on every call; principals in particular are
//! merged at render time, not when the statement is built.

use std::collections::BTreeMap;

use serde::ser::Error as _;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::PolicyError;
use crate::fields::ResolvedFields;
use crate::schema::StatementKind;
use crate::traits::{FromResolvedFields, RenderStatement};
use crate::types::effect::Effect;
use crate::types::grant::GrantStatement;
use crate::types::one_or_many::OneOrMany;
use crate::types::principal::{PrincipalEntry, PrincipalType, merge_principals};

pub const ASSUME_ROLE_ACTION: &str = "sts:AssumeRole";
pub const ASSUME_ROLE_WITH_SAML_ACTION: &str = "sts:AssumeRoleWithSAML";

/// The fields every policy statement shares.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolicyCore {
    pub sid: Option<String>,
    pub effect: Option<Effect>,
    pub action: Vec<String>,
    pub not_action: Vec<String>,
    pub resource: Vec<String>,
    pub not_resource: Vec<String>,
    pub condition: Option<Map<String, Value>>,
    pub not_condition: Option<Map<String, Value>>,
}

impl PolicyCore {
    fn take(fields: &mut ResolvedFields) -> Result<Self, PolicyError> {
        Ok(PolicyCore {
            sid: fields.take_text("sid")?,
            effect: fields.take_effect("effect")?,
            action: fields.take_list("action")?,
            not_action: fields.take_list("notaction")?,
            resource: fields.take_list("resource")?,
            not_resource: fields.take_list("notresource")?,
            condition: fields.take_mapping("condition")?,
            not_condition: fields.take_mapping("notcondition")?,
        })
    }

    fn has_action(&self) -> bool {
        !self.action.is_empty() || !self.not_action.is_empty()
    }

    fn render_into(&self, out: &mut BTreeMap<&'static str, Value>) {
        if let Some(sid) = &self.sid {
            out.insert("Sid", Value::String(sid.clone()));
        }
        if let Some(effect) = self.effect {
            out.insert("Effect", Value::String(effect.to_string()));
        }
        insert_list(out, "Action", &self.action);
        insert_list(out, "NotAction", &self.not_action);
        insert_list(out, "Resource", &self.resource);
        insert_list(out, "NotResource", &self.not_resource);
        if let Some(condition) = &self.condition {
            out.insert("Condition", Value::Object(condition.clone()));
        }
        if let Some(condition) = &self.not_condition {
            out.insert("NotCondition", Value::Object(condition.clone()));
        }
    }
}

/// Insert a list field in its canonical shape, or leave it out when empty.
pub(crate) fn insert_list(out: &mut BTreeMap<&'static str, Value>, key: &'static str, values: &[String]) {
    if let Some(shape) = OneOrMany::canonical(values.iter().cloned()) {
        out.insert(key, shape.into());
    }
}

pub(crate) fn into_map(out: BTreeMap<&'static str, Value>) -> Map<String, Value> {
    out.into_iter().map(|(key, value)| (key.to_string(), value)).collect()
}

/// A statement of an identity-based permission policy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PermissionStatement {
    pub core: PolicyCore,
}

impl FromResolvedFields for PermissionStatement {
    fn from_fields(mut fields: ResolvedFields) -> Result<Self, PolicyError> {
        Ok(PermissionStatement {
            core: PolicyCore::take(&mut fields)?,
        })
    }
}

impl RenderStatement for PermissionStatement {
    fn kind(&self) -> StatementKind {
        StatementKind::Permission
    }

    fn render(&self) -> Result<Map<String, Value>, PolicyError> {
        let mut out = BTreeMap::new();
        self.core.render_into(&mut out);
        Ok(into_map(out))
    }
}

/// A statement of a resource policy, such as a bucket or key policy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResourcePolicyStatement {
    pub core: PolicyCore,
    pub principal: Vec<PrincipalEntry>,
    pub not_principal: Vec<PrincipalEntry>,
}

impl ResourcePolicyStatement {
    /// Merge `principal` and `notprincipal` into their rendered values.
    pub fn merged_principals(
        &self,
    ) -> Result<(Option<PrincipalEntry>, Option<PrincipalEntry>), PolicyError> {
        Ok((
            merge_principals(&self.principal)?,
            merge_principals(&self.not_principal)?,
        ))
    }

    fn render_with(
        &self,
        principal: Option<&PrincipalEntry>,
        not_principal: Option<&PrincipalEntry>,
    ) -> BTreeMap<&'static str, Value> {
        let mut out = BTreeMap::new();
        self.core.render_into(&mut out);
        out.entry("Sid")
            .or_insert_with(|| Value::String(String::new()));
        out.entry("Effect")
            .or_insert_with(|| Value::String(Effect::Allow.to_string()));
        if let Some(principal) = principal {
            out.insert("Principal", principal.to_value());
        }
        if let Some(principal) = not_principal {
            out.insert("NotPrincipal", principal.to_value());
        }
        out
    }
}

impl FromResolvedFields for ResourcePolicyStatement {
    fn from_fields(mut fields: ResolvedFields) -> Result<Self, PolicyError> {
        Ok(ResourcePolicyStatement {
            core: PolicyCore::take(&mut fields)?,
            principal: fields.take_principals("principal")?,
            not_principal: fields.take_principals("notprincipal")?,
        })
    }
}

impl RenderStatement for ResourcePolicyStatement {
    fn kind(&self) -> StatementKind {
        StatementKind::ResourcePolicy
    }

    fn render(&self) -> Result<Map<String, Value>, PolicyError> {
        let (principal, not_principal) = self.merged_principals()?;
        Ok(into_map(
            self.render_with(principal.as_ref(), not_principal.as_ref()),
        ))
    }
}

/// A statement of a role trust policy. Renders like a resource policy
/// statement and fills in the assume-role action when none is given.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrustStatement {
    pub policy: ResourcePolicyStatement,
}

impl TrustStatement {
    pub fn new(policy: ResourcePolicyStatement) -> Self {
        TrustStatement { policy }
    }
}

impl FromResolvedFields for TrustStatement {
    fn from_fields(fields: ResolvedFields) -> Result<Self, PolicyError> {
        ResourcePolicyStatement::from_fields(fields).map(TrustStatement::new)
    }
}

impl RenderStatement for TrustStatement {
    fn kind(&self) -> StatementKind {
        StatementKind::Trust
    }

    fn render(&self) -> Result<Map<String, Value>, PolicyError> {
        let (principal, not_principal) = self.policy.merged_principals()?;
        let mut out = self
            .policy
            .render_with(principal.as_ref(), not_principal.as_ref());

        if !self.policy.core.has_action() {
            if let Some(action) = default_trust_action(principal.as_ref(), not_principal.as_ref()) {
                debug!(
                    event = "Render",
                    phase = "Trust",
                    action = action,
                    "Defaulted trust statement action"
                );
                out.insert("Action", Value::String(action.to_string()));
            }
        }
        Ok(into_map(out))
    }
}

fn default_trust_action(
    principal: Option<&PrincipalEntry>,
    not_principal: Option<&PrincipalEntry>,
) -> Option<&'static str> {
    let present: Vec<&PrincipalEntry> = principal.into_iter().chain(not_principal).collect();
    if present.is_empty() {
        None
    } else if present
        .iter()
        .any(|entry| entry.contains(PrincipalType::Federated))
    {
        Some(ASSUME_ROLE_WITH_SAML_ACTION)
    } else {
        Some(ASSUME_ROLE_ACTION)
    }
}

/// Any compiled statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Permission(PermissionStatement),
    ResourcePolicy(ResourcePolicyStatement),
    Trust(TrustStatement),
    Grant(GrantStatement),
}

impl RenderStatement for Statement {
    fn kind(&self) -> StatementKind {
        match self {
            Statement::Permission(statement) => statement.kind(),
            Statement::ResourcePolicy(statement) => statement.kind(),
            Statement::Trust(statement) => statement.kind(),
            Statement::Grant(statement) => statement.kind(),
        }
    }

    fn render(&self) -> Result<Map<String, Value>, PolicyError> {
        match self {
            Statement::Permission(statement) => statement.render(),
            Statement::ResourcePolicy(statement) => statement.render(),
            Statement::Trust(statement) => statement.render(),
            Statement::Grant(statement) => statement.render(),
        }
    }
}

impl Serialize for Statement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.render().map_err(S::Error::custom)?.serialize(serializer)
    }
}

impl From<PermissionStatement> for Statement {
    fn from(statement: PermissionStatement) -> Self {
        Statement::Permission(statement)
    }
}

impl From<ResourcePolicyStatement> for Statement {
    fn from(statement: ResourcePolicyStatement) -> Self {
        Statement::ResourcePolicy(statement)
    }
}

impl From<TrustStatement> for Statement {
    fn from(statement: TrustStatement) -> Self {
        Statement::Trust(statement)
    }
}

impl From<GrantStatement> for Statement {
    fn from(statement: GrantStatement) -> Self {
        Statement::Grant(statement)
    }
}
