//! Compiling raw statement mappings into [`Statement`]s and [`Document`]s.

use serde_json::{Map, Value, json};
use strum_macros::{AsRefStr, Display};
use tracing::debug;

use crate::context::ResolveContext;
use crate::error::PolicyError;
use crate::fields::{FieldKey, StatementSchema};
use crate::schema::{EFFECT, NOT_PRINCIPAL, PRINCIPAL, StatementKind};
use crate::traits::FromResolvedFields;
use crate::types::{Document, Effect, SELF_MARKER, Statement};

/// Compile one raw statement mapping with a registered statement kind.
pub fn compile(
    kind: StatementKind,
    ctx: &ResolveContext<'_>,
    raw: &Value,
) -> Result<Statement, PolicyError> {
    let registration = kind.registration();
    let fields = registration.schema.resolve(ctx, raw)?;
    let statement = (registration.build)(fields)?;
    debug!(
        event = "Compile",
        phase = "Build",
        kind = %kind,
        self_type = %ctx.self_type(),
        self_name = ctx.self_name(),
        "Statement compiled"
    );
    Ok(statement)
}

/// Compile with a caller-declared schema into any statement type.
pub fn compile_with<T: FromResolvedFields>(
    schema: &StatementSchema,
    ctx: &ResolveContext<'_>,
    raw: &Value,
) -> Result<T, PolicyError> {
    T::from_fields(schema.resolve(ctx, raw)?)
}

/// Compile every raw mapping, in order, into one document.
pub fn compile_document(
    kind: StatementKind,
    ctx: &ResolveContext<'_>,
    raws: &[Value],
) -> Result<Document, PolicyError> {
    raws.iter().map(|raw| compile(kind, ctx, raw)).collect()
}

/// Fill in `Effect` for an `allow_permission`/`deny_permission` entry.
///
/// An entry that already names a different effect is rejected.
pub fn apply_default_effect(raw: &Value, effect: Effect) -> Result<Value, PolicyError> {
    let mut entry = expect_mapping("permission", raw)?;
    let given: Vec<&Value> = spellings(EFFECT)
        .iter()
        .filter_map(|name| entry.get(name).filter(|value| !value.is_null()))
        .collect();

    let wanted = effect.to_string();
    if let Some(other) = given
        .iter()
        .find(|value| value.as_str() != Some(wanted.as_str()))
    {
        return Err(PolicyError::OverriddenEffect {
            default: effect.to_string(),
            overridden: other.as_str().map_or_else(|| other.to_string(), str::to_string),
        });
    }
    if given.is_empty() {
        entry.insert(EFFECT.canonical(), Value::String(wanted));
    }
    Ok(Value::Object(entry))
}

/// Which principal key a trust entry is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum PrincipalSide {
    Principal,
    NotPrincipal,
}

impl PrincipalSide {
    fn key(self) -> FieldKey {
        match self {
            PrincipalSide::Principal => PRINCIPAL,
            PrincipalSide::NotPrincipal => NOT_PRINCIPAL,
        }
    }

    fn opposite(self) -> Self {
        match self {
            PrincipalSide::Principal => PrincipalSide::NotPrincipal,
            PrincipalSide::NotPrincipal => PrincipalSide::Principal,
        }
    }
}

/// Turn an `allow_to_assume_me`/`disallow_to_assume_me` entry into a trust
/// statement mapping.
///
/// An entry without the wanted principal key is itself the principal.
pub fn wrap_trust_principal(raw: &Value, side: PrincipalSide) -> Result<Value, PolicyError> {
    let entry = expect_mapping("trust", raw)?;
    let wanted = side.key();

    if let Some(got) = spellings(side.opposite().key())
        .into_iter()
        .find(|name| entry.contains_key(name))
    {
        return Err(PolicyError::OppositePrincipal {
            wanted: wanted.shorthand(),
            got,
        });
    }
    if spellings(wanted).iter().any(|name| entry.contains_key(name)) {
        return Ok(Value::Object(entry));
    }
    let mut wrapped = Map::new();
    wrapped.insert(wanted.shorthand(), Value::Object(entry));
    Ok(Value::Object(wrapped))
}

/// A role permission document: plain entries, then deny-defaulted, then
/// allow-defaulted ones.
pub fn compile_permission_document(
    kind: StatementKind,
    ctx: &ResolveContext<'_>,
    permission: &[Value],
    deny: &[Value],
    allow: &[Value],
) -> Result<Document, PolicyError> {
    permission
        .iter()
        .cloned()
        .map(Ok)
        .chain(deny.iter().map(|raw| apply_default_effect(raw, Effect::Deny)))
        .chain(allow.iter().map(|raw| apply_default_effect(raw, Effect::Allow)))
        .map(|raw| compile(kind, ctx, &raw?))
        .collect()
}

/// A role trust document: allowed principals, then disallowed ones.
pub fn compile_trust_document(
    ctx: &ResolveContext<'_>,
    allow: &[Value],
    disallow: &[Value],
) -> Result<Document, PolicyError> {
    allow
        .iter()
        .map(|raw| wrap_trust_principal(raw, PrincipalSide::Principal))
        .chain(
            disallow
                .iter()
                .map(|raw| wrap_trust_principal(raw, PrincipalSide::NotPrincipal)),
        )
        .map(|raw| compile(StatementKind::Trust, ctx, &raw?))
        .collect()
}

/// The statements every key policy carries on top of its own permissions.
pub fn default_key_statements(admin_users: &[Value], no_root_access: bool) -> Vec<Value> {
    let root = (!no_root_access).then(|| {
        json!({"principal": {"iam": "root"}, "action": "kms:*", "resource": "*", "Sid": ""})
    });
    root.into_iter()
        .chain(admin_users.iter().map(|admin| {
            json!({
                "principal": admin,
                "action": "kms:*",
                "resource": {"kms": SELF_MARKER},
                "Sid": "",
            })
        }))
        .collect()
}

/// A key policy: the key's own permissions followed by its default statements.
pub fn compile_key_policy(
    ctx: &ResolveContext<'_>,
    permission: &[Value],
    admin_users: &[Value],
    no_root_access: bool,
) -> Result<Document, PolicyError> {
    let mut raws = permission.to_vec();
    raws.extend(default_key_statements(admin_users, no_root_access));
    compile_document(StatementKind::ResourcePolicy, ctx, &raws)
}

fn spellings(key: FieldKey) -> [String; 2] {
    [key.shorthand(), key.canonical()]
}

fn expect_mapping(field: &str, raw: &Value) -> Result<Map<String, Value>, PolicyError> {
    raw.as_object()
        .cloned()
        .ok_or_else(|| PolicyError::invalid_value(field, format!("expected a mapping, got {raw}")))
}
