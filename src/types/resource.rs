//! Symbolic resource references and their expansion into ARNs.
//!
//! A raw resource entry is either a bare string, passed through untouched, or
//! a mapping keyed by exactly one service tag:
//!
//! - `{"iam": "role/x", "account": [..], "users": [..]}`
//! - `{"s3": "bucket/path"}`
//! - `{"kms": "alias" | {"alias": ..} | {"key_id": ..}, "account": [..], "location": ..}`;
//!   `__self__` is accepted as an alias only
//! - `{"arn": "sns", "identity": [..], "account": [..], "location": ..}`
//!
//! Expansion fans out over accounts first and values second, so the same
//! input always produces the same sequence.

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{AsRefStr, Display, EnumString, IntoStaticStr};
use tracing::debug;
use utoipa::ToSchema;

use crate::context::{ResolveContext, SelfType};
use crate::error::PolicyError;
use crate::types::one_or_many::strings_from_value;

/// Placeholder for the entity that owns the policy being compiled.
pub const SELF_MARKER: &str = "__self__";

static NULL: Value = Value::Null;

static SERVICE_TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9-]*$").expect("service tag pattern is a valid regex"));

/// The service tags a resource mapping can be keyed by.
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
    IntoStaticStr,
    ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ServiceKind {
    Iam,
    S3,
    Kms,
    Arn,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::Iam,
        ServiceKind::S3,
        ServiceKind::Kms,
        ServiceKind::Arn,
    ];

    pub fn tag(self) -> &'static str {
        self.into()
    }

    /// Keys that may sit next to the service tag in the same mapping.
    fn modifiers(self) -> &'static [&'static str] {
        match self {
            ServiceKind::Iam => &["account", "users"],
            ServiceKind::S3 => &[],
            ServiceKind::Kms => &["account", "location"],
            ServiceKind::Arn => &["account", "location", "identity"],
        }
    }
}

/// Account and location overrides attached to a reference.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scope {
    /// Account names; empty means the default account.
    pub accounts: Vec<String>,
    /// Region; `None` means the default location.
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KmsKey {
    Alias(String),
    KeyId(String),
}

impl KmsKey {
    /// The key owning the policy is always addressed by its alias.
    fn is_self(&self) -> bool {
        matches!(self, KmsKey::Alias(name) if name == SELF_MARKER)
    }
}

/// One parsed resource entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceReference {
    Literal(String),
    Iam {
        names: Vec<String>,
        users: Vec<String>,
        scope: Scope,
    },
    S3 {
        buckets: Vec<String>,
    },
    Kms {
        keys: Vec<KmsKey>,
        scope: Scope,
    },
    Arn {
        service: String,
        identities: Vec<String>,
        scope: Scope,
    },
}

impl ResourceReference {
    /// Parse a single raw entry (not a list of entries).
    pub fn from_value(field: &str, value: &Value) -> Result<Self, PolicyError> {
        match value {
            Value::String(literal) => Ok(ResourceReference::Literal(literal.clone())),
            Value::Object(entry) => Self::from_mapping(field, entry),
            other => Err(PolicyError::invalid_value(
                field,
                format!("expected a string or a mapping, got {other}"),
            )),
        }
    }

    fn from_mapping(field: &str, entry: &Map<String, Value>) -> Result<Self, PolicyError> {
        let kinds: Vec<ServiceKind> = ServiceKind::ALL
            .into_iter()
            .filter(|kind| entry.contains_key(kind.tag()))
            .collect();
        let kind = match kinds.as_slice() {
            [kind] => *kind,
            [] => {
                return Err(PolicyError::invalid_value(
                    field,
                    format!(
                        "resource mapping needs one of [{}]",
                        ServiceKind::ALL.iter().join(", ")
                    ),
                ));
            }
            many => {
                return Err(PolicyError::invalid_value(
                    field,
                    format!(
                        "resource mapping can only use one service key, found [{}]",
                        many.iter().join(", ")
                    ),
                ));
            }
        };

        if let Some(extra) = entry
            .keys()
            .find(|key| key.as_str() != kind.tag() && !kind.modifiers().contains(&key.as_str()))
        {
            return Err(PolicyError::invalid_value(
                field,
                format!("'{extra}' is not valid in a {kind} reference"),
            ));
        }

        let tagged = entry.get(kind.tag()).unwrap_or(&NULL);
        let scope = Scope {
            accounts: optional_strings(field, entry, "account")?,
            location: optional_string(field, entry, "location")?,
        };

        match kind {
            ServiceKind::Iam => Ok(ResourceReference::Iam {
                names: strings_from_value(field, tagged)?,
                users: optional_strings(field, entry, "users")?,
                scope,
            }),
            ServiceKind::S3 => Ok(ResourceReference::S3 {
                buckets: strings_from_value(field, tagged)?,
            }),
            ServiceKind::Kms => Ok(ResourceReference::Kms {
                keys: kms_keys(field, tagged)?,
                scope,
            }),
            ServiceKind::Arn => {
                let service = match tagged {
                    Value::String(service) => service.clone(),
                    other => {
                        return Err(PolicyError::UnknownService {
                            service: other.to_string(),
                            reason: "the arn service tag must be a string".to_string(),
                        });
                    }
                };
                if !SERVICE_TAG_PATTERN.is_match(&service) {
                    return Err(PolicyError::UnknownService {
                        service,
                        reason: "not a valid AWS service namespace".to_string(),
                    });
                }
                let identities = optional_strings(field, entry, "identity")?;
                if identities.is_empty() {
                    return Err(PolicyError::MissingIdentity);
                }
                Ok(ResourceReference::Arn {
                    service,
                    identities,
                    scope,
                })
            }
        }
    }

    /// An identity-and-access reference built from already extracted parts.
    pub fn iam(names: Vec<String>, users: Vec<String>, accounts: Vec<String>) -> Self {
        ResourceReference::Iam {
            names,
            users,
            scope: Scope {
                accounts,
                location: None,
            },
        }
    }

    /// The service tag, or `None` for a literal.
    pub fn service_kind(&self) -> Option<ServiceKind> {
        match self {
            ResourceReference::Literal(_) => None,
            ResourceReference::Iam { .. } => Some(ServiceKind::Iam),
            ResourceReference::S3 { .. } => Some(ServiceKind::S3),
            ResourceReference::Kms { .. } => Some(ServiceKind::Kms),
            ResourceReference::Arn { .. } => Some(ServiceKind::Arn),
        }
    }

    /// Expand into ARNs in fan-out order.
    pub fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<Vec<String>, PolicyError> {
        match self {
            ResourceReference::Literal(literal) => Ok(vec![literal.clone()]),
            ResourceReference::Iam {
                names,
                users,
                scope,
            } => resolve_iam(ctx, names, users, scope),
            ResourceReference::S3 { buckets } => resolve_s3(ctx, buckets),
            ResourceReference::Kms { keys, scope } => resolve_kms(ctx, keys, scope),
            ResourceReference::Arn {
                service,
                identities,
                scope,
            } => {
                let location = scope.location.as_deref().unwrap_or(ctx.default_location());
                Ok(ctx
                    .account_ids(&scope.accounts)?
                    .into_iter()
                    .cartesian_product(identities.iter())
                    .map(|(account, identity)| {
                        format!("arn:aws:{service}:{location}:{account}:{identity}")
                    })
                    .collect())
            }
        }
    }
}

/// Resolve a resource field: one entry or a list of entries, optionally
/// restricted to some service tags. The union is sorted.
pub fn resolve_resources(
    ctx: &ResolveContext<'_>,
    field: &str,
    value: &Value,
    only: Option<&[ServiceKind]>,
) -> Result<Vec<String>, PolicyError> {
    let entries: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let mut arns = Vec::new();
    for entry in entries {
        let reference = ResourceReference::from_value(field, entry)?;
        if let (Some(only), Some(kind)) = (only, reference.service_kind()) {
            if !only.contains(&kind) {
                return Err(PolicyError::UnsupportedResourceType {
                    wanted: kind.to_string(),
                    available: only.iter().map(ToString::to_string).collect(),
                });
            }
        }
        arns.extend(reference.resolve(ctx)?);
    }
    arns.sort();

    debug!(
        event = "Resolve",
        phase = "Resources",
        field = field,
        count = arns.len(),
        "Resource references expanded"
    );
    Ok(arns)
}

fn resolve_iam(
    ctx: &ResolveContext<'_>,
    names: &[String],
    users: &[String],
    scope: &Scope,
) -> Result<Vec<String>, PolicyError> {
    let (selves, others): (Vec<&String>, Vec<&String>) =
        names.iter().partition(|name| *name == SELF_MARKER);

    let mut arns: Vec<String> = ctx
        .account_ids(&scope.accounts)?
        .into_iter()
        .cartesian_product(others)
        .flat_map(|(account, name)| iam_arns(account, name, users))
        .collect();

    if !selves.is_empty() {
        ctx.require_self(SelfType::Role, "iam role")?;
        let name = format!("role/{}", ctx.self_name());
        arns.extend(iam_arns(ctx.default_account_id()?, &name, users));
    }
    Ok(arns)
}

fn iam_arns(account: &str, name: &str, users: &[String]) -> Vec<String> {
    let service = if name.starts_with("assumed-role") {
        "sts"
    } else {
        "iam"
    };
    let arn = format!("arn:aws:{service}::{account}:{name}");
    if users.is_empty() {
        vec![arn]
    } else {
        users.iter().map(|user| format!("{arn}/{user}")).collect()
    }
}

fn resolve_s3(ctx: &ResolveContext<'_>, buckets: &[String]) -> Result<Vec<String>, PolicyError> {
    let mut arns = Vec::new();
    for bucket in buckets {
        let bucket = match bucket.strip_prefix(SELF_MARKER) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => {
                ctx.require_self(SelfType::Bucket, "bucket")?;
                format!("{}{rest}", ctx.self_name())
            }
            _ => bucket.clone(),
        };
        arns.push(format!("arn:aws:s3:::{bucket}"));
        if !bucket.contains('/') {
            arns.push(format!("arn:aws:s3:::{bucket}/*"));
        }
    }
    Ok(arns)
}

fn resolve_kms(
    ctx: &ResolveContext<'_>,
    keys: &[KmsKey],
    scope: &Scope,
) -> Result<Vec<String>, PolicyError> {
    if keys.iter().any(KmsKey::is_self) {
        ctx.require_self(SelfType::Key, "key")?;
    }
    let location = scope.location.as_deref().unwrap_or(ctx.default_location());

    Ok(ctx
        .account_ids(&scope.accounts)?
        .into_iter()
        .cartesian_product(keys)
        .map(|(account, key)| {
            if key.is_self() {
                format!(
                    "arn:aws:kms:{}:{account}:alias/{}",
                    ctx.default_location(),
                    ctx.self_name()
                )
            } else {
                match key {
                    KmsKey::Alias(alias) => format!("arn:aws:kms:{location}:{account}:alias/{alias}"),
                    KmsKey::KeyId(id) => format!("arn:aws:kms:{location}:{account}:key/{id}"),
                }
            }
        })
        .collect())
}

fn kms_keys(field: &str, value: &Value) -> Result<Vec<KmsKey>, PolicyError> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(alias) => Ok(KmsKey::Alias(alias.clone())),
            Value::Object(key) => match (key.get("alias"), key.get("key_id")) {
                (Some(Value::String(alias)), None) => Ok(KmsKey::Alias(alias.clone())),
                (None, Some(Value::String(id))) if id == SELF_MARKER => Err(PolicyError::invalid_value(
                    field,
                    format!("'{SELF_MARKER}' names a key by alias, not by key_id"),
                )),
                (None, Some(Value::String(id))) => Ok(KmsKey::KeyId(id.clone())),
                _ => Err(PolicyError::invalid_value(
                    field,
                    "a kms key mapping needs exactly one of 'alias' or 'key_id'",
                )),
            },
            other => Err(PolicyError::invalid_value(
                field,
                format!("expected a kms alias or key mapping, got {other}"),
            )),
        })
        .collect()
}

fn optional_strings(
    field: &str,
    entry: &Map<String, Value>,
    key: &str,
) -> Result<Vec<String>, PolicyError> {
    match entry.get(key) {
        Some(value) => strings_from_value(&format!("{field}.{key}"), value),
        None => Ok(Vec::new()),
    }
}

fn optional_string(
    field: &str,
    entry: &Map<String, Value>,
    key: &str,
) -> Result<Option<String>, PolicyError> {
    match entry.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(other) => Err(PolicyError::invalid_value(
            format!("{field}.{key}"),
            format!("expected a string, got {other}"),
        )),
    }
}
