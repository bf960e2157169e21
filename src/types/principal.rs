//! Principals: who a resource policy or trust statement applies to.

use std::collections::BTreeMap;
use std::str::FromStr;

use itertools::{Either, Itertools};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{AsRefStr, Display, EnumString, IntoStaticStr};
use tracing::debug;
use utoipa::ToSchema;

use crate::context::ResolveContext;
use crate::error::PolicyError;
use crate::types::one_or_many::{OneOrMany, strings_from_value};
use crate::types::resource::ResourceReference;

/// Short service names accepted by the `service` principal shorthand.
const SERVICE_DOMAINS: &[(&str, &str)] = &[
    ("apigateway", "apigateway.amazonaws.com"),
    ("ec2", "ec2.amazonaws.com"),
    ("lambda", "lambda.amazonaws.com"),
];

/// The canonical principal buckets.
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
pub enum PrincipalType {
    #[serde(rename = "AWS")]
    #[strum(serialize = "AWS")]
    Aws,
    Federated,
    Service,
}

/// A canonical principal mapping, e.g. `{"AWS": [..], "Service": ".."}`.
///
/// Only non-empty buckets are kept and every bucket is in the canonical
/// scalar-or-sorted-list shape.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Principal(BTreeMap<PrincipalType, OneOrMany>);

impl Principal {
    pub fn from_buckets(buckets: BTreeMap<PrincipalType, Vec<String>>) -> Self {
        Principal(
            buckets
                .into_iter()
                .filter_map(|(kind, values)| OneOrMany::canonical(values).map(|v| (kind, v)))
                .collect(),
        )
    }

    pub fn get(&self, kind: PrincipalType) -> Option<&OneOrMany> {
        self.0.get(&kind)
    }

    pub fn contains(&self, kind: PrincipalType) -> bool {
        self.0.contains_key(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(kind, values)| (kind.to_string(), Value::from(values.clone())))
                .collect(),
        )
    }
}

/// One principal entry of a statement, before merging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrincipalEntry {
    /// A bare string such as `"*"`.
    Literal(String),
    Mapping(Principal),
}

impl PrincipalEntry {
    pub fn to_value(&self) -> Value {
        match self {
            PrincipalEntry::Literal(literal) => Value::String(literal.clone()),
            PrincipalEntry::Mapping(principal) => principal.to_value(),
        }
    }

    pub fn contains(&self, kind: PrincipalType) -> bool {
        match self {
            PrincipalEntry::Literal(_) => false,
            PrincipalEntry::Mapping(principal) => principal.contains(kind),
        }
    }
}

/// Resolve a shorthand principal value: a string, a mapping, or a list of them.
pub fn resolve_principals(
    ctx: &ResolveContext<'_>,
    field: &str,
    value: &Value,
) -> Result<Vec<PrincipalEntry>, PolicyError> {
    entries(value)
        .map(|entry| match entry {
            Value::String(literal) => Ok(PrincipalEntry::Literal(literal.clone())),
            Value::Object(mapping) => {
                resolve_principal_mapping(ctx, field, mapping).map(PrincipalEntry::Mapping)
            }
            other => Err(not_a_principal(field, other)),
        })
        .collect()
}

/// Accept an already canonical principal value without resolving anything.
pub fn literal_principals(field: &str, value: &Value) -> Result<Vec<PrincipalEntry>, PolicyError> {
    entries(value)
        .map(|entry| match entry {
            Value::String(literal) => Ok(PrincipalEntry::Literal(literal.clone())),
            Value::Object(mapping) => {
                let mut buckets: BTreeMap<PrincipalType, Vec<String>> = BTreeMap::new();
                for (key, values) in mapping {
                    let kind = PrincipalType::from_str(key).map_err(|_| {
                        PolicyError::invalid_value(
                            field,
                            format!("'{key}' is not one of AWS, Service or Federated"),
                        )
                    })?;
                    buckets
                        .entry(kind)
                        .or_default()
                        .extend(strings_from_value(field, values)?);
                }
                Ok(PrincipalEntry::Mapping(Principal::from_buckets(buckets)))
            }
            other => Err(not_a_principal(field, other)),
        })
        .collect()
}

/// Merge the entries of one statement into the single value AWS expects.
///
/// Mappings merge bucket by bucket. A single string stands on its own, but
/// more than one string, or a string next to any mapping, cannot be merged.
pub fn merge_principals(entries: &[PrincipalEntry]) -> Result<Option<PrincipalEntry>, PolicyError> {
    let (literals, mappings): (Vec<&String>, Vec<&Principal>) =
        entries.iter().partition_map(|entry| match entry {
            PrincipalEntry::Literal(literal) => Either::Left(literal),
            PrincipalEntry::Mapping(principal) => Either::Right(principal),
        });

    match (literals.as_slice(), mappings.is_empty()) {
        ([], true) => Ok(None),
        ([literal], true) => Ok(Some(PrincipalEntry::Literal((*literal).clone()))),
        ([], false) => {
            let mut buckets: BTreeMap<PrincipalType, Vec<String>> = BTreeMap::new();
            for principal in mappings {
                for (kind, values) in &principal.0 {
                    buckets.entry(*kind).or_default().extend(values.to_vec());
                }
            }
            let merged = Principal::from_buckets(buckets);
            Ok((!merged.is_empty()).then_some(PrincipalEntry::Mapping(merged)))
        }
        ([literal], false) => Err(PolicyError::PrincipalMergeConflict {
            reason: format!("string principal '{literal}' cannot be combined with mapping principals"),
        }),
        (many, _) => Err(PolicyError::PrincipalMergeConflict {
            reason: format!(
                "only one string principal is allowed, got [{}]",
                many.iter().join(", ")
            ),
        }),
    }
}

fn resolve_principal_mapping(
    ctx: &ResolveContext<'_>,
    field: &str,
    mapping: &Map<String, Value>,
) -> Result<Principal, PolicyError> {
    if !mapping.contains_key("iam") && !mapping.contains_key("federated") {
        if let Some(modifier) = ["account", "users"]
            .into_iter()
            .find(|key| mapping.contains_key(*key))
        {
            return Err(PolicyError::invalid_value(
                field,
                format!("'{modifier}' only applies to 'iam' or 'federated' principals"),
            ));
        }
    }

    let mut buckets: BTreeMap<PrincipalType, Vec<String>> = BTreeMap::new();
    for (key, value) in mapping {
        match key.as_str() {
            "service" => {
                let bucket = buckets.entry(PrincipalType::Service).or_default();
                for name in strings_from_value(field, value)? {
                    bucket.push(service_domain(&name)?.to_string());
                }
            }
            "iam" | "federated" => {
                let kind = if key == "iam" {
                    PrincipalType::Aws
                } else {
                    PrincipalType::Federated
                };
                let reference = ResourceReference::iam(
                    strings_from_value(field, value)?,
                    optional_strings(field, mapping, "users")?,
                    optional_strings(field, mapping, "account")?,
                );
                buckets
                    .entry(kind)
                    .or_default()
                    .extend(reference.resolve(ctx)?);
            }
            "account" | "users" => {}
            other => match PrincipalType::from_str(other) {
                Ok(kind) => buckets
                    .entry(kind)
                    .or_default()
                    .extend(strings_from_value(field, value)?),
                Err(_) => {
                    return Err(PolicyError::invalid_value(
                        field,
                        format!("unknown principal key '{other}'"),
                    ));
                }
            },
        }
    }

    let principal = Principal::from_buckets(buckets);
    debug!(
        event = "Resolve",
        phase = "Principal",
        field = field,
        buckets = principal.0.len(),
        "Principal shorthand resolved"
    );
    Ok(principal)
}

fn service_domain(name: &str) -> Result<&'static str, PolicyError> {
    SERVICE_DOMAINS
        .iter()
        .find(|(short, _)| *short == name)
        .map(|(_, domain)| *domain)
        .ok_or_else(|| PolicyError::UnknownService {
            service: name.to_string(),
            reason: format!(
                "known principal services are [{}]",
                SERVICE_DOMAINS.iter().map(|(short, _)| short).join(", ")
            ),
        })
}

fn optional_strings(
    field: &str,
    mapping: &Map<String, Value>,
    key: &str,
) -> Result<Vec<String>, PolicyError> {
    mapping
        .get(key)
        .map_or(Ok(Vec::new()), |value| strings_from_value(field, value))
}

fn entries(value: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match value {
        Value::Array(items) => Box::new(items.iter()),
        other => Box::new(std::iter::once(other)),
    }
}

fn not_a_principal(field: &str, value: &Value) -> PolicyError {
    PolicyError::invalid_value(
        field,
        format!("expected a string or a principal mapping, got {value}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{EnvironmentConfig, SelfType};
    use serde_json::json;
    use yare::parameterized;

    fn config() -> EnvironmentConfig {
        EnvironmentConfig::new(
            "stg",
            "ap-southeast-2",
            [("stg", "111111111111"), ("dev", "222222222222")],
        )
        .unwrap()
    }

    fn resolve(value: Value) -> Result<Option<Value>, PolicyError> {
        let config = config();
        let ctx = ResolveContext::new(&config, SelfType::Role, "deploy");
        let entries = resolve_principals(&ctx, "principal", &value)?;
        Ok(merge_principals(&entries)?.map(|merged| merged.to_value()))
    }

    #[parameterized(
        star = { json!("*"), json!("*") },
        iam_root = { json!({"iam": "root"}), json!({"AWS": "arn:aws:iam::111111111111:root"}) },
        iam_with_account = {
            json!({"iam": "role/x", "account": "dev"}),
            json!({"AWS": "arn:aws:iam::222222222222:role/x"})
        },
        iam_with_users = {
            json!({"iam": "assumed-role/ops", "users": ["bob", "amy"]}),
            json!({"AWS": [
                "arn:aws:sts::111111111111:assumed-role/ops/amy",
                "arn:aws:sts::111111111111:assumed-role/ops/bob"
            ]})
        },
        iam_self = { json!({"iam": "__self__"}), json!({"AWS": "arn:aws:iam::111111111111:role/deploy"}) },
        service = { json!({"service": "ec2"}), json!({"Service": "ec2.amazonaws.com"}) },
        services_sorted = {
            json!({"service": ["lambda", "apigateway"]}),
            json!({"Service": ["apigateway.amazonaws.com", "lambda.amazonaws.com"]})
        },
        federated = {
            json!({"federated": "saml-provider/idp"}),
            json!({"Federated": "arn:aws:iam::111111111111:saml-provider/idp"})
        },
        canonical_inside_shorthand = {
            json!({"AWS": "arn:aws:iam::333333333333:root", "iam": "root"}),
            json!({"AWS": ["arn:aws:iam::111111111111:root", "arn:aws:iam::333333333333:root"]})
        },
        merged_entries = {
            json!([{"iam": "root"}, {"service": "ec2"}, {"iam": "role/a"}]),
            json!({
                "AWS": ["arn:aws:iam::111111111111:role/a", "arn:aws:iam::111111111111:root"],
                "Service": "ec2.amazonaws.com"
            })
        },
    )]
    fn test_resolve_and_merge(value: Value, expected: Value) {
        assert_eq!(resolve(value).unwrap(), Some(expected));
    }

    #[test]
    fn test_empty_buckets_are_dropped() {
        assert_eq!(resolve(json!({"AWS": []})).unwrap(), None);
        assert_eq!(resolve(json!([])).unwrap(), None);
    }

    #[test]
    fn test_shorthand_matches_canonical() {
        let config = config();
        let ctx = ResolveContext::new(&config, SelfType::Role, "deploy");
        let shorthand = resolve_principals(&ctx, "principal", &json!({"iam": "role/x"})).unwrap();
        let canonical =
            literal_principals("Principal", &json!({"AWS": "arn:aws:iam::111111111111:role/x"}))
                .unwrap();
        assert_eq!(shorthand, canonical);
    }

    #[test]
    fn test_unknown_service_shorthand() {
        let err = resolve(json!({"service": "s3"})).unwrap_err();
        assert_eq!(
            err,
            PolicyError::UnknownService {
                service: "s3".to_string(),
                reason: "known principal services are [apigateway, ec2, lambda]".to_string(),
            }
        );
    }

    #[parameterized(
        unknown_shorthand_key = { json!({"role": "x"}) },
        number = { json!(7) },
    )]
    fn test_rejects_malformed_principals(value: Value) {
        assert!(matches!(resolve(value).unwrap_err(), PolicyError::InvalidValue { .. }));
    }

    #[parameterized(
        service_with_account = { json!({"service": "ec2", "account": "nope"}), "account" },
        service_with_users = { json!({"service": "ec2", "users": ["bob"]}), "users" },
        canonical_with_account = { json!({"AWS": "arn:aws:iam::1:root", "account": "dev"}), "account" },
    )]
    fn test_modifiers_need_an_iam_principal(value: Value, modifier: &str) {
        match resolve(value).unwrap_err() {
            PolicyError::InvalidValue { field, reason } => {
                assert_eq!(field, "principal");
                assert!(reason.starts_with(&format!("'{modifier}'")), "{reason}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_literal_principals_reject_unknown_buckets() {
        let err = literal_principals("Principal", &json!({"iam": "root"})).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidValue { field, .. } if field == "Principal"));
    }

    #[parameterized(
        two_strings = { json!(["*", "arn:aws:iam::1:root"]) },
        string_and_mapping = { json!(["*", {"iam": "root"}]) },
        mapping_and_string = { json!([{"iam": "root"}, "*"]) },
    )]
    fn test_merge_conflicts(value: Value) {
        assert!(matches!(
            resolve(value).unwrap_err(),
            PolicyError::PrincipalMergeConflict { .. }
        ));
    }

    #[test]
    fn test_entry_contains() {
        let config = config();
        let ctx = ResolveContext::new(&config, SelfType::Role, "deploy");
        let entries =
            resolve_principals(&ctx, "principal", &json!({"federated": "saml-provider/x"})).unwrap();
        assert!(entries[0].contains(PrincipalType::Federated));
        assert!(!entries[0].contains(PrincipalType::Aws));
        assert!(!PrincipalEntry::Literal("*".to_string()).contains(PrincipalType::Aws));
    }

    #[test]
    fn test_principal_type_names() {
        assert_eq!(PrincipalType::Aws.to_string(), "AWS");
        assert_eq!(PrincipalType::from_str("Federated").unwrap(), PrincipalType::Federated);
        assert_eq!(serde_json::to_value(PrincipalType::Aws).unwrap(), json!("AWS"));
    }
}
