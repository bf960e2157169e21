//! The field resolution pipeline.
//!
//! Every statement field has two spellings: a lowercase shorthand that goes
//! through reference resolution (`resource: {"s3": "logs"}`) and a capitalized
//! canonical name that is taken literally (`Resource: "arn:aws:s3:::logs"`).
//! A [`StatementSchema`] declares the fields of one statement kind together
//! with its required, conflicting, forbidden and deprecated keys, and
//! [`StatementSchema::resolve`] turns a raw mapping into [`ResolvedFields`].

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use itertools::Itertools;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::context::ResolveContext;
use crate::error::PolicyError;
use crate::types::{
    Effect, PrincipalEntry, ServiceKind, literal_principals, resolve_principals, resolve_resources,
    strings_from_value,
};

/// The name of a field, as the parts its two spellings are built from.
///
/// `["not", "action"]` with an empty separator gives `notaction`/`NotAction`;
/// `["grant", "tokens"]` with the default underscore gives
/// `grant_tokens`/`GrantTokens`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldKey {
    parts: &'static [&'static str],
    separator: &'static str,
}

impl FieldKey {
    pub const fn new(parts: &'static [&'static str]) -> Self {
        FieldKey {
            parts,
            separator: "_",
        }
    }

    pub const fn with_separator(self, separator: &'static str) -> Self {
        FieldKey {
            parts: self.parts,
            separator,
        }
    }

    pub fn shorthand(&self) -> String {
        self.parts.join(self.separator)
    }

    pub fn canonical(&self) -> String {
        self.parts.iter().map(|part| capitalize(part)).collect()
    }

    /// Both spellings, shorthand first. A key whose spellings agree yields one.
    fn spellings(&self) -> Vec<String> {
        let (shorthand, canonical) = (self.shorthand(), self.canonical());
        if shorthand == canonical {
            vec![shorthand]
        } else {
            vec![shorthand, canonical]
        }
    }
}

fn capitalize(part: &str) -> String {
    let mut chars = part.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// How a field's raw value is validated and resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A single string.
    Text,
    /// A single string from a closed set.
    Choice(&'static [&'static str]),
    /// A string or a list of strings.
    Strings,
    /// A free-form mapping, e.g. a condition block.
    Mapping,
    /// Resource references, optionally restricted to some service tags.
    Resources { only: Option<&'static [ServiceKind]> },
    /// Principal references.
    Principals,
}

impl FieldKind {
    fn resolve_shorthand(
        &self,
        ctx: &ResolveContext<'_>,
        field: &str,
        value: &Value,
    ) -> Result<FieldValue, PolicyError> {
        match self {
            FieldKind::Resources { only } => {
                resolve_resources(ctx, field, value, *only).map(FieldValue::List)
            }
            FieldKind::Principals => {
                resolve_principals(ctx, field, value).map(FieldValue::Principals)
            }
            _ => self.accept_canonical(field, value),
        }
    }

    fn accept_canonical(&self, field: &str, value: &Value) -> Result<FieldValue, PolicyError> {
        match (self, value) {
            (FieldKind::Text, Value::String(text)) => Ok(FieldValue::Text(text.clone())),
            (FieldKind::Text, Value::Number(number)) => Ok(FieldValue::Text(number.to_string())),
            (FieldKind::Text, other) => Err(PolicyError::invalid_value(
                field,
                format!("expected a string, got {other}"),
            )),
            (FieldKind::Choice(choices), Value::String(text)) if choices.contains(&text.as_str()) => {
                Ok(FieldValue::Text(text.clone()))
            }
            (FieldKind::Choice(choices), other) => Err(PolicyError::invalid_value(
                field,
                format!("expected one of [{}], got {other}", choices.iter().join(", ")),
            )),
            (FieldKind::Strings | FieldKind::Resources { .. }, value) => {
                strings_from_value(field, value).map(FieldValue::List)
            }
            (FieldKind::Mapping, Value::Object(mapping)) => Ok(FieldValue::Mapping(mapping.clone())),
            (FieldKind::Mapping, other) => Err(PolicyError::invalid_value(
                field,
                format!("expected a mapping, got {other}"),
            )),
            (FieldKind::Principals, value) => {
                literal_principals(field, value).map(FieldValue::Principals)
            }
        }
    }
}

/// A validated field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
    Mapping(Map<String, Value>),
    Principals(Vec<PrincipalEntry>),
}

impl FieldValue {
    /// An empty list resolves to nothing and counts as unset.
    fn is_empty(&self) -> bool {
        match self {
            FieldValue::List(values) => values.is_empty(),
            FieldValue::Principals(entries) => entries.is_empty(),
            FieldValue::Text(_) | FieldValue::Mapping(_) => false,
        }
    }
}

/// The fields of one statement after resolution, keyed by shorthand name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedFields(BTreeMap<String, FieldValue>);

impl ResolvedFields {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn is_set(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) {
        self.0.insert(field.into(), value);
    }

    pub fn take_text(&mut self, field: &str) -> Result<Option<String>, PolicyError> {
        match self.0.remove(field) {
            None => Ok(None),
            Some(FieldValue::Text(text)) => Ok(Some(text)),
            Some(other) => Err(mismatch(field, "a string", &other)),
        }
    }

    /// A list field; a single string counts as a one-element list.
    pub fn take_list(&mut self, field: &str) -> Result<Vec<String>, PolicyError> {
        match self.0.remove(field) {
            None => Ok(Vec::new()),
            Some(FieldValue::List(values)) => Ok(values),
            Some(FieldValue::Text(text)) => Ok(vec![text]),
            Some(other) => Err(mismatch(field, "a list of strings", &other)),
        }
    }

    pub fn take_mapping(&mut self, field: &str) -> Result<Option<Map<String, Value>>, PolicyError> {
        match self.0.remove(field) {
            None => Ok(None),
            Some(FieldValue::Mapping(mapping)) => Ok(Some(mapping)),
            Some(other) => Err(mismatch(field, "a mapping", &other)),
        }
    }

    pub fn take_principals(&mut self, field: &str) -> Result<Vec<PrincipalEntry>, PolicyError> {
        match self.0.remove(field) {
            None => Ok(Vec::new()),
            Some(FieldValue::Principals(entries)) => Ok(entries),
            Some(other) => Err(mismatch(field, "principals", &other)),
        }
    }

    pub fn take_effect(&mut self, field: &str) -> Result<Option<Effect>, PolicyError> {
        self.take_text(field)?
            .map(|text| {
                Effect::from_str(&text).map_err(|_| {
                    PolicyError::invalid_value(field, format!("'{text}' is not Allow or Deny"))
                })
            })
            .transpose()
    }
}

fn mismatch(field: &str, wanted: &str, got: &FieldValue) -> PolicyError {
    PolicyError::invalid_value(field, format!("expected {wanted}, got {got:?}"))
}

/// One declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: FieldKey,
    pub kind: FieldKind,
}

/// The declared shape of one statement kind.
#[derive(Debug, Clone, Default)]
pub struct StatementSchema {
    fields: Vec<FieldSpec>,
    required: Vec<Vec<FieldKey>>,
    conflicts: Vec<Vec<FieldKey>>,
    forbidden: Vec<FieldKey>,
    deprecated: Vec<(String, String)>,
}

impl StatementSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, key: FieldKey, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec { key, kind });
        self
    }

    /// At least one of `group` must be set.
    pub fn require(mut self, group: &[FieldKey]) -> Self {
        self.required.push(group.to_vec());
        self
    }

    /// At most one of `group` may be set.
    pub fn conflict(mut self, group: &[FieldKey]) -> Self {
        self.conflicts.push(group.to_vec());
        self
    }

    /// Neither spelling of `key` may appear at all.
    pub fn forbid(mut self, key: FieldKey) -> Self {
        self.forbidden.push(key);
        self
    }

    /// Reject a raw key outright, explaining what replaced it.
    pub fn deprecate(mut self, key: impl Into<String>, reason: impl Into<String>) -> Self {
        self.deprecated.push((key.into(), reason.into()));
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Run the pipeline over one raw statement mapping.
    pub fn resolve(
        &self,
        ctx: &ResolveContext<'_>,
        raw: &Value,
    ) -> Result<ResolvedFields, PolicyError> {
        let raw = raw.as_object().ok_or_else(|| {
            PolicyError::invalid_value("statement", format!("expected a mapping, got {raw}"))
        })?;

        self.check_deprecated(raw)?;
        self.check_forbidden(raw)?;
        self.warn_unknown(raw);

        let mut resolved = ResolvedFields::default();
        for spec in &self.fields {
            let shorthand = spec.key.shorthand();
            let canonical = spec.key.canonical();
            let value = match (present(raw, &shorthand), present(raw, &canonical)) {
                (Some(short), Some(long)) if shorthand != canonical => {
                    return Err(PolicyError::InvalidFieldUsage {
                        field: shorthand,
                        canonical,
                        shorthand_value: short.to_string(),
                        canonical_value: long.to_string(),
                    });
                }
                (Some(short), _) => spec.kind.resolve_shorthand(ctx, &shorthand, short)?,
                (None, Some(long)) => spec.kind.accept_canonical(&canonical, long)?,
                (None, None) => continue,
            };
            if value.is_empty() {
                continue;
            }
            resolved.insert(shorthand, value);
        }

        self.check_required(&resolved)?;
        self.check_conflicts(&resolved)?;

        debug!(
            event = "Compile",
            phase = "ResolveFields",
            fields = resolved.len(),
            "Statement fields resolved"
        );
        Ok(resolved)
    }

    fn check_deprecated(&self, raw: &Map<String, Value>) -> Result<(), PolicyError> {
        match self.deprecated.iter().find(|(key, _)| raw.contains_key(key)) {
            Some((key, reason)) => Err(PolicyError::DeprecatedKey {
                key: key.clone(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn check_forbidden(&self, raw: &Map<String, Value>) -> Result<(), PolicyError> {
        for key in &self.forbidden {
            if key.spellings().iter().any(|name| raw.contains_key(name)) {
                return Err(PolicyError::ForbiddenField {
                    field: key.shorthand(),
                    canonical: key.canonical(),
                });
            }
        }
        Ok(())
    }

    fn warn_unknown(&self, raw: &Map<String, Value>) {
        let known: BTreeSet<String> = self
            .fields
            .iter()
            .flat_map(|spec| spec.key.spellings())
            .collect();
        for key in raw.keys().filter(|key| !known.contains(*key)) {
            warn!(
                event = "Compile",
                phase = "ResolveFields",
                key = key.as_str(),
                "Ignoring unknown statement key"
            );
        }
    }

    fn check_required(&self, resolved: &ResolvedFields) -> Result<(), PolicyError> {
        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|group| !group.iter().any(|key| resolved.is_set(&key.shorthand())))
            .map(|group| {
                group
                    .iter()
                    .flat_map(FieldKey::spellings)
                    .sorted()
                    .join(" or ")
            })
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PolicyError::MissingRequiredFields { missing })
        }
    }

    fn check_conflicts(&self, resolved: &ResolvedFields) -> Result<(), PolicyError> {
        for group in &self.conflicts {
            let found: Vec<String> = group
                .iter()
                .map(FieldKey::shorthand)
                .filter(|name| resolved.is_set(name))
                .collect();
            if found.len() > 1 {
                return Err(PolicyError::ConflictingFields {
                    group: group.iter().map(FieldKey::shorthand).collect(),
                    found,
                });
            }
        }
        Ok(())
    }
}

/// A key counts as present unless it is absent or `null`.
fn present<'a>(raw: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    raw.get(key).filter(|value| !value.is_null())
}
