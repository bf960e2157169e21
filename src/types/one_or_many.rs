//! The scalar-or-sorted-list shape AWS uses for list-valued policy fields.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::PolicyError;

/// A list-valued field in its canonical wire shape.
///
/// AWS collapses single-element lists to a bare string and reorders longer
/// lists, so the canonical form does the same: one value renders as a scalar,
/// two or more render as a sorted list, and no values means the field is
/// absent altogether.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    /// Build the canonical shape, or `None` when there is nothing to render.
    pub fn canonical<I>(values: I) -> Option<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut values: Vec<String> = values.into_iter().collect();
        match values.len() {
            0 => None,
            1 => values.pop().map(OneOrMany::One),
            _ => Some(OneOrMany::Many(values.into_iter().sorted().collect())),
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => vec![value.clone()],
            OneOrMany::Many(values) => values.clone(),
        }
    }
}

impl From<OneOrMany> for Value {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(value) => Value::String(value),
            OneOrMany::Many(values) => Value::Array(values.into_iter().map(Value::String).collect()),
        }
    }
}

/// Read a "string or list of strings" configuration value.
///
/// Numbers are accepted and stringified since YAML happily turns ids into
/// integers. `null` reads as an empty list.
pub(crate) fn strings_from_value(field: &str, value: &Value) -> Result<Vec<String>, PolicyError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| scalar_to_string(field, item))
            .collect(),
        other => Ok(vec![scalar_to_string(field, other)?]),
    }
}

fn scalar_to_string(field: &str, value: &Value) -> Result<String, PolicyError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(PolicyError::invalid_value(
            field,
            format!("expected a string or a list of strings, got {other}"),
        )),
    }
}
