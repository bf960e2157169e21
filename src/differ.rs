//! Semantic comparison of policy documents and KMS grant reconciliation.
//!
//! AWS hands documents back with principal and action lists reordered, so
//! both sides are normalised before comparing. The verdict is what matters:
//! an empty diff means the documents are equivalent.

use std::cmp::max;

use itertools::Itertools;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::PolicyError;
use crate::traits::RenderStatement;
use crate::types::{GrantStatement, PrincipalType};

const SORTED_STATEMENT_KEYS: [&str; 4] = ["Action", "NotAction", "Resource", "NotResource"];
const PRINCIPAL_KEYS: [&str; 2] = ["Principal", "NotPrincipal"];
const IGNORED_GRANT_KEYS: [&str; 2] = ["GrantId", "IssuingAccount"];

/// One side of a comparison: serialized text or an already parsed value.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffInput {
    Text(String),
    Value(Value),
}

impl From<&str> for DiffInput {
    fn from(text: &str) -> Self {
        DiffInput::Text(text.to_string())
    }
}

impl From<String> for DiffInput {
    fn from(text: String) -> Self {
        DiffInput::Text(text)
    }
}

impl From<Value> for DiffInput {
    fn from(value: Value) -> Self {
        DiffInput::Value(value)
    }
}

impl From<&Value> for DiffInput {
    fn from(value: &Value) -> Self {
        DiffInput::Value(value.clone())
    }
}

impl DiffInput {
    fn parse(self) -> Result<Value, serde_json::Error> {
        match self {
            DiffInput::Text(text) => serde_json::from_str(&text),
            DiffInput::Value(value) => Ok(value),
        }
    }
}

/// Compare the current document with the wanted one.
///
/// Returns human readable change lines, empty when both are equivalent. A
/// side that fails to parse yields a single line with the parse error.
pub fn diff(current: impl Into<DiffInput>, new: impl Into<DiffInput>) -> Vec<String> {
    let (mut current, mut new) = match (current.into().parse(), new.into().parse()) {
        (Ok(current), Ok(new)) => (current, new),
        (Err(error), _) | (_, Err(error)) => {
            warn!(
                event = "Diff",
                phase = "Parse",
                error = %error,
                "Failed to convert document into json"
            );
            return vec![error.to_string()];
        }
    };

    normalise(&mut current);
    normalise(&mut new);
    if current == new {
        return Vec::new();
    }

    let mut lines = vec!["--- current".to_string(), "+++ new".to_string()];
    compare("", &current, &new, &mut lines);
    debug!(
        event = "Diff",
        phase = "Compare",
        changes = lines.len() - 2,
        "Documents differ"
    );
    lines
}

/// Put a document, a statement list or a single statement into the order
/// used for comparison.
pub fn normalise(value: &mut Value) {
    match value {
        Value::Array(items) => items.iter_mut().for_each(normalise),
        Value::Object(object) => match object.get_mut("Statement") {
            Some(statements) => normalise(statements),
            None => normalise_statement(object),
        },
        _ => {}
    }
}

fn normalise_statement(statement: &mut Map<String, Value>) {
    for key in PRINCIPAL_KEYS {
        if let Some(Value::Object(principal)) = statement.get_mut(key) {
            for kind in [
                PrincipalType::Aws,
                PrincipalType::Federated,
                PrincipalType::Service,
            ] {
                let name: &'static str = kind.into();
                sort_list(principal.get_mut(name));
            }
        }
    }
    for key in SORTED_STATEMENT_KEYS {
        sort_list(statement.get_mut(key));
    }
}

fn sort_list(value: Option<&mut Value>) {
    if let Some(Value::Array(items)) = value {
        items.sort_by_cached_key(sort_key);
    }
}

fn sort_key(value: &Value) -> (u8, String) {
    match value {
        Value::String(text) => (0, text.clone()),
        other => (1, other.to_string()),
    }
}

fn compare(path: &str, current: &Value, new: &Value, lines: &mut Vec<String>) {
    if current == new {
        return;
    }
    match (current, new) {
        (Value::Object(current), Value::Object(new)) => {
            for key in current.keys().chain(new.keys()).sorted().dedup() {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                match (current.get(key), new.get(key)) {
                    (Some(before), Some(after)) => compare(&child, before, after, lines),
                    (Some(before), None) => lines.push(format!("-{child}: {before}")),
                    (None, Some(after)) => lines.push(format!("+{child}: {after}")),
                    (None, None) => {}
                }
            }
        }
        (Value::Array(current), Value::Array(new)) => {
            for index in 0..max(current.len(), new.len()) {
                let child = format!("{path}[{index}]");
                match (current.get(index), new.get(index)) {
                    (Some(before), Some(after)) => compare(&child, before, after, lines),
                    (Some(before), None) => lines.push(format!("-{child}: {before}")),
                    (None, Some(after)) => lines.push(format!("+{child}: {after}")),
                    (None, None) => {}
                }
            }
        }
        _ => {
            let shown = if path.is_empty() { "." } else { path };
            lines.push(format!("-{shown}: {current}"));
            lines.push(format!("+{shown}: {new}"));
        }
    }
}

/// What to do to a key's grants to reach the wanted set.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct GrantPlan {
    /// Wanted grants, rendered, that no current grant matches.
    pub create: Vec<Value>,
    /// Current grants that no wanted grant matches.
    pub revoke: Vec<Value>,
}

impl GrantPlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.revoke.is_empty()
    }
}

/// Work out which grants to create and which to revoke.
///
/// `current` is what the key-management API lists for the key.
pub fn plan_grants(current: &[Value], wanted: &[GrantStatement]) -> Result<GrantPlan, PolicyError> {
    let current: Vec<&Map<String, Value>> = current
        .iter()
        .map(|grant| {
            grant.as_object().ok_or_else(|| {
                PolicyError::invalid_value("grants", format!("expected a mapping, got {grant}"))
            })
        })
        .try_collect()?;
    let wanted: Vec<Map<String, Value>> = wanted
        .iter()
        .map(RenderStatement::render)
        .try_collect()?;

    let create: Vec<Value> = wanted
        .iter()
        .filter(|grant| !current.iter().any(|candidate| grant_matches(grant, candidate)))
        .map(|grant| Value::Object(grant.clone()))
        .collect();
    let revoke: Vec<Value> = current
        .iter()
        .filter(|grant| !wanted.iter().any(|candidate| grant_matches(grant, candidate)))
        .map(|grant| Value::Object((*grant).clone()))
        .collect();

    debug!(
        event = "Diff",
        phase = "Grants",
        create = create.len(),
        revoke = revoke.len(),
        "Grant plan computed"
    );
    Ok(GrantPlan { create, revoke })
}

/// Does `candidate` satisfy every key of `grant`?
fn grant_matches(grant: &Map<String, Value>, candidate: &Map<String, Value>) -> bool {
    grant
        .iter()
        .filter(|(key, _)| !IGNORED_GRANT_KEYS.contains(&key.as_str()))
        .all(|(key, value)| match value {
            Value::Array(items) => match candidate.get(key) {
                Some(Value::Array(other)) => sorted(items) == sorted(other),
                _ => false,
            },
            _ => candidate.get(key).is_none_or(|other| other == value),
        })
}

fn sorted(items: &[Value]) -> Vec<&Value> {
    items.iter().sorted_by_cached_key(|item| sort_key(item)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use yare::parameterized;

    fn document(statement: Value) -> Value {
        json!({"Version": "2012-10-17", "Statement": [statement]})
    }

    #[test]
    fn test_equal_documents_have_no_diff() {
        let doc = document(json!({"Effect": "Allow", "Action": "s3:*", "Resource": "*"}));
        assert!(diff(&doc, &doc).is_empty());
    }

    #[test]
    fn test_reordered_lists_are_equal() {
        let current = document(json!({
            "Effect": "Allow",
            "Action": ["b", "a"],
            "Principal": {"AWS": ["y", "x"], "Service": ["s2", "s1"]},
        }));
        let new = document(json!({
            "Effect": "Allow",
            "Action": ["a", "b"],
            "Principal": {"AWS": ["x", "y"], "Service": ["s1", "s2"]},
        }));
        assert_eq!(diff(current, new), Vec::<String>::new());
    }

    #[test]
    fn test_text_and_value_inputs_compare_equal() {
        let value = document(json!({"Effect": "Allow", "NotResource": ["b", "a"]}));
        let text = r#"{"Version": "2012-10-17", "Statement": [{"NotResource": ["a", "b"], "Effect": "Allow"}]}"#;
        assert!(diff(text, value).is_empty());
    }

    #[parameterized(
        bare_statement = { json!({"Action": ["b", "a"]}), json!({"Action": ["a", "b"]}) },
        statement_list = { json!([{"Resource": ["b", "a"]}]), json!([{"Resource": ["a", "b"]}]) },
        single_statement_document = {
            json!({"Statement": {"NotAction": ["b", "a"]}}),
            json!({"Statement": {"NotAction": ["a", "b"]}})
        },
    )]
    fn test_normalise_finds_statements(current: Value, new: Value) {
        assert!(diff(current, new).is_empty());
    }

    #[test]
    fn test_nested_condition_lists_keep_their_order() {
        let current = json!({"Condition": {"StringEquals": {"k": ["b", "a"]}}});
        let new = json!({"Condition": {"StringEquals": {"k": ["a", "b"]}}});
        assert!(!diff(current, new).is_empty());
    }

    #[test]
    fn test_changed_value_lines() {
        let current = document(json!({"Effect": "Allow", "Principal": {"AWS": "arn:a"}}));
        let new = document(json!({"Effect": "Deny", "Principal": {"AWS": "arn:a"}, "Sid": ""}));
        assert_eq!(
            diff(current, new),
            vec![
                "--- current",
                "+++ new",
                "-Statement[0].Effect: \"Allow\"",
                "+Statement[0].Effect: \"Deny\"",
                "+Statement[0].Sid: \"\"",
            ]
        );
    }

    #[test]
    fn test_added_and_removed_statements() {
        let current = json!({"Statement": [{"Sid": "a"}]});
        let new = json!({"Statement": [{"Sid": "a"}, {"Sid": "b"}]});
        assert_eq!(
            diff(&current, &new),
            vec!["--- current", "+++ new", "+Statement[1]: {\"Sid\":\"b\"}"]
        );
        assert_eq!(
            diff(&new, &current),
            vec!["--- current", "+++ new", "-Statement[1]: {\"Sid\":\"b\"}"]
        );
    }

    #[test]
    fn test_root_scalar_change() {
        assert_eq!(
            diff(json!(1), json!(2)),
            vec!["--- current", "+++ new", "-.: 1", "+.: 2"]
        );
    }

    #[parameterized(
        current_broken = { "{", "{}" },
        new_broken = { "{}", "not json" },
    )]
    fn test_parse_failure_is_a_single_line(current: &str, new: &str) {
        let lines = diff(current, new);
        assert_eq!(lines.len(), 1);
        assert!(!lines[0].is_empty());
    }

    fn grant(grantee: &str, operations: &[&str]) -> GrantStatement {
        GrantStatement {
            grantee: vec![grantee.to_string()],
            operations: operations.iter().map(|op| op.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_grants_matches_ignoring_ids_and_order() {
        let current = vec![json!({
            "GrantId": "g-1",
            "IssuingAccount": "arn:aws:iam::1:root",
            "GranteePrincipal": "arn:aws:iam::1:role/app",
            "Operations": ["Encrypt", "Decrypt"],
        })];
        let wanted = vec![grant("arn:aws:iam::1:role/app", &["Decrypt", "Encrypt"])];
        let plan = plan_grants(&current, &wanted).unwrap();
        assert!(plan.is_empty(), "{plan:?}");
    }

    #[test]
    fn test_plan_grants_creates_and_revokes() {
        let current = vec![json!({
            "GrantId": "g-1",
            "GranteePrincipal": "arn:aws:iam::1:role/old",
            "Operations": ["Decrypt"],
        })];
        let wanted = vec![grant("arn:aws:iam::1:role/new", &["Decrypt"])];
        let plan = plan_grants(&current, &wanted).unwrap();
        assert_eq!(
            plan,
            GrantPlan {
                create: vec![json!({
                    "GranteePrincipal": "arn:aws:iam::1:role/new",
                    "Operations": ["Decrypt"],
                })],
                revoke: current.clone(),
            }
        );
    }

    #[test]
    fn test_missing_list_key_is_a_mismatch() {
        let current = vec![json!({"GranteePrincipal": "arn:aws:iam::1:role/app"})];
        let wanted = vec![grant("arn:aws:iam::1:role/app", &["Decrypt"])];
        let plan = plan_grants(&current, &wanted).unwrap();
        assert_eq!(plan.create.len(), 1);
        assert!(plan.revoke.is_empty(), "current grant is covered by the wanted one");
    }

    #[test]
    fn test_plan_grants_rejects_non_mappings() {
        let err = plan_grants(&[json!("g-1")], &[]).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidValue { field, .. } if field == "grants"));
    }
}
