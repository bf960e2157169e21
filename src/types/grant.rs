//! KMS grants, the statement kind the key-management API manages outside the
//! key policy document.

use std::collections::BTreeMap;

use itertools::Itertools;
use serde_json::{Map, Value};

use crate::error::PolicyError;
use crate::fields::ResolvedFields;
use crate::schema::StatementKind;
use crate::traits::{FromResolvedFields, RenderStatement};
use crate::types::statement::{insert_list, into_map};

/// A KMS grant, rendered with the key-management API's argument names.
///
/// `Operations` and `GrantTokens` are API list arguments and stay lists even
/// with a single element; the principals follow the usual collapse rule.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GrantStatement {
    pub grantee: Vec<String>,
    pub retiree: Vec<String>,
    pub operations: Vec<String>,
    pub constraints: Option<Map<String, Value>>,
    pub grant_tokens: Vec<String>,
}

impl FromResolvedFields for GrantStatement {
    fn from_fields(mut fields: ResolvedFields) -> Result<Self, PolicyError> {
        Ok(GrantStatement {
            grantee: fields.take_list("grantee")?,
            retiree: fields.take_list("retiree")?,
            operations: fields.take_list("operations")?,
            constraints: fields.take_mapping("constraints")?,
            grant_tokens: fields.take_list("grant_tokens")?,
        })
    }
}

impl RenderStatement for GrantStatement {
    fn kind(&self) -> StatementKind {
        StatementKind::Grant
    }

    fn render(&self) -> Result<Map<String, Value>, PolicyError> {
        let mut out = BTreeMap::new();
        insert_list(&mut out, "GranteePrincipal", &self.grantee);
        insert_list(&mut out, "RetireePrincipal", &self.retiree);
        insert_sorted(&mut out, "Operations", &self.operations);
        if let Some(constraints) = &self.constraints {
            out.insert("Constraints", Value::Object(constraints.clone()));
        }
        insert_sorted(&mut out, "GrantTokens", &self.grant_tokens);
        Ok(into_map(out))
    }
}

fn insert_sorted(out: &mut BTreeMap<&'static str, Value>, key: &'static str, values: &[String]) {
    if !values.is_empty() {
        out.insert(
            key,
            Value::Array(values.iter().sorted().cloned().map(Value::String).collect()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_grant_render() {
        let grant = GrantStatement {
            grantee: vec!["arn:aws:iam::1:role/app".to_string()],
            operations: vec!["Encrypt".to_string(), "Decrypt".to_string()],
            grant_tokens: vec!["token".to_string()],
            ..Default::default()
        };
        assert_eq!(
            grant.render_value().unwrap(),
            json!({
                "GranteePrincipal": "arn:aws:iam::1:role/app",
                "Operations": ["Decrypt", "Encrypt"],
                "GrantTokens": ["token"]
            })
        );
    }

    #[test]
    fn test_single_operation_stays_a_list() {
        let grant = GrantStatement {
            operations: vec!["Decrypt".to_string()],
            retiree: vec!["arn:aws:iam::1:role/ops".to_string()],
            constraints: Some(Map::from_iter([(
                "EncryptionContextSubset".to_string(),
                json!({"app": "x"}),
            )])),
            ..Default::default()
        };
        assert_eq!(
            grant.render_value().unwrap(),
            json!({
                "RetireePrincipal": "arn:aws:iam::1:role/ops",
                "Operations": ["Decrypt"],
                "Constraints": {"EncryptionContextSubset": {"app": "x"}}
            })
        );
    }

    #[test]
    fn test_empty_grant_renders_empty() {
        assert_eq!(GrantStatement::default().render_value().unwrap(), json!({}));
        assert_eq!(GrantStatement::default().kind(), StatementKind::Grant);
    }
}
