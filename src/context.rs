//! Environment configuration and the per-statement resolution context.
//!
//! A [`ResolveContext`] carries everything symbolic references need to turn
//! into concrete ARNs: the account table, the default account and location,
//! and the identity of the entity owning the policy (used for `__self__`).

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::error::PolicyError;

static ACCOUNT_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{12}$").expect("account id pattern is a valid regex"));

/// The kind of entity a policy is attached to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SelfType {
    Role,
    Bucket,
    Key,
    Lambda,
}

/// Account table and defaults for one deployment environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct EnvironmentConfig {
    /// Name of the current environment; must be a key of `accounts`.
    pub environment: String,
    /// Default region, e.g. `ap-southeast-2`.
    pub location: String,
    /// Account name to account id.
    pub accounts: BTreeMap<String, String>,
}

impl EnvironmentConfig {
    pub fn new<I, K, V>(
        environment: impl Into<String>,
        location: impl Into<String>,
        accounts: I,
    ) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let config = EnvironmentConfig {
            environment: environment.into(),
            location: location.into(),
            accounts: accounts
                .into_iter()
                .map(|(name, id)| (name.into(), id.into()))
                .collect(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a configuration from JSON.
    pub fn from_json_str(text: &str) -> Result<Self, PolicyError> {
        let config: EnvironmentConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        self.account_id(&self.environment)?;
        for (name, id) in &self.accounts {
            if !ACCOUNT_ID_PATTERN.is_match(id) {
                warn!(
                    event = "Config",
                    phase = "Validate",
                    account = name.as_str(),
                    id = id.as_str(),
                    "Account id is not a 12 digit number"
                );
            }
        }
        debug!(
            event = "Config",
            phase = "Validate",
            environment = self.environment.as_str(),
            accounts = self.accounts.len(),
            "Environment config validated"
        );
        Ok(())
    }

    /// Look up an account id by account name.
    pub fn account_id(&self, name: &str) -> Result<&str, PolicyError> {
        self.accounts
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| PolicyError::UnknownAccount {
                account: name.to_string(),
                available: self.account_names(),
            })
    }

    pub fn default_account_id(&self) -> Result<&str, PolicyError> {
        self.account_id(&self.environment)
    }

    pub fn account_names(&self) -> Vec<String> {
        self.accounts.keys().cloned().collect()
    }
}

/// Everything a statement needs while its shorthand is being resolved.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    config: &'a EnvironmentConfig,
    self_type: SelfType,
    self_name: &'a str,
}

impl<'a> ResolveContext<'a> {
    pub fn new(config: &'a EnvironmentConfig, self_type: SelfType, self_name: &'a str) -> Self {
        ResolveContext {
            config,
            self_type,
            self_name,
        }
    }

    pub fn config(&self) -> &'a EnvironmentConfig {
        self.config
    }

    pub fn self_type(&self) -> SelfType {
        self.self_type
    }

    pub fn self_name(&self) -> &'a str {
        self.self_name
    }

    pub fn default_location(&self) -> &'a str {
        &self.config.location
    }

    pub fn default_account_id(&self) -> Result<&'a str, PolicyError> {
        self.config.default_account_id()
    }

    /// Resolve the account names an entry asked for into ids.
    ///
    /// No names (or an empty name) means the default account.
    pub fn account_ids(&self, names: &[String]) -> Result<Vec<&'a str>, PolicyError> {
        if names.is_empty() {
            return Ok(vec![self.default_account_id()?]);
        }
        names
            .iter()
            .map(|name| {
                if name.is_empty() {
                    self.default_account_id()
                } else {
                    self.config.account_id(name)
                }
            })
            .collect()
    }

    /// Fail unless the owning entity is of the given type.
    pub(crate) fn require_self(&self, wanted: SelfType, target: &str) -> Result<(), PolicyError> {
        if self.self_type == wanted {
            Ok(())
        } else {
            Err(PolicyError::InvalidSelfReference {
                target: target.to_string(),
                self_type: self.self_type.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use yare::parameterized;

    fn config() -> EnvironmentConfig {
        EnvironmentConfig::new(
            "stg",
            "ap-southeast-2",
            [("stg", "123456789012"), ("dev", "210987654321")],
        )
        .unwrap()
    }

    #[test]
    fn test_environment_must_be_a_known_account() {
        let err = EnvironmentConfig::new("prod", "us-east-1", [("stg", "123456789012")]).unwrap_err();
        assert_eq!(
            err,
            PolicyError::UnknownAccount {
                account: "prod".to_string(),
                available: vec!["stg".to_string()],
            }
        );
    }

    #[test]
    fn test_from_json_str() {
        let config = EnvironmentConfig::from_json_str(
            r#"{"environment": "stg", "location": "ap-southeast-2", "accounts": {"stg": "123456789012"}}"#,
        )
        .unwrap();
        assert_eq!(config.default_account_id().unwrap(), "123456789012");
        assert_eq!(config.location, "ap-southeast-2");
    }

    #[test]
    fn test_from_json_str_rejects_garbage() {
        let err = EnvironmentConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, PolicyError::InvalidFormat(_)));
    }

    #[parameterized(
        nothing = { vec![], vec!["123456789012"] },
        empty_name = { vec![""], vec!["123456789012"] },
        named = { vec!["dev"], vec!["210987654321"] },
        both_in_order = { vec!["dev", "stg"], vec!["210987654321", "123456789012"] },
    )]
    fn test_account_ids(names: Vec<&str>, expected: Vec<&str>) {
        let config = config();
        let ctx = ResolveContext::new(&config, SelfType::Role, "syncr");
        let names: Vec<String> = names.into_iter().map(String::from).collect();
        assert_eq!(ctx.account_ids(&names).unwrap(), expected);
    }

    #[test]
    fn test_unknown_account_lists_available() {
        let config = config();
        let ctx = ResolveContext::new(&config, SelfType::Role, "syncr");
        let err = ctx.account_ids(&["nope".to_string()]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown account specified: 'nope' (available: dev, stg)"
        );
    }

    #[test]
    fn test_require_self() {
        let config = config();
        let ctx = ResolveContext::new(&config, SelfType::Bucket, "my-bucket");
        assert!(ctx.require_self(SelfType::Bucket, "bucket").is_ok());
        let err = ctx.require_self(SelfType::Role, "iam role").unwrap_err();
        assert_eq!(
            err,
            PolicyError::InvalidSelfReference {
                target: "iam role".to_string(),
                self_type: "bucket".to_string(),
            }
        );
    }

    #[parameterized(
        role = { "role", SelfType::Role },
        bucket = { "bucket", SelfType::Bucket },
        key = { "key", SelfType::Key },
        lambda = { "lambda", SelfType::Lambda },
    )]
    fn test_self_type_from_str(input: &str, expected: SelfType) {
        assert_eq!(SelfType::from_str(input).unwrap(), expected);
        assert_eq!(expected.to_string(), input);
    }
}
