use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

/// Whether a statement grants or refuses access.
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
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub const CHOICES: &'static [&'static str] = &["Allow", "Deny"];
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use yare::parameterized;

    #[parameterized(
        allow = { "Allow", Effect::Allow },
        deny = { "Deny", Effect::Deny },
    )]
    fn test_effect_from_str(input: &str, expected: Effect) {
        assert_eq!(Effect::from_str(input).unwrap(), expected);
        assert_eq!(expected.to_string(), input);
    }

    #[test]
    fn test_effect_is_case_sensitive() {
        assert!(Effect::from_str("allow").is_err());
    }

    #[test]
    fn test_choices_match_variants() {
        for choice in Effect::CHOICES {
            assert!(Effect::from_str(choice).is_ok());
        }
    }

    #[test]
    fn test_published_schema_lists_choices() {
        use utoipa::PartialSchema;

        let schema = serde_json::to_value(Effect::schema()).unwrap();
        assert_eq!(schema["enum"], serde_json::json!(Effect::CHOICES));
    }
}
