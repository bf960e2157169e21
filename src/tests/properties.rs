use proptest::prelude::*;
use serde_json::{Value, json};

use super::{config, ctx};
use crate::{Document, SelfType, StatementKind, compile, compile_document, diff};

fn action() -> impl Strategy<Value = String> {
    "[a-z]{2,6}:[A-Z][a-zA-Z]{0,8}"
}

fn bucket() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{2,12}"
}

fn render_permission(raw: &Value) -> String {
    let config = config();
    let ctx = ctx(&config, SelfType::Role, "deploy");
    let statement = compile(StatementKind::Permission, &ctx, raw).unwrap();
    Document::new(vec![statement]).render().unwrap().unwrap()
}

fn resource_policy(raws: &[Value]) -> Value {
    let config = config();
    let ctx = ctx(&config, SelfType::Bucket, "logs");
    compile_document(StatementKind::ResourcePolicy, &ctx, raws)
        .unwrap()
        .to_value()
        .unwrap()
        .unwrap()
}

proptest! {
    #[test]
    fn compiling_twice_is_byte_identical(
        actions in prop::collection::vec(action(), 1..5),
        buckets in prop::collection::vec(bucket(), 1..4),
    ) {
        let raw = json!({
            "action": actions,
            "effect": "Allow",
            "resource": buckets.iter().map(|name| json!({"s3": name})).collect::<Vec<_>>(),
        });
        prop_assert_eq!(render_permission(&raw), render_permission(&raw));
    }

    #[test]
    fn single_element_lists_collapse(action in action(), bucket in bucket()) {
        let listed = json!({"action": [&action], "effect": "Allow", "resource": [format!("arn:aws:s3:::{bucket}")]});
        let scalar = json!({"Action": &action, "Effect": "Allow", "Resource": format!("arn:aws:s3:::{bucket}")});
        prop_assert_eq!(render_permission(&listed), render_permission(&scalar));
    }

    #[test]
    fn input_order_does_not_change_output(
        actions in prop::collection::vec(action(), 2..6),
    ) {
        let mut reversed = actions.clone();
        reversed.reverse();
        let forward = json!({"action": actions, "effect": "Deny", "resource": "*"});
        let backward = json!({"action": reversed, "effect": "Deny", "resource": "*"});
        prop_assert_eq!(render_permission(&forward), render_permission(&backward));
    }

    #[test]
    fn documents_equal_themselves(
        actions in prop::collection::vec(action(), 1..4),
        principals in prop::collection::vec("role/[a-z]{1,8}", 1..4),
    ) {
        let document = resource_policy(&[json!({
            "principal": {"iam": principals},
            "action": actions,
            "resource": {"s3": "__self__"},
        })]);
        prop_assert!(diff(&document, &document).is_empty());
        let text = document.to_string();
        prop_assert!(diff(text.as_str(), &document).is_empty());
    }

    #[test]
    fn changed_documents_always_differ(
        actions in prop::collection::vec(action(), 1..4),
        extra in action(),
    ) {
        let current = resource_policy(&[json!({"principal": "*", "action": &actions, "resource": "*"})]);
        let mut changed_actions = actions.clone();
        changed_actions.push(format!("{extra}Extra"));
        let new = resource_policy(&[json!({"principal": "*", "action": changed_actions, "resource": "*"})]);
        prop_assert!(!diff(current, new).is_empty());
    }
}
