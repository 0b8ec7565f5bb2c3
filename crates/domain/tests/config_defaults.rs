use tether_domain::config::{ApprovalPolicy, ModelPolicy, VerifyPolicy};
use tether_domain::tool::ToolKind;

#[test]
fn verify_policy_defaults() {
    let policy = VerifyPolicy::default();
    assert!(policy.auto_verify);
    assert_eq!(policy.commands, vec!["make test".to_string()]);
    assert!(!policy.require_clean);
}

#[test]
fn approval_policy_defaults() {
    let policy = ApprovalPolicy::default();
    assert_eq!(policy.require_for_kinds, vec![ToolKind::Exec, ToolKind::Write]);
    assert!(policy.require_for_tools.is_empty());
}

#[test]
fn model_policy_defaults() {
    let policy = ModelPolicy::default();
    assert!(policy.require_tools);
    assert!(!policy.require_vision);
    assert!(policy.max_cost_usd.is_none());
    assert!(policy.preferred_models.is_empty());
}

#[test]
fn partial_toml_fills_defaults() {
    let policy: VerifyPolicy = toml::from_str(r#"require_clean = true"#).unwrap();
    assert!(policy.require_clean);
    assert!(policy.auto_verify);
    assert_eq!(policy.commands, vec!["make test".to_string()]);
}

#[test]
fn approval_policy_names_kinds_and_tools() {
    let policy: ApprovalPolicy = toml::from_str(
        r#"
require_for_kinds = ["network"]
require_for_tools = ["shell"]
"#,
    )
    .unwrap();
    assert!(policy.names(ToolKind::Network, "anything"));
    assert!(policy.names(ToolKind::Read, "shell"));
    assert!(!policy.names(ToolKind::Read, "read_file"));
}
