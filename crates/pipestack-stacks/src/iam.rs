//! IAM roles and policies shared by the stacks.

use pipestack_core::Resource;
use pipestack_core::intrinsic::reference;
use serde_json::{Value, json};

const POLICY_VERSION: &str = "2012-10-17";

/// A policy document from a list of statements.
pub fn policy_document(statements: Vec<Value>) -> Value {
    json!({
        "Statement": statements,
        "Version": POLICY_VERSION
    })
}

/// An `Allow` statement.
pub fn allow(actions: &[&str], resources: Vec<Value>) -> Value {
    json!({
        "Action": one_or_many(actions.iter().map(|a| Value::from(*a)).collect()),
        "Effect": "Allow",
        "Resource": one_or_many(resources)
    })
}

/// A role that `service` (e.g. `lambda.amazonaws.com`) may assume.
pub fn service_role(service: &str, managed_policies: Vec<Value>) -> Resource {
    let mut role = Resource::new("AWS::IAM::Role").with_property(
        "AssumeRolePolicyDocument",
        policy_document(vec![json!({
            "Action": "sts:AssumeRole",
            "Effect": "Allow",
            "Principal": { "Service": service }
        })]),
    );
    if !managed_policies.is_empty() {
        role = role.with_property("ManagedPolicyArns", Value::Array(managed_policies));
    }
    role
}

/// An inline policy attached to one role.
pub fn role_policy(policy_name: &str, role_id: &str, statements: Vec<Value>) -> Resource {
    Resource::new("AWS::IAM::Policy").with_properties(json!({
        "PolicyDocument": policy_document(statements),
        "PolicyName": policy_name,
        "Roles": [reference(role_id)]
    }))
}

fn one_or_many(mut values: Vec<Value>) -> Value {
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_role() {
        let role = service_role("lambda.amazonaws.com", vec![]);
        assert_eq!(role.resource_type, "AWS::IAM::Role");
        assert_eq!(
            role.property("AssumeRolePolicyDocument").unwrap()["Statement"][0]["Principal"]
                ["Service"],
            "lambda.amazonaws.com"
        );
        assert!(role.property("ManagedPolicyArns").is_none());
    }

    #[test]
    fn test_allow_collapses_single_entries() {
        let statement = allow(&["sns:Publish"], vec![reference("Topic")]);
        assert_eq!(statement["Action"], "sns:Publish");
        assert_eq!(statement["Resource"], json!({"Ref": "Topic"}));

        let statement = allow(&["s3:GetObject*", "s3:PutObject"], vec![json!("*")]);
        assert_eq!(statement["Action"], json!(["s3:GetObject*", "s3:PutObject"]));
    }

    #[test]
    fn test_role_policy() {
        let policy = role_policy("DefaultPolicy", "PipelineRole", vec![allow(&["*"], vec![json!("*")])]);
        assert_eq!(policy.property("Roles").unwrap(), &json!([{"Ref": "PipelineRole"}]));
        assert_eq!(
            policy.property("PolicyDocument").unwrap()["Version"],
            POLICY_VERSION
        );
    }
}
