//! CloudFormation intrinsic functions and pseudo parameters.

use serde_json::{Value, json};

/// `{"Ref": logical_id}`.
pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// `{"Fn::GetAtt": [logical_id, attribute]}`.
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

pub fn join(separator: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [separator, parts] })
}

/// Substitutes `${...}` references in `template`.
pub fn sub(template: &str) -> Value {
    json!({ "Fn::Sub": template })
}

/// Reads an output exported by another stack.
pub fn import_value(export_name: &str) -> Value {
    json!({ "Fn::ImportValue": export_name })
}

/// CodePipeline-only function, valid inside `ParameterOverrides`.
pub fn get_artifact_att(artifact: &str, attribute: &str) -> Value {
    json!({ "Fn::GetArtifactAtt": [artifact, attribute] })
}

pub fn partition() -> Value {
    reference("AWS::Partition")
}

pub fn region() -> Value {
    reference("AWS::Region")
}

pub fn account_id() -> Value {
    reference("AWS::AccountId")
}

/// Builds `arn:<partition>:<service>:<region>:<account>:<resource>`.
///
/// Global services (IAM) pass `regional = false` to leave the region empty.
pub fn arn(service: &str, regional: bool, resource: Vec<Value>) -> Value {
    let mut parts = vec![
        Value::from("arn:"),
        partition(),
        Value::from(format!(":{service}:")),
    ];
    if regional {
        parts.push(region());
    }
    parts.push(Value::from(":"));
    parts.push(account_id());
    parts.push(Value::from(":"));
    parts.extend(resource);
    join("", parts)
}

/// ARN of an AWS managed IAM policy.
pub fn managed_policy_arn(name: &str) -> Value {
    join(
        "",
        vec![
            Value::from("arn:"),
            partition(),
            Value::from(format!(":iam::aws:policy/{name}")),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_and_get_att() {
        assert_eq!(reference("Topic"), json!({"Ref": "Topic"}));
        assert_eq!(
            get_att("Api", "ApiEndpoint"),
            json!({"Fn::GetAtt": ["Api", "ApiEndpoint"]})
        );
    }

    #[test]
    fn test_regional_arn() {
        let value = arn("codepipeline", true, vec![reference("Pipeline")]);
        assert_eq!(
            value,
            json!({"Fn::Join": ["", [
                "arn:", {"Ref": "AWS::Partition"}, ":codepipeline:",
                {"Ref": "AWS::Region"}, ":", {"Ref": "AWS::AccountId"}, ":",
                {"Ref": "Pipeline"}
            ]]})
        );
    }

    #[test]
    fn test_sub() {
        assert_eq!(
            sub("arn:${AWS::Partition}:execute-api:${AWS::Region}:${AWS::AccountId}:${Api}/*/*"),
            json!({"Fn::Sub": "arn:${AWS::Partition}:execute-api:${AWS::Region}:${AWS::AccountId}:${Api}/*/*"})
        );
    }

    #[test]
    fn test_managed_policy_arn() {
        let value = managed_policy_arn("service-role/AWSLambdaBasicExecutionRole");
        assert_eq!(
            value["Fn::Join"][1][2],
            json!(":iam::aws:policy/service-role/AWSLambdaBasicExecutionRole")
        );
    }
}
