//! CloudFormation template model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::{Error, Result};

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// A synthesized CloudFormation template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,
    /// Always emitted, an empty stack still has `"Resources": {}`.
    #[serde(default)]
    pub resources: BTreeMap<String, Resource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            format_version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: None,
            parameters: BTreeMap::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resource(&mut self, logical_id: impl Into<String>, resource: Resource) -> Result<()> {
        let logical_id = logical_id.into();
        if self.resources.contains_key(&logical_id) {
            return Err(Error::Conflict(format!("resource '{logical_id}' already defined")));
        }
        self.resources.insert(logical_id, resource);
        Ok(())
    }

    pub fn add_parameter(
        &mut self,
        logical_id: impl Into<String>,
        parameter: Parameter,
    ) -> Result<()> {
        let logical_id = logical_id.into();
        if self.parameters.contains_key(&logical_id) {
            return Err(Error::Conflict(format!("parameter '{logical_id}' already defined")));
        }
        self.parameters.insert(logical_id, parameter);
        Ok(())
    }

    pub fn add_output(&mut self, logical_id: impl Into<String>, output: Output) -> Result<()> {
        let logical_id = logical_id.into();
        if self.outputs.contains_key(&logical_id) {
            return Err(Error::Conflict(format!("output '{logical_id}' already defined")));
        }
        self.outputs.insert(logical_id, output);
        Ok(())
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    /// All resources of a CloudFormation type, in logical-id order.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Resource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
    }

    pub fn count_of_type(&self, resource_type: &str) -> usize {
        self.resources_of_type(resource_type).count()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Deletion and replacement policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
    Snapshot,
}

/// A single resource declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<DeletionPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: Map::new(),
            depends_on: Vec::new(),
            update_policy: None,
            update_replace_policy: None,
            deletion_policy: None,
        }
    }

    /// Merge a JSON object into the resource properties.
    ///
    /// Non-object values are ignored.
    pub fn with_properties(mut self, properties: Value) -> Self {
        if let Value::Object(map) = properties {
            self.properties.extend(map);
        }
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_dependency(mut self, logical_id: impl Into<String>) -> Self {
        let logical_id = logical_id.into();
        if !self.depends_on.contains(&logical_id) {
            self.depends_on.push(logical_id);
        }
        self
    }

    pub fn with_update_policy(mut self, policy: Value) -> Self {
        self.update_policy = Some(policy);
        self
    }

    /// Keep the physical resource when it is removed from the template.
    pub fn retained(mut self) -> Self {
        self.update_replace_policy = Some(DeletionPolicy::Retain);
        self.deletion_policy = Some(DeletionPolicy::Retain);
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A template parameter, resolved at deploy time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub parameter_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Parameter {
    pub fn string(description: impl Into<String>) -> Self {
        Self {
            parameter_type: "String".to_string(),
            description: Some(description.into()),
        }
    }
}

/// A stack output, optionally exported for other stacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<Export>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Export {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_template_keeps_resources_key() {
        let json = serde_json::to_value(Template::new()).unwrap();
        assert_eq!(
            json,
            json!({"AWSTemplateFormatVersion": "2010-09-09", "Resources": {}})
        );
    }

    #[test]
    fn test_duplicate_resource_is_conflict() {
        let mut template = Template::new();
        template
            .add_resource("Topic", Resource::new("AWS::SNS::Topic"))
            .unwrap();
        let err = template
            .add_resource("Topic", Resource::new("AWS::SNS::Topic"))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_resource_serialization() {
        let resource = Resource::new("AWS::S3::Bucket")
            .with_properties(json!({"BucketName": "artifacts"}))
            .with_dependency("Role")
            .with_dependency("Role")
            .retained();

        assert_eq!(
            serde_json::to_value(&resource).unwrap(),
            json!({
                "Type": "AWS::S3::Bucket",
                "Properties": {"BucketName": "artifacts"},
                "DependsOn": ["Role"],
                "UpdateReplacePolicy": "Retain",
                "DeletionPolicy": "Retain"
            })
        );
    }

    #[test]
    fn test_resources_of_type() {
        let mut template = Template::new();
        template
            .add_resource("A", Resource::new("AWS::IAM::Role"))
            .unwrap();
        template
            .add_resource("B", Resource::new("AWS::SNS::Topic"))
            .unwrap();
        template
            .add_resource("C", Resource::new("AWS::IAM::Role"))
            .unwrap();

        assert_eq!(template.count_of_type("AWS::IAM::Role"), 2);
        let ids: Vec<_> = template
            .resources_of_type("AWS::IAM::Role")
            .map(|(id, _)| id.as_str())
            .collect();
        assert_eq!(ids, vec!["A", "C"]);
    }

    #[test]
    fn test_output_with_export() {
        let output = Output {
            description: Some("Api endpoint".to_string()),
            value: json!({"Fn::GetAtt": ["Api", "ApiEndpoint"]}),
            export: Some(Export {
                name: "ServiceEndpointProd".to_string(),
            }),
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["Export"]["Name"], "ServiceEndpointProd");
    }
}
