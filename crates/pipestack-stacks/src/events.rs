//! EventBridge rule patterns and target inputs.

use derive_more::Display;
use pipestack_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// A value extracted from the matched event, e.g.
/// `$.detail.execution-result.external-execution-url`.
///
/// Formatting a field yields the `<key>` placeholder an input template uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[display("<{key}>")]
pub struct EventField {
    pub path: String,
    pub key: String,
}

impl EventField {
    pub fn from_path(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if !path.starts_with('$') {
            return Err(Error::InvalidInput(format!(
                "event path '{path}' must start with '$'"
            )));
        }
        let key: String = path
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if key.is_empty() {
            return Err(Error::InvalidInput(format!(
                "event path '{path}' does not name a field"
            )));
        }
        Ok(Self { path, key })
    }
}

/// The input delivered to a rule target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTargetInput {
    pub input_paths_map: BTreeMap<String, String>,
    pub input_template: String,
}

impl RuleTargetInput {
    /// A plain-text message; `fields` are the [`EventField`]s formatted into
    /// `text`.
    pub fn from_text(text: &str, fields: &[EventField]) -> Result<Self> {
        let mut input_paths_map = BTreeMap::new();
        for field in fields {
            if let Some(existing) = input_paths_map.get(&field.key) {
                if existing != &field.path {
                    return Err(Error::Conflict(format!(
                        "event fields '{existing}' and '{}' share the key '{}'",
                        field.path, field.key
                    )));
                }
            }
            if !text.contains(&field.to_string()) {
                return Err(Error::InvalidInput(format!(
                    "event field '{}' does not appear in the message",
                    field.path
                )));
            }
            input_paths_map.insert(field.key.clone(), field.path.clone());
        }

        Ok(Self {
            input_paths_map,
            input_template: serde_json::to_string(text)?,
        })
    }

    /// `InputTransformer` property of an `AWS::Events::Rule` target.
    pub fn to_input_transformer(&self) -> Value {
        json!({
            "InputPathsMap": self.input_paths_map,
            "InputTemplate": self.input_template
        })
    }
}

/// Pattern matching a state change of one pipeline action.
pub fn action_state_change_pattern(
    pipeline_arn: Value,
    stage: &str,
    action: &str,
    state: &str,
) -> Value {
    json!({
        "source": ["aws.codepipeline"],
        "resources": [pipeline_arn],
        "detail-type": ["CodePipeline Action Execution State Change"],
        "detail": {
            "stage": [stage],
            "action": [action],
            "state": [state]
        }
    })
}
