//! Pipeline stage and action definitions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use crate::artifact::{Artifact, ArtifactPath};
use crate::intrinsic::{join, reference};
use crate::secret::SecretValue;
use crate::{Error, Result};

/// Capabilities granted to every CloudFormation deploy action.
pub const DEPLOY_CAPABILITIES: &str = "CAPABILITY_NAMED_IAM,CAPABILITY_AUTO_EXPAND";

/// A stage of a pipeline. Stages run strictly in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name.
    pub name: String,
    /// Actions; same run order means they may run in parallel.
    pub actions: Vec<Action>,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Highest run order used so far (0 for an empty stage).
    pub fn max_run_order(&self) -> u32 {
        self.actions.iter().map(|a| a.run_order).max().unwrap_or(0)
    }

    /// Add an action, enforcing unique names and a positive run order.
    pub fn push_action(&mut self, action: Action) -> Result<()> {
        if action.run_order == 0 {
            return Err(Error::InvalidInput(format!(
                "action '{}' in stage '{}' must have a run order of at least 1",
                action.name, self.name
            )));
        }
        if self.action(&action.name).is_some() {
            return Err(Error::Conflict(format!(
                "stage '{}' already has an action named '{}'",
                self.name, action.name
            )));
        }
        self.actions.push(action);
        Ok(())
    }
}

/// Handle to a stage added to a pipeline, used to attach further actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageHandle {
    pub index: usize,
    pub name: String,
}

/// A single action in a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Action name, unique within its stage.
    pub name: String,
    /// Ordering within the stage; lower runs first.
    pub run_order: u32,
    /// Primary input artifacts.
    pub inputs: Vec<Artifact>,
    /// Artifacts this action writes.
    pub outputs: Vec<Artifact>,
    /// What this action does.
    pub kind: ActionKind,
    /// Variable namespace exposing the action's outputs to later actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// What an action does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ActionKind {
    /// Fetch a branch of a GitHub repository.
    GitHubSource {
        owner: String,
        repo: String,
        branch: String,
        oauth_token: SecretValue,
    },
    /// Run a CodeBuild project.
    CodeBuild {
        /// Logical id of the project resource.
        project: String,
        action_type: BuildActionType,
        env: BTreeMap<String, EnvironmentVariable>,
    },
    /// Create or update a CloudFormation stack.
    CloudFormationDeploy {
        stack_name: String,
        template_path: ArtifactPath,
        admin_permissions: bool,
        /// Deploy-time parameter values.
        parameter_overrides: BTreeMap<String, Value>,
    },
}

/// Whether a CodeBuild action is a build or a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildActionType {
    Build,
    Test,
}

/// An environment variable passed to a CodeBuild action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub value: Value,
    pub kind: EnvironmentVariableType,
}

impl EnvironmentVariable {
    pub fn plaintext(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            kind: EnvironmentVariableType::Plaintext,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvironmentVariableType {
    Plaintext,
    ParameterStore,
    SecretsManager,
}

impl EnvironmentVariableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentVariableType::Plaintext => "PLAINTEXT",
            EnvironmentVariableType::ParameterStore => "PARAMETER_STORE",
            EnvironmentVariableType::SecretsManager => "SECRETS_MANAGER",
        }
    }
}

impl Action {
    /// Category/owner/provider of the action, as CodePipeline expects it.
    pub fn action_type_id(&self) -> Value {
        let (category, owner, provider) = match &self.kind {
            ActionKind::GitHubSource { .. } => ("Source", "ThirdParty", "GitHub"),
            ActionKind::CodeBuild {
                action_type: BuildActionType::Build,
                ..
            } => ("Build", "AWS", "CodeBuild"),
            ActionKind::CodeBuild {
                action_type: BuildActionType::Test,
                ..
            } => ("Test", "AWS", "CodeBuild"),
            ActionKind::CloudFormationDeploy { .. } => ("Deploy", "AWS", "CloudFormation"),
        };
        json!({
            "Category": category,
            "Owner": owner,
            "Provider": provider,
            "Version": "1"
        })
    }

    /// Provider configuration of the action.
    ///
    /// `role_arn` is the role the deployment engine assumes for
    /// CloudFormation actions.
    pub fn configuration(&self, role_arn: Option<Value>) -> Result<Value> {
        let config = match &self.kind {
            ActionKind::GitHubSource {
                owner,
                repo,
                branch,
                oauth_token,
            } => json!({
                "Owner": owner,
                "Repo": repo,
                "Branch": branch,
                "OAuthToken": oauth_token.to_template_value(),
                "PollForSourceChanges": false
            }),
            ActionKind::CodeBuild { project, env, .. } => {
                let mut config = Map::new();
                config.insert("ProjectName".to_string(), reference(project));
                if !env.is_empty() {
                    config.insert(
                        "EnvironmentVariables".to_string(),
                        render_environment_variables(env)?,
                    );
                }
                Value::Object(config)
            }
            ActionKind::CloudFormationDeploy {
                stack_name,
                template_path,
                parameter_overrides,
                ..
            } => {
                let mut config = Map::new();
                config.insert("StackName".to_string(), json!(stack_name));
                config.insert("ActionMode".to_string(), json!("CREATE_UPDATE"));
                config.insert("Capabilities".to_string(), json!(DEPLOY_CAPABILITIES));
                config.insert("TemplatePath".to_string(), json!(template_path.to_string()));
                if let Some(role_arn) = role_arn {
                    config.insert("RoleArn".to_string(), role_arn);
                }
                if !parameter_overrides.is_empty() {
                    config.insert(
                        "ParameterOverrides".to_string(),
                        Value::String(serde_json::to_string(parameter_overrides)?),
                    );
                }
                Value::Object(config)
            }
        };
        Ok(config)
    }

    /// `#{namespace.key}` reference to an output variable of this action.
    pub fn variable(&self, key: &str) -> Result<String> {
        let namespace = self.namespace.as_deref().ok_or_else(|| {
            Error::InvalidReference(format!("action '{}' has no variable namespace", self.name))
        })?;
        Ok(format!("#{{{namespace}.{key}}}"))
    }

    /// Every artifact the action reads, primary inputs first.
    pub fn all_inputs(&self) -> Vec<&Artifact> {
        let mut inputs: Vec<&Artifact> = self.inputs.iter().collect();
        if let ActionKind::CloudFormationDeploy { template_path, .. } = &self.kind {
            if !inputs.contains(&&template_path.artifact) {
                inputs.insert(0, &template_path.artifact);
            }
        }
        inputs
    }
}

/// CodeBuild expects environment variables as a JSON encoded list.
///
/// Values holding intrinsic functions cannot live inside a plain string,
/// so each such entry is rendered around its value and the pieces are
/// reassembled with `Fn::Join`.
fn render_environment_variables(env: &BTreeMap<String, EnvironmentVariable>) -> Result<Value> {
    let mut parts = Vec::new();
    let mut text = String::from("[");
    for (i, (name, var)) in env.iter().enumerate() {
        if i > 0 {
            text.push(',');
        }
        match &var.value {
            Value::String(value) => {
                let entry = json!({
                    "name": name,
                    "type": var.kind.as_str(),
                    "value": value
                });
                text.push_str(&serde_json::to_string(&entry)?);
            }
            token => {
                text.push_str(&format!(
                    "{{\"name\":{},\"type\":{},\"value\":\"",
                    serde_json::to_string(name)?,
                    serde_json::to_string(var.kind.as_str())?
                ));
                parts.push(Value::String(std::mem::take(&mut text)));
                parts.push(token.clone());
                text.push_str("\"}");
            }
        }
    }
    text.push(']');

    if parts.is_empty() {
        return Ok(Value::String(text));
    }
    parts.push(Value::String(text));
    Ok(join("", parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intrinsic::import_value;

    fn deploy_action(name: &str, run_order: u32) -> Action {
        let artifact = Artifact::new("CdkBuildOutput").unwrap();
        Action {
            name: name.to_string(),
            run_order,
            inputs: vec![],
            outputs: vec![],
            kind: ActionKind::CloudFormationDeploy {
                stack_name: "LambdaStackProd".to_string(),
                template_path: artifact.at_path("LambdaStackProd.template.json").unwrap(),
                admin_permissions: true,
                parameter_overrides: BTreeMap::new(),
            },
            namespace: None,
        }
    }

    #[test]
    fn test_push_action_rejects_duplicate_names() {
        let mut stage = Stage::new("Prod");
        stage.push_action(deploy_action("Service_Update", 1)).unwrap();
        let err = stage
            .push_action(deploy_action("Service_Update", 1))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_push_action_rejects_zero_run_order() {
        let mut stage = Stage::new("Prod");
        assert!(stage.push_action(deploy_action("Service_Update", 0)).is_err());
    }

    #[test]
    fn test_max_run_order() {
        let mut stage = Stage::new("Prod");
        assert_eq!(stage.max_run_order(), 0);
        stage.push_action(deploy_action("A", 1)).unwrap();
        stage.push_action(deploy_action("B", 3)).unwrap();
        assert_eq!(stage.max_run_order(), 3);
    }

    #[test]
    fn test_deploy_configuration() {
        let mut action = deploy_action("Service_Update", 1);
        if let ActionKind::CloudFormationDeploy {
            parameter_overrides,
            ..
        } = &mut action.kind
        {
            parameter_overrides.insert("CodeBucket".to_string(), json!("bucket"));
        }

        let config = action
            .configuration(Some(json!({"Fn::GetAtt": ["Role", "Arn"]})))
            .unwrap();
        assert_eq!(config["StackName"], "LambdaStackProd");
        assert_eq!(config["ActionMode"], "CREATE_UPDATE");
        assert_eq!(config["Capabilities"], DEPLOY_CAPABILITIES);
        assert_eq!(
            config["TemplatePath"],
            "CdkBuildOutput::LambdaStackProd.template.json"
        );
        assert_eq!(config["ParameterOverrides"], r#"{"CodeBucket":"bucket"}"#);
        assert_eq!(action.action_type_id()["Category"], "Deploy");
    }

    #[test]
    fn test_output_variable_needs_namespace() {
        let mut action = deploy_action("Service_Update", 1);
        assert!(matches!(
            action.variable("ApiEndpointOutput"),
            Err(Error::InvalidReference(_))
        ));

        action.namespace = Some("Prod_Service".to_string());
        assert_eq!(
            action.variable("ApiEndpointOutput").unwrap(),
            "#{Prod_Service.ApiEndpointOutput}"
        );
    }

    #[test]
    fn test_deploy_reads_template_artifact() {
        let action = deploy_action("Service_Update", 1);
        let inputs = action.all_inputs();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].name(), "CdkBuildOutput");
    }

    #[test]
    fn test_codebuild_test_configuration() {
        let mut env = BTreeMap::new();
        env.insert(
            "SERVICE_ENDPOINT".to_string(),
            EnvironmentVariable::plaintext("https://example.com"),
        );
        let action = Action {
            name: "Integration_Test".to_string(),
            run_order: 2,
            inputs: vec![Artifact::new("LambdaSourceOutput").unwrap()],
            outputs: vec![],
            kind: ActionKind::CodeBuild {
                project: "IntegrationTestProject".to_string(),
                action_type: BuildActionType::Test,
                env,
            },
            namespace: None,
        };

        assert_eq!(action.action_type_id()["Category"], "Test");
        let config = action.configuration(None).unwrap();
        assert_eq!(config["ProjectName"], json!({"Ref": "IntegrationTestProject"}));
        assert_eq!(
            config["EnvironmentVariables"],
            r#"[{"name":"SERVICE_ENDPOINT","type":"PLAINTEXT","value":"https://example.com"}]"#
        );
    }

    #[test]
    fn test_environment_with_intrinsic_value_is_joined() {
        let mut env = BTreeMap::new();
        env.insert(
            "SERVICE_ENDPOINT".to_string(),
            EnvironmentVariable::plaintext(import_value("ServiceEndpointProd")),
        );
        let rendered = render_environment_variables(&env).unwrap();
        assert_eq!(
            rendered,
            json!({"Fn::Join": ["", [
                r#"[{"name":"SERVICE_ENDPOINT","type":"PLAINTEXT","value":""#,
                {"Fn::ImportValue": "ServiceEndpointProd"},
                r#""}]"#
            ]]})
        );
    }

    #[test]
    fn test_intrinsic_lands_in_its_own_variable() {
        let mut env = BTreeMap::new();
        env.insert(
            "A".to_string(),
            EnvironmentVariable::plaintext("#{PipestackToken[0]}"),
        );
        env.insert(
            "B".to_string(),
            EnvironmentVariable::plaintext(import_value("X")),
        );
        let rendered = render_environment_variables(&env).unwrap();
        assert_eq!(
            rendered,
            json!({"Fn::Join": ["", [
                r##"[{"name":"A","type":"PLAINTEXT","value":"#{PipestackToken[0]}"},{"name":"B","type":"PLAINTEXT","value":""##,
                {"Fn::ImportValue": "X"},
                r#""}]"#
            ]]})
        );
    }

    #[test]
    fn test_github_configuration_uses_dynamic_reference() {
        let action = Action {
            name: "Pipeline_Source".to_string(),
            run_order: 1,
            inputs: vec![],
            outputs: vec![Artifact::new("CdkSourceOutput").unwrap()],
            kind: ActionKind::GitHubSource {
                owner: "MARudnicki".to_string(),
                repo: "maciejru-cdk".to_string(),
                branch: "master".to_string(),
                oauth_token: SecretValue::secrets_manager("github-token"),
            },
            namespace: None,
        };
        let config = action.configuration(None).unwrap();
        assert_eq!(
            config["OAuthToken"],
            "{{resolve:secretsmanager:github-token:SecretString:::}}"
        );
        assert_eq!(config["PollForSourceChanges"], false);
        assert_eq!(action.action_type_id()["Owner"], "ThirdParty");
    }
}
