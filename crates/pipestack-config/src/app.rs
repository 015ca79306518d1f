//! Application configuration parsing.
//!
//! An application file declares the pipeline, the optional billing stack and
//! one service stack per environment:
//!
//! ```kdl
//! app "maciejru-cdk"
//! environment account="${env.CDK_DEFAULT_ACCOUNT}" region="${env.CDK_DEFAULT_REGION}"
//! pipeline "MaciejruCdkStack" {
//!     source "Pipeline_Source" role="infrastructure" owner="MARudnicki" repo="maciejru-cdk" branch="master"
//!     source "Lambda_Source" role="service" owner="MARudnicki" repo="express-lambda" branch="master"
//! }
//! billing "BillingStack" amount=15 email="maciejru@amazon.com"
//! service "LambdaStackProd" stage="Prod" {
//!     integration-test
//!     billing
//! }
//! ```

use crate::{ConfigError, ConfigResult, VariableContext};
use kdl::{KdlDocument, KdlNode, KdlValue};
use pipestack_core::Environment;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_PIPELINE_NAME: &str = "MyPipeline";
pub const DEFAULT_NOTIFICATION_TOPIC: &str = "PipelineNotification";
pub const DEFAULT_BUILD_IMAGE: &str = "aws/codebuild/standard:5.0";
pub const DEFAULT_BRANCH: &str = "master";
pub const DEFAULT_TOKEN_SECRET: &str = "github-token";

/// A parsed application definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub account: Option<String>,
    pub region: Option<String>,
    pub pipeline: PipelineConfig,
    pub billing: Option<BillingConfig>,
    pub services: Vec<ServiceConfig>,
}

impl AppConfig {
    /// Target environment shared by every stack of the application.
    pub fn environment(&self) -> Environment {
        Environment {
            account: self.account.clone(),
            region: self.region.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name of the stack holding the pipeline; also the self-update target.
    pub stack_name: String,
    pub pipeline_name: String,
    pub notification_topic: String,
    pub build_image: String,
    pub sources: Vec<SourceConfig>,
    pub build_specs: BuildSpecConfig,
}

impl PipelineConfig {
    pub fn source(&self, role: SourceRole) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.role == role)
    }
}

/// Which of the two source trees a source action fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceRole {
    /// The repository holding these infrastructure definitions.
    Infrastructure,
    /// The repository holding the service code.
    Service,
}

impl std::fmt::Display for SourceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceRole::Infrastructure => write!(f, "infrastructure"),
            SourceRole::Service => write!(f, "service"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub action_name: String,
    pub role: SourceRole,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    /// Secrets Manager id of the GitHub access token.
    pub secret: String,
}

/// Build specification files, relative to each source tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSpecConfig {
    pub infrastructure: String,
    pub service: String,
    pub integration_test: String,
}

impl Default for BuildSpecConfig {
    fn default() -> Self {
        Self {
            infrastructure: "build-spec/cdk-build-spec.yml".to_string(),
            service: "build-spec/lambda-build-spec.yml".to_string(),
            integration_test: "build-spec/integ-test-build-spec.yml".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingConfig {
    pub stack_name: String,
    pub amount: f64,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub stack_name: String,
    /// Stage label; also the name of the pipeline stage deploying it.
    pub stage: String,
    pub integration_test: bool,
    pub billing: bool,
}

/// Parse an application configuration from KDL text.
///
/// String values are interpolated with `vars`; `${app.name}` is available
/// once the `app` node has been read.
pub fn parse_app_config(kdl: &str, vars: &VariableContext) -> ConfigResult<AppConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut parser = Parser { vars: vars.clone() };

    let name = doc
        .nodes()
        .iter()
        .find(|n| n.name().value() == "app")
        .map(|n| parser.required_arg(n, "app name"))
        .transpose()?
        .ok_or_else(|| ConfigError::MissingField("app name".to_string()))?;
    parser.vars.app.name = name.clone();

    let mut account = None;
    let mut region = None;
    let mut pipeline = None;
    let mut billing = None;
    let mut services = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "environment" => {
                account = parser.optional_prop(node, "account");
                region = parser.optional_prop(node, "region");
            }
            "pipeline" => {
                if pipeline.is_some() {
                    return Err(ConfigError::Duplicate("pipeline".to_string()));
                }
                pipeline = Some(parser.parse_pipeline(node)?);
            }
            "billing" => {
                if billing.is_some() {
                    return Err(ConfigError::Duplicate("billing".to_string()));
                }
                billing = Some(parser.parse_billing(node)?);
            }
            "service" => {
                services.push(parser.parse_service(node)?);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    let pipeline = pipeline.ok_or_else(|| ConfigError::MissingField("pipeline".to_string()))?;

    let config = AppConfig {
        name,
        account,
        region,
        pipeline,
        billing,
        services,
    };
    validate(&config)?;
    Ok(config)
}

fn validate(config: &AppConfig) -> ConfigResult<()> {
    let mut stack_names = HashSet::new();
    let all_names = std::iter::once(config.pipeline.stack_name.as_str())
        .chain(config.billing.iter().map(|b| b.stack_name.as_str()))
        .chain(config.services.iter().map(|s| s.stack_name.as_str()));
    for name in all_names {
        if !stack_names.insert(name) {
            return Err(ConfigError::Duplicate(format!("stack '{name}'")));
        }
    }

    let mut stages = HashSet::new();
    for service in &config.services {
        if !stages.insert(service.stage.as_str()) {
            return Err(ConfigError::Duplicate(format!("stage '{}'", service.stage)));
        }
        if service.billing && config.billing.is_none() {
            return Err(ConfigError::InvalidReference(format!(
                "service '{}' deploys billing but no billing stack is defined",
                service.stack_name
            )));
        }
    }

    let billing_stages = config.services.iter().filter(|s| s.billing).count();
    if billing_stages > 1 {
        return Err(ConfigError::InvalidValue {
            field: "billing".to_string(),
            message: format!("billing stack is deployed by {billing_stages} stages, at most one allowed"),
        });
    }

    Ok(())
}

struct Parser {
    vars: VariableContext,
}

impl Parser {
    fn parse_pipeline(&self, node: &KdlNode) -> ConfigResult<PipelineConfig> {
        let stack_name = self.required_arg(node, "pipeline stack name")?;

        let mut pipeline_name = DEFAULT_PIPELINE_NAME.to_string();
        let mut notification_topic = DEFAULT_NOTIFICATION_TOPIC.to_string();
        let mut build_image = DEFAULT_BUILD_IMAGE.to_string();
        let mut sources: Vec<SourceConfig> = Vec::new();
        let mut build_specs = BuildSpecConfig::default();

        if let Some(children) = node.children() {
            for child in children.nodes() {
                match child.name().value() {
                    "name" => pipeline_name = self.required_arg(child, "pipeline name")?,
                    "notification-topic" => {
                        notification_topic = self.required_arg(child, "notification-topic")?
                    }
                    "build-image" => build_image = self.required_arg(child, "build-image")?,
                    "source" => {
                        let source = self.parse_source(child)?;
                        if sources.iter().any(|s| s.role == source.role) {
                            return Err(ConfigError::Duplicate(format!(
                                "{} source",
                                source.role
                            )));
                        }
                        if sources.iter().any(|s| s.action_name == source.action_name) {
                            return Err(ConfigError::Duplicate(format!(
                                "source action '{}'",
                                source.action_name
                            )));
                        }
                        sources.push(source);
                    }
                    "build-spec" => {
                        if let Some(path) = self.string_prop(child, "infrastructure")? {
                            build_specs.infrastructure = path;
                        }
                        if let Some(path) = self.string_prop(child, "service")? {
                            build_specs.service = path;
                        }
                        if let Some(path) = self.string_prop(child, "integration-test")? {
                            build_specs.integration_test = path;
                        }
                    }
                    _ => {}
                }
            }
        }

        for role in [SourceRole::Infrastructure, SourceRole::Service] {
            if !sources.iter().any(|s| s.role == role) {
                return Err(ConfigError::MissingField(format!("{role} source")));
            }
        }

        Ok(PipelineConfig {
            stack_name,
            pipeline_name,
            notification_topic,
            build_image,
            sources,
            build_specs,
        })
    }

    fn parse_source(&self, node: &KdlNode) -> ConfigResult<SourceConfig> {
        let action_name = self.required_arg(node, "source action name")?;
        let role = match self.required_prop(node, "role")?.as_str() {
            "infrastructure" => SourceRole::Infrastructure,
            "service" => SourceRole::Service,
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "source role".to_string(),
                    message: format!("unknown source role: {other}"),
                });
            }
        };

        Ok(SourceConfig {
            action_name,
            role,
            owner: self.required_prop(node, "owner")?,
            repo: self.required_prop(node, "repo")?,
            branch: self
                .string_prop(node, "branch")?
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            secret: self
                .string_prop(node, "secret")?
                .unwrap_or_else(|| DEFAULT_TOKEN_SECRET.to_string()),
        })
    }

    fn parse_billing(&self, node: &KdlNode) -> ConfigResult<BillingConfig> {
        let stack_name = self.required_arg(node, "billing stack name")?;

        let amount = node
            .get("amount")
            .and_then(number)
            .ok_or_else(|| ConfigError::MissingField("billing amount".to_string()))?;
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "billing amount".to_string(),
                message: format!("must be a positive number, got {amount}"),
            });
        }

        Ok(BillingConfig {
            stack_name,
            amount,
            email: self.required_prop(node, "email")?,
        })
    }

    fn parse_service(&self, node: &KdlNode) -> ConfigResult<ServiceConfig> {
        let stack_name = self.required_arg(node, "service stack name")?;
        let stage = self.required_prop(node, "stage")?;

        let mut integration_test = false;
        let mut billing = false;
        if let Some(children) = node.children() {
            for child in children.nodes() {
                match child.name().value() {
                    "integration-test" => integration_test = true,
                    "billing" => billing = true,
                    _ => {}
                }
            }
        }

        Ok(ServiceConfig {
            stack_name,
            stage,
            integration_test,
            billing,
        })
    }

    fn required_arg(&self, node: &KdlNode, field: &str) -> ConfigResult<String> {
        let raw = get_first_string_arg(node)
            .ok_or_else(|| ConfigError::MissingField(field.to_string()))?;
        self.interpolate(&raw, field)
    }

    fn required_prop(&self, node: &KdlNode, name: &str) -> ConfigResult<String> {
        self.string_prop(node, name)?.ok_or_else(|| {
            ConfigError::MissingField(format!("{} of '{}'", name, node.name().value()))
        })
    }

    fn string_prop(&self, node: &KdlNode, name: &str) -> ConfigResult<Option<String>> {
        get_string_prop(node, name)
            .map(|raw| self.interpolate(&raw, name))
            .transpose()
    }

    /// Like `string_prop`, but an unresolved or empty value counts as unset.
    fn optional_prop(&self, node: &KdlNode, name: &str) -> Option<String> {
        let raw = get_string_prop(node, name)?;
        if !self.vars.unresolved(&raw).is_empty() {
            return None;
        }
        Some(self.vars.interpolate(&raw)).filter(|v| !v.is_empty())
    }

    fn interpolate(&self, raw: &str, field: &str) -> ConfigResult<String> {
        if let Some(variable) = self.vars.unresolved(raw).into_iter().next() {
            return Err(ConfigError::UnresolvedVariable {
                field: field.to_string(),
                variable,
            });
        }
        Ok(self.vars.interpolate(raw))
    }
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn number(value: &KdlValue) -> Option<f64> {
    value
        .as_integer()
        .map(|i| i as f64)
        .or_else(|| value.as_float())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VariableContextBuilder;

    const FULL: &str = r#"
        app "maciejru-cdk"
        environment account="${env.CDK_DEFAULT_ACCOUNT}" region="${env.CDK_DEFAULT_REGION}"

        pipeline "MaciejruCdkStack" {
            name "MyPipeline"
            notification-topic "PipelineNotification"
            source "Pipeline_Source" role="infrastructure" owner="MARudnicki" repo="maciejru-cdk" branch="master" secret="github-token"
            source "Lambda_Source" role="service" owner="MARudnicki" repo="express-lambda"
            build-spec service="build-spec/service.yml"
        }

        billing "BillingStack" amount=15 email="maciejru@amazon.com"

        service "LambdaStackProd" stage="Prod" {
            integration-test
            billing
        }
    "#;

    fn vars() -> VariableContext {
        VariableContextBuilder::new()
            .with_env("CDK_DEFAULT_ACCOUNT", "123456789012")
            .with_env("CDK_DEFAULT_REGION", "eu-west-1")
            .build()
    }

    #[test]
    fn test_parse_full_app() {
        let config = parse_app_config(FULL, &vars()).unwrap();
        assert_eq!(config.name, "maciejru-cdk");
        assert_eq!(
            config.environment(),
            Environment::new("123456789012", "eu-west-1")
        );

        let pipeline = &config.pipeline;
        assert_eq!(pipeline.stack_name, "MaciejruCdkStack");
        assert_eq!(pipeline.pipeline_name, "MyPipeline");
        assert_eq!(pipeline.build_image, DEFAULT_BUILD_IMAGE);
        assert_eq!(pipeline.build_specs.service, "build-spec/service.yml");
        assert_eq!(
            pipeline.build_specs.infrastructure,
            "build-spec/cdk-build-spec.yml"
        );

        let service_source = pipeline.source(SourceRole::Service).unwrap();
        assert_eq!(service_source.repo, "express-lambda");
        assert_eq!(service_source.branch, DEFAULT_BRANCH);
        assert_eq!(service_source.secret, DEFAULT_TOKEN_SECRET);

        let billing = config.billing.as_ref().unwrap();
        assert_eq!(billing.amount, 15.0);
        assert_eq!(billing.email, "maciejru@amazon.com");

        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].stage, "Prod");
        assert!(config.services[0].integration_test);
        assert!(config.services[0].billing);
    }

    #[test]
    fn test_unresolved_environment_is_agnostic() {
        let config = parse_app_config(FULL, &VariableContext::new()).unwrap();
        assert!(config.environment().is_agnostic());
    }

    #[test]
    fn test_missing_source_role() {
        let kdl = r#"
            app "a"
            pipeline "PipelineStack" {
                source "Pipeline_Source" role="infrastructure" owner="o" repo="r"
            }
        "#;
        let err = parse_app_config(kdl, &vars()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn test_unknown_source_role() {
        let kdl = r#"
            app "a"
            pipeline "PipelineStack" {
                source "Pipeline_Source" role="docs" owner="o" repo="r"
            }
        "#;
        let err = parse_app_config(kdl, &vars()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_billing_without_billing_stack() {
        let kdl = r#"
            app "a"
            pipeline "PipelineStack" {
                source "Pipeline_Source" role="infrastructure" owner="o" repo="r"
                source "Lambda_Source" role="service" owner="o" repo="s"
            }
            service "LambdaStackProd" stage="Prod" {
                billing
            }
        "#;
        let err = parse_app_config(kdl, &vars()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidReference(_)));
    }

    #[test]
    fn test_duplicate_stage() {
        let kdl = r#"
            app "a"
            pipeline "PipelineStack" {
                source "Pipeline_Source" role="infrastructure" owner="o" repo="r"
                source "Lambda_Source" role="service" owner="o" repo="s"
            }
            service "LambdaStackBeta" stage="Prod"
            service "LambdaStackProd" stage="Prod"
        "#;
        let err = parse_app_config(kdl, &vars()).unwrap_err();
        assert!(matches!(err, ConfigError::Duplicate(_)));
    }

    #[test]
    fn test_duplicate_stack_name() {
        let kdl = r#"
            app "a"
            pipeline "Shared" {
                source "Pipeline_Source" role="infrastructure" owner="o" repo="r"
                source "Lambda_Source" role="service" owner="o" repo="s"
            }
            service "Shared" stage="Prod"
        "#;
        let err = parse_app_config(kdl, &vars()).unwrap_err();
        assert!(matches!(err, ConfigError::Duplicate(_)));
    }

    #[test]
    fn test_invalid_billing_amount() {
        let kdl = r#"
            app "a"
            pipeline "PipelineStack" {
                source "Pipeline_Source" role="infrastructure" owner="o" repo="r"
                source "Lambda_Source" role="service" owner="o" repo="s"
            }
            billing "BillingStack" amount=0 email="a@b.com"
        "#;
        let err = parse_app_config(kdl, &vars()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_unresolved_variable_in_required_field() {
        let kdl = r#"
            app "a"
            pipeline "PipelineStack" {
                source "Pipeline_Source" role="infrastructure" owner="${env.GITHUB_OWNER}" repo="r"
                source "Lambda_Source" role="service" owner="o" repo="s"
            }
        "#;
        let err = parse_app_config(kdl, &vars()).unwrap_err();
        assert!(matches!(err, ConfigError::UnresolvedVariable { .. }));
    }

    #[test]
    fn test_app_name_is_interpolated() {
        let kdl = r#"
            app "shop"
            pipeline "PipelineStack" {
                name "${app.name}-pipeline"
                source "Pipeline_Source" role="infrastructure" owner="o" repo="r"
                source "Lambda_Source" role="service" owner="o" repo="s"
            }
        "#;
        let config = parse_app_config(kdl, &vars()).unwrap();
        assert_eq!(config.pipeline.pipeline_name, "shop-pipeline");
    }

    #[test]
    fn test_missing_pipeline() {
        let err = parse_app_config(r#"app "a""#, &vars()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn test_parse_error() {
        let err = parse_app_config("app \"unterminated", &vars()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
