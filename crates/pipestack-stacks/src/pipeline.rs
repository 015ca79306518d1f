//! Pipeline stack: the delivery pipeline that deploys every other stack.
//!
//! A pipeline always starts with three fixed stages:
//!
//! 1. `MySource` fetches the infrastructure and service repositories in
//!    parallel.
//! 2. `MyBuild` builds each of them with CodeBuild.
//! 3. `MyPipelineUpdate` redeploys this very stack from the infrastructure
//!    build output, so the pipeline updates itself before deploying
//!    anything else.
//!
//! One stage per environment is appended after that with
//! [`PipelineStack::add_service_stage`]. A stage may also run an
//! integration test after the service is updated, and deploy the billing
//! stack.

use pipestack_config::{PipelineConfig, SourceRole};
use pipestack_core::artifact::{Artifact, ArtifactRegistry, Producer};
use pipestack_core::construct::logical_id;
use pipestack_core::intrinsic::{arn, get_att, join, reference};
use pipestack_core::pipeline::{
    Action, ActionKind, BuildActionType, EnvironmentVariable, Stage, StageHandle,
};
use pipestack_core::secret::SecretValue;
use pipestack_core::stack::{template_file_name, validate_stack_name};
use pipestack_core::{
    Environment, Error, Resource, Result, StackBuilder, StackDefinition, SynthesizedStack,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::billing::BillingStack;
use crate::events::{EventField, RuleTargetInput, action_state_change_pattern};
use crate::iam::{allow, policy_document, role_policy, service_role};
use crate::service::{ENDPOINT_OUTPUT, ServiceStack};

pub const SOURCE_STAGE: &str = "MySource";
pub const BUILD_STAGE: &str = "MyBuild";
pub const UPDATE_STAGE: &str = "MyPipelineUpdate";

pub const INFRASTRUCTURE_BUILD_ACTION: &str = "CDK_Build";
pub const SERVICE_BUILD_ACTION: &str = "Service_Build";
pub const PIPELINE_UPDATE_ACTION: &str = "Pipeline_Update";
pub const SERVICE_UPDATE_ACTION: &str = "Service_Update";
pub const BILLING_UPDATE_ACTION: &str = "Billing_Update";
pub const INTEGRATION_TEST_ACTION: &str = "Integration_Test";

/// Environment variable carrying the endpoint under test.
pub const SERVICE_ENDPOINT_VARIABLE: &str = "SERVICE_ENDPOINT";

const EXECUTION_URL_PATH: &str = "$.detail.execution-result.external-execution-url";

static STAGE_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9.@_-]{1,100}$").expect("valid regex"));

/// One GitHub source action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSettings {
    pub action_name: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub oauth_token: SecretValue,
    /// Artifact receiving the fetched tree.
    pub output: String,
}

/// Names and locations the pipeline is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub pipeline_name: String,
    pub topic_name: String,
    pub build_image: String,
    pub infrastructure_source: SourceSettings,
    pub service_source: SourceSettings,
    pub infrastructure_build_spec: String,
    pub service_build_spec: String,
    pub integration_test_build_spec: String,
    pub infrastructure_build_output: String,
    pub service_build_output: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            pipeline_name: "MyPipeline".to_string(),
            topic_name: "PipelineNotification".to_string(),
            build_image: "aws/codebuild/standard:5.0".to_string(),
            infrastructure_source: SourceSettings {
                action_name: "Pipeline_Source".to_string(),
                owner: "MARudnicki".to_string(),
                repo: "maciejru-cdk".to_string(),
                branch: "master".to_string(),
                oauth_token: SecretValue::secrets_manager("github-token"),
                output: "CdkSourceOutput".to_string(),
            },
            service_source: SourceSettings {
                action_name: "Lambda_Source".to_string(),
                owner: "MARudnicki".to_string(),
                repo: "express-lambda".to_string(),
                branch: "master".to_string(),
                oauth_token: SecretValue::secrets_manager("github-token"),
                output: "LambdaSourceOutput".to_string(),
            },
            infrastructure_build_spec: "build-spec/cdk-build-spec.yml".to_string(),
            service_build_spec: "build-spec/lambda-build-spec.yml".to_string(),
            integration_test_build_spec: "build-spec/integ-test-build-spec.yml".to_string(),
            infrastructure_build_output: "CdkBuildOutput".to_string(),
            service_build_output: "LambdaBuildOutput".to_string(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let defaults = Self::default();
        let source = |role: SourceRole, output: String| -> Result<SourceSettings> {
            let source = config
                .source(role)
                .ok_or_else(|| Error::NotFound(format!("{role} source")))?;
            Ok(SourceSettings {
                action_name: source.action_name.clone(),
                owner: source.owner.clone(),
                repo: source.repo.clone(),
                branch: source.branch.clone(),
                oauth_token: SecretValue::secrets_manager(&source.secret),
                output,
            })
        };

        Ok(Self {
            pipeline_name: config.pipeline_name.clone(),
            topic_name: config.notification_topic.clone(),
            build_image: config.build_image.clone(),
            infrastructure_source: source(
                SourceRole::Infrastructure,
                defaults.infrastructure_source.output.clone(),
            )?,
            service_source: source(SourceRole::Service, defaults.service_source.output.clone())?,
            infrastructure_build_spec: config.build_specs.infrastructure.clone(),
            service_build_spec: config.build_specs.service.clone(),
            integration_test_build_spec: config.build_specs.integration_test.clone(),
            ..defaults
        })
    }
}

/// A CodeBuild project backing a build or test action.
#[derive(Debug, Clone)]
struct BuildProject {
    construct_id: String,
    logical_id: String,
    build_spec: String,
}

impl BuildProject {
    fn new(construct_id: impl Into<String>, build_spec: impl Into<String>) -> Self {
        let construct_id = construct_id.into();
        Self {
            logical_id: logical_id(&[&construct_id, "Resource"]),
            construct_id,
            build_spec: build_spec.into(),
        }
    }
}

/// A notification sent when an action fails.
#[derive(Debug, Clone)]
struct FailureRule {
    stage: String,
    action: String,
}

/// Variable namespace of the service deploy action in `stage_name`.
pub fn service_namespace(stage_name: &str) -> String {
    let stage: String = stage_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '@' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{stage}_Service")
}

/// Name of the rule reporting failed integration tests in `stage_name`.
///
/// Rule names allow `[.-_A-Za-z0-9]` and at most 64 characters.
fn failure_rule_name(stage_name: &str) -> String {
    let mut name: String = format!("IntegrationTestFailed-{stage_name}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    name.truncate(64);
    name
}

#[derive(Debug, Clone)]
pub struct PipelineStack {
    name: String,
    environment: Environment,
    settings: PipelineSettings,
    stages: Vec<Stage>,
    artifacts: ArtifactRegistry,
    projects: Vec<BuildProject>,
    failure_rules: Vec<FailureRule>,
}

impl PipelineStack {
    /// A pipeline with no stages.
    pub fn bare(
        name: impl Into<String>,
        environment: Environment,
        settings: PipelineSettings,
    ) -> Result<Self> {
        let name = name.into();
        validate_stack_name(&name)?;
        Ok(Self {
            name,
            environment,
            settings,
            stages: Vec::new(),
            artifacts: ArtifactRegistry::new(),
            projects: Vec::new(),
            failure_rules: Vec::new(),
        })
    }

    /// A pipeline with the source, build and self-update stages.
    pub fn new(
        name: impl Into<String>,
        environment: Environment,
        settings: PipelineSettings,
    ) -> Result<Self> {
        let mut pipeline = Self::bare(name, environment, settings)?;
        pipeline.add_source_stage()?;
        pipeline.add_build_stage()?;
        pipeline.add_self_update_stage()?;
        Ok(pipeline)
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Append an empty stage.
    pub fn add_stage(&mut self, name: &str) -> Result<StageHandle> {
        if !STAGE_NAME_REGEX.is_match(name) {
            return Err(Error::InvalidInput(format!("invalid stage name '{name}'")));
        }
        if self.stage(name).is_some() {
            return Err(Error::Conflict(format!(
                "pipeline '{}' already has a stage named '{name}'",
                self.name
            )));
        }
        self.stages.push(Stage::new(name));
        debug!(pipeline = %self.name, stage = %name, "Added stage");
        Ok(StageHandle {
            index: self.stages.len() - 1,
            name: name.to_string(),
        })
    }

    /// Add an action to a stage.
    ///
    /// Every artifact the action reads must be written by an action that
    /// runs earlier; every artifact it writes must not be written elsewhere.
    pub fn add_action(&mut self, handle: &StageHandle, action: Action) -> Result<()> {
        let index = self.stage_index(handle)?;

        for input in action.all_inputs() {
            self.artifacts.require_before(input, index, action.run_order)?;
        }

        if let Some(namespace) = &action.namespace {
            let taken = self
                .stages
                .iter()
                .flat_map(|s| &s.actions)
                .any(|a| a.namespace.as_ref() == Some(namespace));
            if taken {
                return Err(Error::Conflict(format!(
                    "variable namespace '{namespace}' is already used"
                )));
            }
        }

        let mut artifacts = self.artifacts.clone();
        for output in &action.outputs {
            artifacts.produce(
                output,
                Producer {
                    stage_index: index,
                    run_order: action.run_order,
                    action: format!("{}/{}", handle.name, action.name),
                },
            )?;
        }

        debug!(
            pipeline = %self.name,
            stage = %handle.name,
            action = %action.name,
            run_order = action.run_order,
            "Added action"
        );
        self.stages[index].push_action(action)?;
        self.artifacts = artifacts;
        Ok(())
    }

    pub fn add_source_stage(&mut self) -> Result<StageHandle> {
        let handle = self.add_stage(SOURCE_STAGE)?;
        let sources = [
            self.settings.infrastructure_source.clone(),
            self.settings.service_source.clone(),
        ];
        for source in sources {
            self.add_action(
                &handle,
                Action {
                    name: source.action_name,
                    run_order: 1,
                    inputs: vec![],
                    outputs: vec![Artifact::new(source.output)?],
                    kind: ActionKind::GitHubSource {
                        owner: source.owner,
                        repo: source.repo,
                        branch: source.branch,
                        oauth_token: source.oauth_token,
                    },
                    namespace: None,
                },
            )?;
        }
        Ok(handle)
    }

    pub fn add_build_stage(&mut self) -> Result<StageHandle> {
        let builds = [
            (
                INFRASTRUCTURE_BUILD_ACTION,
                BuildProject::new("CdkBuildProject", &self.settings.infrastructure_build_spec),
                Artifact::new(&self.settings.infrastructure_source.output)?,
                Artifact::new(&self.settings.infrastructure_build_output)?,
            ),
            (
                SERVICE_BUILD_ACTION,
                BuildProject::new("LambdaBuildProject", &self.settings.service_build_spec),
                Artifact::new(&self.settings.service_source.output)?,
                Artifact::new(&self.settings.service_build_output)?,
            ),
        ];
        for (_, _, input, _) in &builds {
            self.require_upstream(input)?;
        }

        let handle = self.add_stage(BUILD_STAGE)?;
        for (name, project, input, output) in builds {
            self.add_action(
                &handle,
                Action {
                    name: name.to_string(),
                    run_order: 1,
                    inputs: vec![input],
                    outputs: vec![output],
                    kind: ActionKind::CodeBuild {
                        project: project.logical_id.clone(),
                        action_type: BuildActionType::Build,
                        env: BTreeMap::new(),
                    },
                    namespace: None,
                },
            )?;
            self.projects.push(project);
        }
        Ok(handle)
    }

    pub fn add_self_update_stage(&mut self) -> Result<StageHandle> {
        let templates = Artifact::new(&self.settings.infrastructure_build_output)?;
        self.require_upstream(&templates)?;

        let handle = self.add_stage(UPDATE_STAGE)?;
        let action = self.deploy_action(PIPELINE_UPDATE_ACTION, &self.name, 1)?;
        self.add_action(&handle, action)?;
        Ok(handle)
    }

    /// Append a stage deploying `service`, fed with the latest service
    /// build.
    pub fn add_service_stage(
        &mut self,
        service: &ServiceStack,
        stage_name: &str,
    ) -> Result<StageHandle> {
        let templates = Artifact::new(&self.settings.infrastructure_build_output)?;
        let service_build = Artifact::new(&self.settings.service_build_output)?;
        self.require_upstream(&templates)?;
        self.require_upstream(&service_build)?;

        let mut action = self.deploy_action(SERVICE_UPDATE_ACTION, &service.name, 1)?;
        if let ActionKind::CloudFormationDeploy {
            parameter_overrides,
            ..
        } = &mut action.kind
        {
            *parameter_overrides = service.service_code().assign(&service_build.s3_location());
        }
        action.inputs.push(service_build);
        action.namespace = Some(service_namespace(stage_name));

        let handle = self.add_stage(stage_name)?;
        self.add_action(&handle, action)?;
        Ok(handle)
    }

    /// Deploy-time reference to the endpoint of the service deployed in
    /// `handle`'s stage.
    pub fn service_endpoint_variable(&self, handle: &StageHandle) -> Result<String> {
        let index = self.stage_index(handle)?;
        self.stages[index]
            .action(SERVICE_UPDATE_ACTION)
            .ok_or_else(|| {
                Error::InvalidReference(format!(
                    "stage '{}' does not deploy a service",
                    handle.name
                ))
            })?
            .variable(ENDPOINT_OUTPUT)
    }

    /// Run the integration tests against `endpoint` once everything else in
    /// the stage is done, and notify the topic when they fail.
    pub fn add_integration_test(
        &mut self,
        handle: &StageHandle,
        endpoint: impl Into<Value>,
    ) -> Result<()> {
        let index = self.stage_index(handle)?;
        let run_order = self.stages[index].max_run_order() + 1;
        let project = BuildProject::new(
            format!("ServiceIntegrationTestProject{}", handle.name),
            &self.settings.integration_test_build_spec,
        );

        let env = BTreeMap::from([(
            SERVICE_ENDPOINT_VARIABLE.to_string(),
            EnvironmentVariable::plaintext(endpoint),
        )]);
        let sources = Artifact::new(&self.settings.service_source.output)?;

        self.add_action(
            handle,
            Action {
                name: INTEGRATION_TEST_ACTION.to_string(),
                run_order,
                inputs: vec![sources],
                outputs: vec![],
                kind: ActionKind::CodeBuild {
                    project: project.logical_id.clone(),
                    action_type: BuildActionType::Test,
                    env,
                },
                namespace: None,
            },
        )?;
        self.projects.push(project);
        self.failure_rules.push(FailureRule {
            stage: handle.name.clone(),
            action: INTEGRATION_TEST_ACTION.to_string(),
        });
        Ok(())
    }

    /// Deploy `billing` alongside the other actions of `handle`'s stage.
    pub fn add_billing_stage(&mut self, billing: &BillingStack, handle: &StageHandle) -> Result<()> {
        let action = self.deploy_action(BILLING_UPDATE_ACTION, billing.stack_name(), 1)?;
        self.add_action(handle, action)
    }

    fn deploy_action(&self, name: &str, stack_name: &str, run_order: u32) -> Result<Action> {
        let templates = Artifact::new(&self.settings.infrastructure_build_output)?;
        Ok(Action {
            name: name.to_string(),
            run_order,
            inputs: vec![],
            outputs: vec![],
            kind: ActionKind::CloudFormationDeploy {
                stack_name: stack_name.to_string(),
                template_path: templates.at_path(template_file_name(stack_name))?,
                admin_permissions: true,
                parameter_overrides: BTreeMap::new(),
            },
            namespace: None,
        })
    }

    /// Fail unless `artifact` is available to the next stage.
    fn require_upstream(&self, artifact: &Artifact) -> Result<()> {
        self.artifacts
            .require_before(artifact, self.stages.len(), 1)
    }

    fn stage_index(&self, handle: &StageHandle) -> Result<usize> {
        match self.stages.get(handle.index) {
            Some(stage) if stage.name == handle.name => Ok(handle.index),
            _ => Err(Error::NotFound(format!(
                "stage '{}' in pipeline '{}'",
                handle.name, self.name
            ))),
        }
    }

    fn add_build_project(
        &self,
        builder: &mut StackBuilder,
        project: &BuildProject,
        bucket: &str,
    ) -> Result<String> {
        let construct_id = project.construct_id.as_str();
        let role = builder.add_resource(
            &[construct_id, "Role", "Resource"],
            service_role("codebuild.amazonaws.com", vec![]),
        )?;
        let log_group = join(
            "",
            vec![
                json!("/aws/codebuild/"),
                reference(&project.logical_id),
            ],
        );
        let policy = builder.add_resource(
            &[construct_id, "Role", "DefaultPolicy", "Resource"],
            role_policy(
                &format!("{construct_id}RoleDefaultPolicy"),
                &role,
                vec![
                    allow(
                        &["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
                        vec![
                            arn("logs", true, vec![json!("log-group:"), log_group.clone()]),
                            arn("logs", true, vec![json!("log-group:"), log_group, json!(":*")]),
                        ],
                    ),
                    bucket_access(bucket),
                ],
            ),
        )?;

        let id = builder.add_resource(
            &[construct_id, "Resource"],
            Resource::new("AWS::CodeBuild::Project")
                .with_properties(json!({
                    "Artifacts": { "Type": "CODEPIPELINE" },
                    "Environment": {
                        "ComputeType": "BUILD_GENERAL1_SMALL",
                        "Image": self.settings.build_image,
                        "ImagePullCredentialsType": "CODEBUILD",
                        "PrivilegedMode": false,
                        "Type": "LINUX_CONTAINER"
                    },
                    "ServiceRole": get_att(&role, "Arn"),
                    "Source": {
                        "BuildSpec": project.build_spec,
                        "Type": "CODEPIPELINE"
                    }
                }))
                .with_dependency(policy)
                .with_dependency(role),
        )?;
        if id != project.logical_id {
            return Err(Error::Internal(format!(
                "project '{construct_id}' synthesized as '{id}', actions reference '{}'",
                project.logical_id
            )));
        }
        Ok(id)
    }
}

fn bucket_access(bucket: &str) -> Value {
    allow(
        &[
            "s3:GetObject*",
            "s3:GetBucket*",
            "s3:List*",
            "s3:DeleteObject*",
            "s3:PutObject*",
            "s3:Abort*",
        ],
        vec![
            get_att(bucket, "Arn"),
            join("", vec![get_att(bucket, "Arn"), json!("/*")]),
        ],
    )
}

fn artifact_list(artifacts: &[&Artifact]) -> Value {
    Value::Array(
        artifacts
            .iter()
            .map(|a| json!({ "Name": a.name() }))
            .collect(),
    )
}

fn render_action(action: &Action, role_arn: Option<Value>) -> Result<Value> {
    let mut rendered = Map::new();
    rendered.insert("ActionTypeId".to_string(), action.action_type_id());
    rendered.insert("Configuration".to_string(), action.configuration(role_arn)?);
    rendered.insert("Name".to_string(), json!(action.name));
    rendered.insert("RunOrder".to_string(), json!(action.run_order));

    let inputs = action.all_inputs();
    if !inputs.is_empty() {
        rendered.insert("InputArtifacts".to_string(), artifact_list(&inputs));
    }
    if !action.outputs.is_empty() {
        let outputs: Vec<&Artifact> = action.outputs.iter().collect();
        rendered.insert("OutputArtifacts".to_string(), artifact_list(&outputs));
    }
    if let Some(namespace) = &action.namespace {
        rendered.insert("Namespace".to_string(), json!(namespace));
    }
    Ok(Value::Object(rendered))
}

impl StackDefinition for PipelineStack {
    fn stack_name(&self) -> &str {
        &self.name
    }

    fn environment(&self) -> &Environment {
        &self.environment
    }

    fn synthesize(&self) -> Result<SynthesizedStack> {
        let mut builder = StackBuilder::new(&self.name, self.environment.clone())?;
        if self.stages.is_empty() {
            info!(stack = %self.name, "Synthesized pipeline stack without stages");
            return Ok(builder.finish());
        }

        let topic = builder.add_resource(
            &["PipelineNotificationTopic", "Resource"],
            Resource::new("AWS::SNS::Topic")
                .with_property("TopicName", json!(self.settings.topic_name)),
        )?;

        let bucket = builder.add_resource(
            &["Pipeline", "ArtifactsBucket", "Resource"],
            Resource::new("AWS::S3::Bucket")
                .with_properties(json!({
                    "BucketEncryption": {
                        "ServerSideEncryptionConfiguration": [{
                            "ServerSideEncryptionByDefault": { "SSEAlgorithm": "AES256" }
                        }]
                    },
                    "PublicAccessBlockConfiguration": {
                        "BlockPublicAcls": true,
                        "BlockPublicPolicy": true,
                        "IgnorePublicAcls": true,
                        "RestrictPublicBuckets": true
                    }
                }))
                .retained(),
        )?;

        let mut project_arns = Vec::new();
        for project in &self.projects {
            let id = self.add_build_project(&mut builder, project, &bucket)?;
            project_arns.push(get_att(&id, "Arn"));
        }

        // Roles assumed by CloudFormation, keyed by (stage, action) position.
        let mut deploy_roles: BTreeMap<(usize, usize), String> = BTreeMap::new();
        let mut deployed_stacks = Vec::new();
        for (si, stage) in self.stages.iter().enumerate() {
            for (ai, action) in stage.actions.iter().enumerate() {
                let ActionKind::CloudFormationDeploy {
                    stack_name,
                    admin_permissions,
                    ..
                } = &action.kind
                else {
                    continue;
                };
                let path = ["Pipeline", stage.name.as_str(), action.name.as_str()];
                let role = builder.add_resource(
                    &[&path[..], &["Role", "Resource"][..]].concat(),
                    service_role("cloudformation.amazonaws.com", vec![]),
                )?;
                if *admin_permissions {
                    builder.add_resource(
                        &[&path[..], &["Role", "DefaultPolicy", "Resource"][..]].concat(),
                        role_policy(
                            &format!("{}{}RoleDefaultPolicy", stage.name, action.name),
                            &role,
                            vec![allow(&["*"], vec![json!("*")])],
                        ),
                    )?;
                }
                deploy_roles.insert((si, ai), role);
                deployed_stacks.push(arn(
                    "cloudformation",
                    true,
                    vec![json!(format!("stack/{stack_name}/*"))],
                ));
            }
        }

        let role = builder.add_resource(
            &["Pipeline", "Role", "Resource"],
            service_role("codepipeline.amazonaws.com", vec![]),
        )?;
        let mut statements = vec![bucket_access(&bucket)];
        if !project_arns.is_empty() {
            statements.push(allow(
                &[
                    "codebuild:BatchGetBuilds",
                    "codebuild:StartBuild",
                    "codebuild:StopBuild",
                ],
                project_arns,
            ));
        }
        if !deploy_roles.is_empty() {
            statements.push(allow(
                &[
                    "cloudformation:CreateStack",
                    "cloudformation:DescribeStack*",
                    "cloudformation:GetStackPolicy",
                    "cloudformation:GetTemplate*",
                    "cloudformation:SetStackPolicy",
                    "cloudformation:UpdateStack",
                    "cloudformation:ValidateTemplate",
                ],
                deployed_stacks,
            ));
            statements.push(allow(
                &["iam:PassRole"],
                deploy_roles.values().map(|r| get_att(r, "Arn")).collect(),
            ));
        }
        let policy = builder.add_resource(
            &["Pipeline", "Role", "DefaultPolicy", "Resource"],
            role_policy("PipelineRoleDefaultPolicy", &role, statements),
        )?;

        let mut stages = Vec::new();
        for (si, stage) in self.stages.iter().enumerate() {
            let mut actions = Vec::new();
            for (ai, action) in stage.actions.iter().enumerate() {
                let role_arn = deploy_roles.get(&(si, ai)).map(|r| get_att(r, "Arn"));
                actions.push(render_action(action, role_arn)?);
            }
            stages.push(json!({ "Actions": actions, "Name": stage.name }));
        }

        let pipeline = builder.add_resource(
            &["Pipeline", "Resource"],
            Resource::new("AWS::CodePipeline::Pipeline")
                .with_properties(json!({
                    "ArtifactStore": { "Location": reference(&bucket), "Type": "S3" },
                    "Name": self.settings.pipeline_name,
                    "RestartExecutionOnUpdate": true,
                    "RoleArn": get_att(&role, "Arn"),
                    "Stages": stages
                }))
                .with_dependency(policy)
                .with_dependency(role),
        )?;

        for stage in &self.stages {
            for action in &stage.actions {
                let ActionKind::GitHubSource {
                    branch,
                    oauth_token,
                    ..
                } = &action.kind
                else {
                    continue;
                };
                builder.add_resource(
                    &["Pipeline", &stage.name, &action.name, "WebhookResource"],
                    Resource::new("AWS::CodePipeline::Webhook").with_properties(json!({
                        "Authentication": "GITHUB_HMAC",
                        "AuthenticationConfiguration": {
                            "SecretToken": oauth_token.to_template_value()
                        },
                        "Filters": [{
                            "JsonPath": "$.ref",
                            "MatchEquals": format!("refs/heads/{branch}")
                        }],
                        "RegisterWithThirdParty": true,
                        "TargetAction": action.name,
                        "TargetPipeline": reference(&pipeline),
                        "TargetPipelineVersion": 1
                    })),
                )?;
            }
        }

        let pipeline_arn = arn("codepipeline", true, vec![reference(&pipeline)]);
        for rule in &self.failure_rules {
            let field = EventField::from_path(EXECUTION_URL_PATH)?;
            let message = format!("Integration Test Failed. See details here: {field}");
            let input = RuleTargetInput::from_text(&message, &[field])?;
            builder.add_resource(
                &["Pipeline", &rule.stage, &rule.action, "IntegrationTestFailed", "Resource"],
                Resource::new("AWS::Events::Rule").with_properties(json!({
                    "Description": "Integration test has failed",
                    "EventPattern": action_state_change_pattern(
                        pipeline_arn.clone(),
                        &rule.stage,
                        &rule.action,
                        "FAILED"
                    ),
                    "Name": failure_rule_name(&rule.stage),
                    "State": "ENABLED",
                    "Targets": [{
                        "Arn": reference(&topic),
                        "Id": "Target0",
                        "InputTransformer": input.to_input_transformer()
                    }]
                })),
            )?;
        }

        if !self.failure_rules.is_empty() {
            builder.add_resource(
                &["PipelineNotificationTopic", "Policy", "Resource"],
                Resource::new("AWS::SNS::TopicPolicy").with_properties(json!({
                    "PolicyDocument": policy_document(vec![json!({
                        "Action": "sns:Publish",
                        "Effect": "Allow",
                        "Principal": { "Service": "events.amazonaws.com" },
                        "Resource": reference(&topic),
                        "Sid": "0"
                    })]),
                    "Topics": [reference(&topic)]
                })),
            )?;
        }

        info!(
            stack = %self.name,
            stages = self.stages.len(),
            projects = self.projects.len(),
            "Synthesized pipeline stack"
        );
        Ok(builder.finish())
    }
}
