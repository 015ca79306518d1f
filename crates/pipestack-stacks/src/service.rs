//! Service stack: a Lambda function behind two HTTP APIs.
//!
//! The function code is not known when the stack is defined. Its location
//! comes from two template parameters that the pipeline fills in at deploy
//! time with the service build artifact (see [`ServiceCode::assign`]).
//!
//! The inner API routes every request to the function. The outer API routes
//! `GET /` to the inner API and `GET /test` to a fixed external URL. In the
//! production stage the function is published behind an alias that
//! CodeDeploy shifts gradually, rolling back when the inner API reports
//! server errors.

use chrono::{DateTime, SecondsFormat, Utc};
use pipestack_config::ServiceConfig;
use pipestack_core::artifact::S3Location;
use pipestack_core::construct::logical_id;
use pipestack_core::deployer::{AlarmSpec, AutoRollback, DeploymentStrategy};
use pipestack_core::intrinsic::{get_att, import_value, join, managed_policy_arn, reference, sub};
use pipestack_core::template::Export;
use pipestack_core::{
    Environment, Error, Output, Parameter, Resource, Result, StackBuilder, StackDefinition,
    SynthesizedStack,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{debug, info};
use url::Url;

/// Stage label that enables gradual deployment.
pub const PRODUCTION_STAGE: &str = "Prod";
pub const DEFAULT_RUNTIME: &str = "nodejs14.x";
pub const DEFAULT_HANDLER: &str = "src/lambda.handler";
pub const DEFAULT_TEST_ROUTE_URL: &str = "https://google.com";
/// Logical id of the endpoint output; also its output variable name.
pub const ENDPOINT_OUTPUT: &str = "ApiEndpointOutput";

const FUNCTION: &str = "ServiceLambda";
const ALIAS: &str = "ServiceLambdaAlias";
const INNER_API: &str = "InnerApiGateway";
const OUTER_API: &str = "outerApiGateway";
const DEPLOYMENT_GROUP: &str = "DeploymentGroup";
const BUCKET_PARAMETER: &str = "LambdaSourceBucketNameParameter";
const OBJECT_KEY_PARAMETER: &str = "LambdaSourceObjectKeyParameter";

/// Template parameters receiving the function code location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCode {
    pub bucket_parameter: String,
    pub object_key_parameter: String,
}

impl ServiceCode {
    /// Parameter overrides pointing the function at `location`.
    pub fn assign(&self, location: &S3Location) -> BTreeMap<String, Value> {
        BTreeMap::from([
            (self.bucket_parameter.clone(), location.bucket_name.clone()),
            (self.object_key_parameter.clone(), location.object_key.clone()),
        ])
    }
}

/// Where an outer API route sends its traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RouteTarget {
    /// The endpoint of the inner API.
    InnerEndpoint,
    /// A fixed external URL.
    External(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub method: String,
    pub path: String,
    pub target: RouteTarget,
}

impl Route {
    pub fn route_key(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    /// Construct id of the route, e.g. `GET--test` for `GET /test`.
    fn construct_id(&self) -> String {
        format!("{}-{}", self.method, self.path.replace('/', "-"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStack {
    pub name: String,
    pub environment: Environment,
    pub stage_name: Option<String>,
    /// Rendered into the function description, so every synthesis
    /// publishes a new version.
    pub generated_at: DateTime<Utc>,
    pub runtime: String,
    pub handler: String,
    pub test_route_url: String,
    pub deployment: DeploymentStrategy,
    pub auto_rollback: AutoRollback,
    pub alarm: AlarmSpec,
}

impl ServiceStack {
    pub fn new(name: impl Into<String>, environment: Environment, stage_name: Option<String>) -> Self {
        Self {
            name: name.into(),
            environment,
            stage_name,
            generated_at: Utc::now(),
            runtime: DEFAULT_RUNTIME.to_string(),
            handler: DEFAULT_HANDLER.to_string(),
            test_route_url: DEFAULT_TEST_ROUTE_URL.to_string(),
            deployment: DeploymentStrategy::CANARY_10PERCENT_5MINUTES,
            auto_rollback: AutoRollback::default(),
            alarm: AlarmSpec::server_errors_per_minute(),
        }
    }

    pub fn from_config(config: &ServiceConfig, environment: Environment) -> Self {
        Self::new(
            config.stack_name.clone(),
            environment,
            Some(config.stage.clone()),
        )
    }

    pub fn with_generated_at(mut self, generated_at: DateTime<Utc>) -> Self {
        self.generated_at = generated_at;
        self
    }

    pub fn with_test_route_url(mut self, url: impl Into<String>) -> Self {
        self.test_route_url = url.into();
        self
    }

    /// Stage label used in names; the stack name when no stage is set.
    pub fn stage_label(&self) -> &str {
        self.stage_name.as_deref().unwrap_or(&self.name)
    }

    pub fn is_production(&self) -> bool {
        self.stage_name.as_deref() == Some(PRODUCTION_STAGE)
    }

    pub fn function_name(&self) -> String {
        format!("serviceLambda_{}", self.stage_label())
    }

    pub fn alias_name(&self) -> String {
        format!("ServiceLambdaAlias{}", self.stage_label())
    }

    pub fn export_name(&self) -> String {
        format!("ServiceEndpoint{}", self.stage_label())
    }

    /// Placeholder parameters for the function code.
    pub fn service_code(&self) -> ServiceCode {
        ServiceCode {
            bucket_parameter: logical_id(&[FUNCTION, BUCKET_PARAMETER]),
            object_key_parameter: logical_id(&[FUNCTION, OBJECT_KEY_PARAMETER]),
        }
    }

    /// Import of the exported endpoint, for stacks deployed after this one.
    pub fn endpoint_import(&self) -> Value {
        import_value(&self.export_name())
    }

    /// Deploy-time value of the inner API endpoint.
    pub fn inner_endpoint(&self) -> Value {
        get_att(&logical_id(&[INNER_API, "Resource"]), "ApiEndpoint")
    }

    pub fn outer_routes(&self) -> Vec<Route> {
        vec![
            Route {
                method: "GET".to_string(),
                path: "/".to_string(),
                target: RouteTarget::InnerEndpoint,
            },
            Route {
                method: "GET".to_string(),
                path: "/test".to_string(),
                target: RouteTarget::External(self.test_route_url.clone()),
            },
        ]
    }

    /// URL a `GET` on the outer API proxies `path` to.
    pub fn resolve_route(&self, path: &str) -> Option<Value> {
        self.outer_routes()
            .into_iter()
            .find(|r| r.method == "GET" && r.path == path)
            .map(|r| self.route_target_url(&r.target))
    }

    fn route_target_url(&self, target: &RouteTarget) -> Value {
        match target {
            RouteTarget::InnerEndpoint => self.inner_endpoint(),
            RouteTarget::External(url) => Value::String(url.clone()),
        }
    }

    fn validate(&self) -> Result<()> {
        Url::parse(&self.test_route_url).map_err(|e| {
            Error::InvalidInput(format!("invalid test route url '{}': {e}", self.test_route_url))
        })?;
        if self.is_production() {
            self.deployment.validate()?;
            self.alarm.validate()?;
        }
        Ok(())
    }

    fn add_function(&self, builder: &mut StackBuilder) -> Result<FunctionIds> {
        let code = self.service_code();
        builder.add_parameter(
            &[FUNCTION, BUCKET_PARAMETER],
            Parameter::string(format!("The name of the S3 bucket holding the code of {FUNCTION}")),
        )?;
        builder.add_parameter(
            &[FUNCTION, OBJECT_KEY_PARAMETER],
            Parameter::string(format!("The S3 key of the code of {FUNCTION}")),
        )?;

        let role = builder.add_resource(
            &[FUNCTION, "ServiceRole", "Resource"],
            crate::iam::service_role(
                "lambda.amazonaws.com",
                vec![managed_policy_arn("service-role/AWSLambdaBasicExecutionRole")],
            ),
        )?;

        let properties = json!({
            "Code": {
                "S3Bucket": reference(&code.bucket_parameter),
                "S3Key": reference(&code.object_key_parameter)
            },
            "Description": format!(
                "Generated on {}",
                self.generated_at.to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
            "FunctionName": self.function_name(),
            "Handler": self.handler,
            "Role": get_att(&role, "Arn"),
            "Runtime": self.runtime
        });
        let version_hash = format!("{:x}", md5::compute(properties.to_string()));

        let function = builder.add_resource(
            &[FUNCTION, "Resource"],
            Resource::new("AWS::Lambda::Function")
                .with_properties(properties)
                .with_dependency(role.clone()),
        )?;

        let version = builder.add_resource(
            &[FUNCTION, &format!("CurrentVersion{version_hash}")],
            Resource::new("AWS::Lambda::Version")
                .with_property("FunctionName", reference(&function)),
        )?;

        let alias = builder.add_resource(
            &[ALIAS, "Resource"],
            Resource::new("AWS::Lambda::Alias").with_properties(json!({
                "FunctionName": reference(&function),
                "FunctionVersion": get_att(&version, "Version"),
                "Name": self.alias_name()
            })),
        )?;

        Ok(FunctionIds { function, alias })
    }

    fn add_inner_api(&self, builder: &mut StackBuilder, function: &str) -> Result<String> {
        let api = builder.add_resource(&[INNER_API, "Resource"], http_api(INNER_API))?;

        let integration = builder.add_resource(
            &[INNER_API, "DefaultRoute", "LambdaIntegration", "Resource"],
            Resource::new("AWS::ApiGatewayV2::Integration").with_properties(json!({
                "ApiId": reference(&api),
                "IntegrationType": "AWS_PROXY",
                "IntegrationUri": get_att(function, "Arn"),
                "PayloadFormatVersion": "2.0"
            })),
        )?;

        builder.add_resource(
            &[INNER_API, "DefaultRoute", "Permission"],
            Resource::new("AWS::Lambda::Permission").with_properties(json!({
                "Action": "lambda:InvokeFunction",
                "FunctionName": get_att(function, "Arn"),
                "Principal": "apigateway.amazonaws.com",
                "SourceArn": sub(&format!(
                    "arn:${{AWS::Partition}}:execute-api:${{AWS::Region}}:${{AWS::AccountId}}:${{{api}}}/*/*"
                ))
            })),
        )?;

        builder.add_resource(
            &[INNER_API, "DefaultRoute", "Resource"],
            route(&api, "$default", &integration),
        )?;

        builder.add_resource(&[INNER_API, "DefaultStage", "Resource"], default_stage(&api))?;

        Ok(api)
    }

    fn add_outer_api(&self, builder: &mut StackBuilder) -> Result<String> {
        let api = builder.add_resource(&[OUTER_API, "Resource"], http_api(OUTER_API))?;

        for r in self.outer_routes() {
            let construct_id = r.construct_id();
            let integration = builder.add_resource(
                &[OUTER_API, &construct_id, "HttpIntegration", "Resource"],
                Resource::new("AWS::ApiGatewayV2::Integration").with_properties(json!({
                    "ApiId": reference(&api),
                    "IntegrationMethod": "ANY",
                    "IntegrationType": "HTTP_PROXY",
                    "IntegrationUri": self.route_target_url(&r.target),
                    "PayloadFormatVersion": "1.0"
                })),
            )?;
            builder.add_resource(
                &[OUTER_API, &construct_id, "Resource"],
                route(&api, &r.route_key(), &integration),
            )?;
            debug!(stack = %self.name, route = %r.route_key(), "Added outer route");
        }

        builder.add_resource(&[OUTER_API, "DefaultStage", "Resource"], default_stage(&api))?;

        Ok(api)
    }

    /// CodeDeploy application, error alarm and deployment group.
    fn add_gradual_deployment(
        &self,
        builder: &mut StackBuilder,
        inner_api: &str,
        alias: &str,
    ) -> Result<()> {
        let application = builder.add_resource(
            &[DEPLOYMENT_GROUP, "Application", "Resource"],
            Resource::new("AWS::CodeDeploy::Application")
                .with_property("ComputePlatform", json!("Lambda")),
        )?;

        let role = builder.add_resource(
            &[DEPLOYMENT_GROUP, "ServiceRole", "Resource"],
            crate::iam::service_role(
                "codedeploy.amazonaws.com",
                vec![managed_policy_arn(
                    "service-role/AWSCodeDeployRoleForLambdaLimited",
                )],
            ),
        )?;

        let alarm = builder.add_resource(
            &["ServiceErrorAlarm", "Resource"],
            Resource::new("AWS::CloudWatch::Alarm").with_properties(json!({
                "AlarmDescription": "Service experienced error",
                "AlarmName": format!("My severe alarm {}", self.stage_label()),
                "ComparisonOperator": self.alarm.comparison_operator.as_str(),
                "Dimensions": [{ "Name": "ApiId", "Value": reference(inner_api) }],
                "EvaluationPeriods": self.alarm.evaluation_periods,
                "MetricName": "5xx",
                "Namespace": "AWS/ApiGateway",
                "Period": self.alarm.period.as_secs(),
                "Statistic": self.alarm.statistic,
                "Threshold": self.alarm.threshold,
                "TreatMissingData": self.alarm.treat_missing_data.as_str()
            })),
        )?;

        let config_name = match self.deployment.predefined_name() {
            Some(name) => json!(name),
            None => {
                let config = builder.add_resource(
                    &["DeploymentConfig", "Resource"],
                    Resource::new("AWS::CodeDeploy::DeploymentConfig").with_properties(json!({
                        "ComputePlatform": "Lambda",
                        "TrafficRoutingConfig": self.deployment.traffic_routing_config()
                    })),
                )?;
                reference(&config)
            }
        };

        let group = builder.add_resource(
            &[DEPLOYMENT_GROUP, "Resource"],
            Resource::new("AWS::CodeDeploy::DeploymentGroup").with_properties(json!({
                "AlarmConfiguration": {
                    "Alarms": [{ "Name": reference(&alarm) }],
                    "Enabled": true
                },
                "ApplicationName": reference(&application),
                "AutoRollbackConfiguration": self.auto_rollback.to_config(),
                "DeploymentConfigName": config_name,
                "DeploymentStyle": {
                    "DeploymentOption": "WITH_TRAFFIC_CONTROL",
                    "DeploymentType": "BLUE_GREEN"
                },
                "ServiceRoleArn": get_att(&role, "Arn")
            })),
        )?;

        builder.resource_mut(alias)?.update_policy = Some(json!({
            "CodeDeployLambdaAliasUpdate": {
                "ApplicationName": reference(&application),
                "DeploymentGroupName": reference(&group)
            }
        }));

        info!(stack = %self.name, strategy = %self.deployment, "Enabled gradual deployment");
        Ok(())
    }
}

struct FunctionIds {
    function: String,
    alias: String,
}

fn http_api(name: &str) -> Resource {
    Resource::new("AWS::ApiGatewayV2::Api").with_properties(json!({
        "Name": name,
        "ProtocolType": "HTTP"
    }))
}

fn route(api: &str, route_key: &str, integration: &str) -> Resource {
    Resource::new("AWS::ApiGatewayV2::Route").with_properties(json!({
        "ApiId": reference(api),
        "AuthorizationType": "NONE",
        "RouteKey": route_key,
        "Target": join("", vec![json!("integrations/"), reference(integration)])
    }))
}

fn default_stage(api: &str) -> Resource {
    Resource::new("AWS::ApiGatewayV2::Stage").with_properties(json!({
        "ApiId": reference(api),
        "AutoDeploy": true,
        "StageName": "$default"
    }))
}

impl StackDefinition for ServiceStack {
    fn stack_name(&self) -> &str {
        &self.name
    }

    fn environment(&self) -> &Environment {
        &self.environment
    }

    fn synthesize(&self) -> Result<SynthesizedStack> {
        self.validate()?;
        let mut builder = StackBuilder::new(&self.name, self.environment.clone())?;

        let ids = self.add_function(&mut builder)?;
        let inner_api = self.add_inner_api(&mut builder, &ids.function)?;
        self.add_outer_api(&mut builder)?;

        builder.add_output(
            &[ENDPOINT_OUTPUT],
            Output {
                description: Some("Api endpoint".to_string()),
                value: get_att(&inner_api, "ApiEndpoint"),
                export: Some(Export {
                    name: self.export_name(),
                }),
            },
        )?;

        if self.is_production() {
            self.add_gradual_deployment(&mut builder, &inner_api, &ids.alias)?;
        }

        info!(stack = %self.name, stage = %self.stage_label(), "Synthesized service stack");
        Ok(builder.finish())
    }
}
