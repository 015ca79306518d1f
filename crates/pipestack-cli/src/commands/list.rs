//! Human readable overview of an application.

use anyhow::Result;
use pipestack_config::AppConfig;
use pipestack_core::Template;
use pipestack_core::deployer::CanaryStep;
use pipestack_stacks::service::PRODUCTION_STAGE;
use pipestack_stacks::{App, ServiceStack};
use std::path::Path;

pub async fn run(config_path: &Path) -> Result<()> {
    let config = super::load_config(config_path).await?;
    let assembly = App::from_config(&config)?.synth()?;

    println!("Stacks:");
    for stack in &assembly.stacks {
        println!(
            "  {} ({}, {} resources)",
            stack.name,
            stack.environment,
            stack.template.resources.len()
        );
    }

    if let Some(pipeline) = assembly.stack(&config.pipeline.stack_name) {
        println!("Pipeline {}:", config.pipeline.pipeline_name);
        for line in describe_stages(&pipeline.template) {
            println!("  {line}");
        }
    }

    for (name, steps) in rollouts(&config) {
        println!("Rollout of {name}:");
        for step in steps {
            println!("  {}", describe_step(&step));
        }
    }

    Ok(())
}

/// One line per stage: its name and actions grouped by run order.
pub fn describe_stages(template: &Template) -> Vec<String> {
    let stages = template
        .resources_of_type("AWS::CodePipeline::Pipeline")
        .filter_map(|(_, pipeline)| pipeline.property("Stages"))
        .filter_map(|stages| stages.as_array())
        .flatten();

    stages
        .map(|stage| {
            let mut actions: Vec<(u64, &str)> = stage["Actions"]
                .as_array()
                .map(|actions| {
                    actions
                        .iter()
                        .map(|a| {
                            (
                                a["RunOrder"].as_u64().unwrap_or(1),
                                a["Name"].as_str().unwrap_or_default(),
                            )
                        })
                        .collect()
                })
                .unwrap_or_default();
            actions.sort();
            let actions: Vec<String> = actions
                .iter()
                .map(|(run_order, name)| format!("{run_order}:{name}"))
                .collect();
            format!(
                "{} [{}]",
                stage["Name"].as_str().unwrap_or_default(),
                actions.join(", ")
            )
        })
        .collect()
}

fn rollouts(config: &AppConfig) -> Vec<(String, Vec<CanaryStep>)> {
    config
        .services
        .iter()
        .filter(|s| s.stage == PRODUCTION_STAGE)
        .map(|s| {
            let service = ServiceStack::from_config(s, config.environment());
            (service.name.clone(), service.deployment.steps())
        })
        .collect()
}

fn describe_step(step: &CanaryStep) -> String {
    match step.duration {
        Some(duration) => format!(
            "{}% of traffic, wait {}m",
            step.traffic_percent,
            duration.as_secs() / 60
        ),
        None => format!("{}% of traffic", step.traffic_percent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipestack_core::{Environment, StackDefinition};
    use pipestack_stacks::{PipelineSettings, PipelineStack};

    #[test]
    fn test_describe_stages() {
        let mut pipeline = PipelineStack::new(
            "MaciejruCdkStack",
            Environment::agnostic(),
            PipelineSettings::default(),
        )
        .unwrap();
        let service = ServiceStack::new(
            "LambdaStackProd",
            Environment::agnostic(),
            Some("Prod".to_string()),
        );
        let handle = pipeline.add_service_stage(&service, "Prod").unwrap();
        pipeline
            .add_integration_test(&handle, "https://example.com")
            .unwrap();

        let lines = describe_stages(&pipeline.synthesize().unwrap().template);
        assert_eq!(
            lines,
            vec![
                "MySource [1:Lambda_Source, 1:Pipeline_Source]",
                "MyBuild [1:CDK_Build, 1:Service_Build]",
                "MyPipelineUpdate [1:Pipeline_Update]",
                "Prod [1:Service_Update, 2:Integration_Test]",
            ]
        );
    }

    #[test]
    fn test_describe_canary_steps() {
        let service = ServiceStack::new("LambdaStackProd", Environment::agnostic(), None);
        let lines: Vec<String> = service.deployment.steps().iter().map(describe_step).collect();
        assert_eq!(lines, vec!["10% of traffic, wait 5m", "100% of traffic"]);
    }
}
