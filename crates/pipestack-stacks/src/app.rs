//! Application assembly.
//!
//! An [`App`] owns the list of stacks to synthesize. There is no global
//! registry: stacks are added explicitly, usually through
//! [`App::from_config`].

use pipestack_config::AppConfig;
use pipestack_core::{Error, Result, StackDefinition, SynthesizedStack};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::billing::BillingStack;
use crate::pipeline::{PipelineSettings, PipelineStack};
use crate::service::ServiceStack;

/// Version tag of the manifest format.
pub const MANIFEST_VERSION: &str = "pipestack-1";

#[derive(Default)]
pub struct App {
    stacks: Vec<Box<dyn StackDefinition>>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire the stacks an application config declares.
    ///
    /// Each service gets its own pipeline stage, named after its stage
    /// label, with an optional integration test and billing deployment.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let environment = config.environment();
        let settings = PipelineSettings::from_config(&config.pipeline)?;
        let mut pipeline =
            PipelineStack::new(&config.pipeline.stack_name, environment.clone(), settings)?;

        let billing = config
            .billing
            .as_ref()
            .map(|b| BillingStack::from_config(b, environment.clone()));

        let mut services = Vec::new();
        for service_config in &config.services {
            let service = ServiceStack::from_config(service_config, environment.clone());
            let stage = pipeline.add_service_stage(&service, &service_config.stage)?;

            if service_config.integration_test {
                let endpoint = pipeline.service_endpoint_variable(&stage)?;
                pipeline.add_integration_test(&stage, endpoint)?;
            }
            if service_config.billing {
                let billing = billing.as_ref().ok_or_else(|| {
                    Error::InvalidReference(format!(
                        "stage '{}' deploys billing but no billing stack is defined",
                        service_config.stage
                    ))
                })?;
                pipeline.add_billing_stage(billing, &stage)?;
            }
            services.push(service);
        }

        let mut app = Self::new();
        app.add_stack(pipeline)?;
        if let Some(billing) = billing {
            app.add_stack(billing)?;
        }
        for service in services {
            app.add_stack(service)?;
        }
        Ok(app)
    }

    pub fn add_stack(&mut self, stack: impl StackDefinition + 'static) -> Result<()> {
        if self.stack(stack.stack_name()).is_some() {
            return Err(Error::Conflict(format!(
                "stack '{}' is already defined",
                stack.stack_name()
            )));
        }
        debug!(stack = %stack.stack_name(), environment = %stack.environment(), "Added stack");
        self.stacks.push(Box::new(stack));
        Ok(())
    }

    pub fn stack(&self, name: &str) -> Option<&dyn StackDefinition> {
        self.stacks
            .iter()
            .find(|s| s.stack_name() == name)
            .map(|s| &**s)
    }

    pub fn stack_names(&self) -> Vec<&str> {
        self.stacks.iter().map(|s| s.stack_name()).collect()
    }

    /// Synthesize every stack.
    pub fn synth(&self) -> Result<CloudAssembly> {
        let stacks = self
            .stacks
            .iter()
            .map(|s| s.synthesize())
            .collect::<Result<Vec<_>>>()?;
        info!(stacks = stacks.len(), "Synthesized application");
        Ok(CloudAssembly { stacks })
    }
}

/// The synthesized templates of an application.
#[derive(Debug, Clone)]
pub struct CloudAssembly {
    pub stacks: Vec<SynthesizedStack>,
}

impl CloudAssembly {
    pub fn stack(&self, name: &str) -> Option<&SynthesizedStack> {
        self.stacks.iter().find(|s| s.name == name)
    }

    /// Index of the assembly: one entry per stack with its environment and
    /// files.
    pub fn manifest(&self) -> Value {
        let stacks: Vec<&SynthesizedStack> = self.stacks.iter().collect();
        Self::manifest_for(&stacks)
    }

    /// Index of a subset of the assembly.
    pub fn manifest_for(stacks: &[&SynthesizedStack]) -> Value {
        let artifacts: Map<String, Value> = stacks
            .iter()
            .map(|stack| {
                (
                    stack.name.clone(),
                    json!({
                        "type": "aws:cloudformation:stack",
                        "environment": stack.environment.to_string(),
                        "properties": {
                            "templateFile": stack.template_file_name(),
                            "treeFile": stack.tree_file_name()
                        }
                    }),
                )
            })
            .collect();

        json!({
            "version": MANIFEST_VERSION,
            "artifacts": artifacts
        })
    }
}
