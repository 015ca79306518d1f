//! Deployable units: environments, the stack builder and synthesized stacks.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

use crate::construct::ConstructTree;
use crate::template::{Output, Parameter, Resource, Template};
use crate::{Error, Result};

/// CloudFormation stack names: a letter followed by letters, digits or hyphens.
static STACK_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]{0,127}$").expect("valid regex"));

/// Target account and region of a stack.
///
/// Unset values are resolved by the deployment engine at deploy time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub account: Option<String>,
    pub region: Option<String>,
}

impl Environment {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: Some(account.into()),
            region: Some(region.into()),
        }
    }

    /// Environment with neither account nor region pinned.
    pub fn agnostic() -> Self {
        Self::default()
    }

    pub fn is_agnostic(&self) -> bool {
        self.account.is_none() && self.region.is_none()
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "aws://{}/{}",
            self.account.as_deref().unwrap_or("unknown-account"),
            self.region.as_deref().unwrap_or("unknown-region")
        )
    }
}

pub fn validate_stack_name(name: &str) -> Result<()> {
    if STACK_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "stack name '{name}' must start with a letter and contain only letters, digits and hyphens (max 128)"
        )))
    }
}

/// Accumulates the resources of one stack while it is synthesized.
///
/// Owns the construct tree, so logical ids are allocated per stack and
/// never leak between stacks.
#[derive(Debug)]
pub struct StackBuilder {
    name: String,
    environment: Environment,
    tree: ConstructTree,
    template: Template,
}

impl StackBuilder {
    pub fn new(name: impl Into<String>, environment: Environment) -> Result<Self> {
        let name = name.into();
        validate_stack_name(&name)?;
        Ok(Self {
            tree: ConstructTree::new(name.clone()),
            name,
            environment,
            template: Template::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Add a resource at a construct path, returning its logical id.
    pub fn add_resource(&mut self, path: &[&str], resource: Resource) -> Result<String> {
        let id = self.tree.register(path, resource.resource_type.clone())?;
        debug!(stack = %self.name, logical_id = %id, resource_type = %resource.resource_type, "Adding resource");
        self.template.add_resource(id.clone(), resource)?;
        Ok(id)
    }

    pub fn add_parameter(&mut self, path: &[&str], parameter: Parameter) -> Result<String> {
        let id = self.tree.register(path, "Parameter")?;
        self.template.add_parameter(id.clone(), parameter)?;
        Ok(id)
    }

    pub fn add_output(&mut self, path: &[&str], output: Output) -> Result<String> {
        let id = self.tree.register(path, "Output")?;
        self.template.add_output(id.clone(), output)?;
        Ok(id)
    }

    /// Mutable access to an already added resource.
    pub fn resource_mut(&mut self, logical_id: &str) -> Result<&mut Resource> {
        self.template
            .resources
            .get_mut(logical_id)
            .ok_or_else(|| Error::NotFound(format!("resource '{logical_id}' in stack '{}'", self.name)))
    }

    pub fn finish(self) -> SynthesizedStack {
        SynthesizedStack {
            name: self.name,
            environment: self.environment,
            template: self.template,
            tree: self.tree,
        }
    }
}

/// The output of synthesizing one deployable unit.
#[derive(Debug, Clone)]
pub struct SynthesizedStack {
    pub name: String,
    pub environment: Environment,
    pub template: Template,
    pub tree: ConstructTree,
}

impl SynthesizedStack {
    /// File name of the template inside the build output.
    pub fn template_file_name(&self) -> String {
        template_file_name(&self.name)
    }

    pub fn tree_file_name(&self) -> String {
        format!("{}.tree.json", self.name)
    }
}

pub fn template_file_name(stack_name: &str) -> String {
    format!("{stack_name}.template.json")
}

/// A deployable unit: a configuration struct that can be turned into a
/// template without side effects.
pub trait StackDefinition {
    fn stack_name(&self) -> &str;

    fn environment(&self) -> &Environment;

    fn synthesize(&self) -> Result<SynthesizedStack>;
}
