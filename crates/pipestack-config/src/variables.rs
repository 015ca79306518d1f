//! Variable interpolation for application configurations.
//!
//! Supports variables like:
//! - `${app.name}` - Application name
//! - `${env.VAR_NAME}` - Environment variable
//! - `${timestamp}` - Unix timestamp
//! - `${date}` - ISO date (YYYY-MM-DD)
//! - `${datetime}` - ISO datetime
//! - `${name}` - Custom variable

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Variable context containing all available variables for interpolation.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    /// Application-related variables
    pub app: AppContext,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Custom variables defined by user
    pub custom: HashMap<String, String>,
}

/// Application context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct AppContext {
    pub name: String,
}

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

impl VariableContext {
    /// Create a new empty variable context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context with the current process environment.
    pub fn from_process_env() -> Self {
        let mut ctx = Self::new();
        ctx.populate_env();
        ctx
    }

    /// Populate environment variables from the current process environment.
    pub fn populate_env(&mut self) {
        for (key, value) in std::env::vars() {
            self.env.insert(key, value);
        }
    }

    /// Add a custom variable.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.custom.insert(name.to_string(), value.into());
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["app", "name"] => Some(self.app.name.clone()).filter(|n| !n.is_empty()),

            ["env", name] => self.env.get(*name).cloned(),

            ["timestamp"] => Some(chrono::Utc::now().timestamp().to_string()),
            ["date"] => Some(chrono::Utc::now().format("%Y-%m-%d").to_string()),
            ["datetime"] => Some(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),

            // Single-part names check custom variables
            [name] => self.custom.get(*name).cloned(),

            _ => None,
        }
    }

    /// Interpolate all variables in a string.
    /// Unknown variables are left in place.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// Names of the variables in `input` that this context cannot resolve.
    pub fn unresolved(&self, input: &str) -> Vec<String> {
        VAR_REGEX
            .captures_iter(input)
            .map(|caps| caps[1].to_string())
            .filter(|name| self.resolve(name).is_none())
            .collect()
    }
}

/// Builder for creating VariableContext.
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    pub fn with_app(mut self, name: impl Into<String>) -> Self {
        self.ctx.app.name = name.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.custom.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

impl Default for VariableContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_variables() {
        let ctx = VariableContextBuilder::new()
            .with_env("CDK_DEFAULT_ACCOUNT", "123456789012")
            .with_env("CDK_DEFAULT_REGION", "eu-west-1")
            .build();

        let result = ctx.interpolate("aws://${env.CDK_DEFAULT_ACCOUNT}/${env.CDK_DEFAULT_REGION}");
        assert_eq!(result, "aws://123456789012/eu-west-1");
    }

    #[test]
    fn test_app_name() {
        let ctx = VariableContextBuilder::new().with_app("maciejru-cdk").build();
        assert_eq!(ctx.interpolate("${app.name}-budget"), "maciejru-cdk-budget");
    }

    #[test]
    fn test_unknown_variable_preserved() {
        let ctx = VariableContext::new();
        let result = ctx.interpolate("Unknown: ${unknown.var}");
        assert_eq!(result, "Unknown: ${unknown.var}");
    }

    #[test]
    fn test_unresolved_lists_only_missing() {
        let ctx = VariableContextBuilder::new()
            .with_env("PRESENT", "yes")
            .build();
        let missing = ctx.unresolved("${env.PRESENT} ${env.MISSING} ${app.name}");
        assert_eq!(missing, vec!["env.MISSING", "app.name"]);
    }

    #[test]
    fn test_custom_variables() {
        let mut ctx = VariableContext::new();
        ctx.set("owner", "MARudnicki");
        ctx.set("branch", "master");

        let result = ctx.interpolate("${owner}@${branch}");
        assert_eq!(result, "MARudnicki@master");
    }

    #[test]
    fn test_timestamp_variables() {
        let ctx = VariableContext::new();

        let result = ctx.interpolate("${date}");
        // Should be in YYYY-MM-DD format
        assert!(result.len() == 10);
        assert!(result.contains('-'));
    }

    #[test]
    fn test_braces_without_dollar_untouched() {
        let ctx = VariableContextBuilder::new().with_custom("stack", "Billing").build();
        let result = ctx.interpolate("{stack}.template.json ${stack}.template.json");
        assert_eq!(result, "{stack}.template.json Billing.template.json");
    }
}
