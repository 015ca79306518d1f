//! Billing stack: one budget alarm, deployable on its own.

use pipestack_config::BillingConfig;
use pipestack_core::{Environment, Result, StackBuilder, StackDefinition, SynthesizedStack};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::budget::{BudgetProps, add_budget};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingStack {
    pub name: String,
    pub environment: Environment,
    /// Monthly limit in USD.
    pub budget_amount: f64,
    pub email_address: String,
}

impl BillingStack {
    pub fn new(
        name: impl Into<String>,
        environment: Environment,
        budget_amount: f64,
        email_address: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            environment,
            budget_amount,
            email_address: email_address.into(),
        }
    }

    pub fn from_config(config: &BillingConfig, environment: Environment) -> Self {
        Self::new(
            config.stack_name.clone(),
            environment,
            config.amount,
            config.email.clone(),
        )
    }
}

impl StackDefinition for BillingStack {
    fn stack_name(&self) -> &str {
        &self.name
    }

    fn environment(&self) -> &Environment {
        &self.environment
    }

    fn synthesize(&self) -> Result<SynthesizedStack> {
        let mut builder = StackBuilder::new(&self.name, self.environment.clone())?;
        add_budget(
            &mut builder,
            "Budget",
            &BudgetProps {
                amount: self.budget_amount,
                email: self.email_address.clone(),
            },
        )?;

        info!(stack = %self.name, amount = self.budget_amount, "Synthesized billing stack");
        Ok(builder.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipestack_core::Error;

    fn subscribers(stack: &SynthesizedStack) -> Vec<serde_json::Value> {
        stack
            .template
            .resources_of_type("AWS::Budgets::Budget")
            .flat_map(|(_, budget)| {
                budget.property("NotificationsWithSubscribers").unwrap()[0]["Subscribers"]
                    .as_array()
                    .unwrap()
                    .clone()
            })
            .collect()
    }

    #[test]
    fn test_exactly_one_budget_and_subscriber() {
        let cases = [
            (2.0, "test@example.com"),
            (15.0, "maciejru@amazon.com"),
            (99.99, "billing@corp.example"),
            (100000.0, "x@y"),
        ];
        for (amount, email) in cases {
            let stack = BillingStack::new("BillingStack", Environment::agnostic(), amount, email)
                .synthesize()
                .unwrap();

            assert_eq!(stack.template.count_of_type("AWS::Budgets::Budget"), 1);
            assert_eq!(stack.template.resources.len(), 1);

            let (_, budget) = stack
                .template
                .resources_of_type("AWS::Budgets::Budget")
                .next()
                .unwrap();
            let limit = &budget.property("Budget").unwrap()["BudgetLimit"]["Amount"];
            assert_eq!(limit.as_f64().unwrap(), amount);

            let subscribers = subscribers(&stack);
            assert_eq!(subscribers.len(), 1);
            assert_eq!(subscribers[0]["Address"], email);
            assert_eq!(subscribers[0]["SubscriptionType"], "EMAIL");
        }
    }

    #[test]
    fn test_invalid_amount_fails_synthesis() {
        let err = BillingStack::new("BillingStack", Environment::agnostic(), 0.0, "a@b.com")
            .synthesize()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_from_config() {
        let config = BillingConfig {
            stack_name: "BillingStack".to_string(),
            amount: 15.0,
            email: "maciejru@amazon.com".to_string(),
        };
        let env = Environment::new("123456789012", "eu-west-1");
        let stack = BillingStack::from_config(&config, env.clone());
        assert_eq!(stack.stack_name(), "BillingStack");
        assert_eq!(stack.environment(), &env);
        assert_eq!(stack.budget_amount, 15.0);
    }

    #[test]
    fn test_template_file_name() {
        let stack = BillingStack::new("BillingStack", Environment::agnostic(), 15.0, "a@b.com")
            .synthesize()
            .unwrap();
        assert_eq!(stack.template_file_name(), "BillingStack.template.json");
    }
}
