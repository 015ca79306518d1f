//! Monthly cost budget with an email alert.

use pipestack_core::{Error, Resource, Result, StackBuilder};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::LazyLock;

pub const BUDGET_NAME: &str = "Monthly Budget";
/// Percentage of the limit at which the alert fires.
pub const ALERT_THRESHOLD_PERCENT: u32 = 99;

static EMAIL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+$").expect("valid regex"));

/// Settings of a budget alarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetProps {
    /// Monthly limit in USD.
    pub amount: f64,
    /// Recipient of the alert.
    pub email: String,
}

impl BudgetProps {
    pub fn validate(&self) -> Result<()> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "budget amount must be a positive number, got {}",
                self.amount
            )));
        }
        if !EMAIL_REGEX.is_match(&self.email) {
            return Err(Error::InvalidInput(format!(
                "'{}' is not an email address",
                self.email
            )));
        }
        Ok(())
    }
}

/// Declare the budget under `id`, returning its logical id.
pub fn add_budget(builder: &mut StackBuilder, id: &str, props: &BudgetProps) -> Result<String> {
    props.validate()?;

    let budget = Resource::new("AWS::Budgets::Budget").with_properties(json!({
        "Budget": {
            "BudgetLimit": {
                "Amount": amount_value(props.amount),
                "Unit": "USD"
            },
            "BudgetName": BUDGET_NAME,
            "BudgetType": "COST",
            "TimeUnit": "MONTHLY"
        },
        "NotificationsWithSubscribers": [{
            "Notification": {
                "ComparisonOperator": "GREATER_THAN",
                "NotificationType": "ACTUAL",
                "Threshold": ALERT_THRESHOLD_PERCENT,
                "ThresholdType": "PERCENTAGE"
            },
            "Subscribers": [{
                "Address": props.email,
                "SubscriptionType": "EMAIL"
            }]
        }]
    }));

    builder.add_resource(&[id, "Budget"], budget)
}

/// Whole amounts render as integers (`15`, not `15.0`).
fn amount_value(amount: f64) -> Value {
    if amount.fract() == 0.0 && amount.abs() < i64::MAX as f64 {
        json!(amount as i64)
    } else {
        json!(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipestack_core::Environment;

    fn props(amount: f64, email: &str) -> BudgetProps {
        BudgetProps {
            amount,
            email: email.to_string(),
        }
    }

    #[test]
    fn test_budget_properties() {
        let mut builder = StackBuilder::new("BillingStack", Environment::agnostic()).unwrap();
        let id = add_budget(&mut builder, "Budget", &props(15.0, "maciejru@amazon.com")).unwrap();
        let stack = builder.finish();

        let budget = stack.template.resource(&id).unwrap();
        let spec = budget.property("Budget").unwrap();
        assert_eq!(spec["BudgetLimit"], json!({"Amount": 15, "Unit": "USD"}));
        assert_eq!(spec["BudgetName"], BUDGET_NAME);
        assert_eq!(spec["BudgetType"], "COST");
        assert_eq!(spec["TimeUnit"], "MONTHLY");

        let notification = &budget.property("NotificationsWithSubscribers").unwrap()[0];
        assert_eq!(notification["Notification"]["Threshold"], 99);
        assert_eq!(notification["Notification"]["ThresholdType"], "PERCENTAGE");
        assert_eq!(notification["Notification"]["ComparisonOperator"], "GREATER_THAN");
        assert_eq!(
            notification["Subscribers"],
            json!([{"Address": "maciejru@amazon.com", "SubscriptionType": "EMAIL"}])
        );
    }

    #[test]
    fn test_fractional_amount() {
        assert_eq!(amount_value(2.5), json!(2.5));
        assert_eq!(amount_value(2.0), json!(2));
    }

    #[test]
    fn test_budget_id_is_nested() {
        let mut builder = StackBuilder::new("BillingStack", Environment::agnostic()).unwrap();
        let id = add_budget(&mut builder, "Budget", &props(2.0, "test@example.com")).unwrap();
        assert!(id.starts_with("Budget"));
        assert_eq!(id.len(), "Budget".len() + 8);
    }

    #[test]
    fn test_invalid_props() {
        assert!(props(0.0, "a@b.com").validate().is_err());
        assert!(props(-5.0, "a@b.com").validate().is_err());
        assert!(props(f64::NAN, "a@b.com").validate().is_err());
        assert!(props(10.0, "not-an-email").validate().is_err());
        assert!(props(10.0, "a b@c.com").validate().is_err());
        assert!(props(10.0, "test@example.com").validate().is_ok());
    }
}
