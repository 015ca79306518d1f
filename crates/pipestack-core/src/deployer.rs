//! Traffic-shifting deployment strategies and alarm definitions.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

use crate::{Error, Result};

/// How traffic moves from the old function version to the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentStrategy {
    /// Shift all traffic at once.
    AllAtOnce,
    /// Shift `percent` first, the rest after `interval_minutes`.
    Canary { percent: u8, interval_minutes: u32 },
    /// Shift `percent` more every `interval_minutes`.
    Linear { percent: u8, interval_minutes: u32 },
}

impl DeploymentStrategy {
    pub const CANARY_10PERCENT_5MINUTES: Self = Self::Canary {
        percent: 10,
        interval_minutes: 5,
    };

    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::AllAtOnce => Ok(()),
            Self::Canary {
                percent,
                interval_minutes,
            }
            | Self::Linear {
                percent,
                interval_minutes,
            } => {
                if percent == 0 || percent >= 100 {
                    return Err(Error::InvalidInput(format!(
                        "traffic percentage must be between 1 and 99, got {percent}"
                    )));
                }
                if interval_minutes == 0 {
                    return Err(Error::InvalidInput(
                        "traffic shifting interval must be at least one minute".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Name of the matching CodeDeploy predefined config, if one exists.
    pub fn predefined_name(&self) -> Option<&'static str> {
        match *self {
            Self::AllAtOnce => Some("CodeDeployDefault.LambdaAllAtOnce"),
            Self::Canary {
                percent: 10,
                interval_minutes,
            } => match interval_minutes {
                5 => Some("CodeDeployDefault.LambdaCanary10Percent5Minutes"),
                10 => Some("CodeDeployDefault.LambdaCanary10Percent10Minutes"),
                15 => Some("CodeDeployDefault.LambdaCanary10Percent15Minutes"),
                30 => Some("CodeDeployDefault.LambdaCanary10Percent30Minutes"),
                _ => None,
            },
            Self::Linear {
                percent: 10,
                interval_minutes,
            } => match interval_minutes {
                1 => Some("CodeDeployDefault.LambdaLinear10PercentEvery1Minute"),
                2 => Some("CodeDeployDefault.LambdaLinear10PercentEvery2Minutes"),
                3 => Some("CodeDeployDefault.LambdaLinear10PercentEvery3Minutes"),
                10 => Some("CodeDeployDefault.LambdaLinear10PercentEvery10Minutes"),
                _ => None,
            },
            _ => None,
        }
    }

    /// `TrafficRoutingConfig` for a custom `AWS::CodeDeploy::DeploymentConfig`.
    pub fn traffic_routing_config(&self) -> Value {
        match *self {
            Self::AllAtOnce => json!({ "Type": "AllAtOnce" }),
            Self::Canary {
                percent,
                interval_minutes,
            } => json!({
                "Type": "TimeBasedCanary",
                "TimeBasedCanary": {
                    "CanaryPercentage": percent,
                    "CanaryInterval": interval_minutes
                }
            }),
            Self::Linear {
                percent,
                interval_minutes,
            } => json!({
                "Type": "TimeBasedLinear",
                "TimeBasedLinear": {
                    "LinearPercentage": percent,
                    "LinearInterval": interval_minutes
                }
            }),
        }
    }

    /// The sequence of traffic shifts this strategy performs.
    pub fn steps(&self) -> Vec<CanaryStep> {
        match *self {
            Self::AllAtOnce => vec![CanaryStep {
                traffic_percent: 100,
                duration: None,
            }],
            Self::Canary {
                percent,
                interval_minutes,
            } => vec![
                CanaryStep {
                    traffic_percent: percent,
                    duration: Some(Duration::from_secs(u64::from(interval_minutes) * 60)),
                },
                CanaryStep {
                    traffic_percent: 100,
                    duration: None,
                },
            ],
            Self::Linear {
                percent,
                interval_minutes,
            } => {
                let mut steps = Vec::new();
                let mut traffic = 0u8;
                while traffic < 100 {
                    traffic = traffic.saturating_add(percent).min(100);
                    steps.push(CanaryStep {
                        traffic_percent: traffic,
                        duration: (traffic < 100)
                            .then(|| Duration::from_secs(u64::from(interval_minutes) * 60)),
                    });
                    if percent == 0 {
                        break;
                    }
                }
                steps
            }
        }
    }
}

impl std::fmt::Display for DeploymentStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllAtOnce => write!(f, "all-at-once"),
            Self::Canary {
                percent,
                interval_minutes,
            } => write!(f, "canary {percent}% then 100% after {interval_minutes}m"),
            Self::Linear {
                percent,
                interval_minutes,
            } => write!(f, "linear {percent}% every {interval_minutes}m"),
        }
    }
}

/// A step in a traffic-shifting deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanaryStep {
    /// Share of traffic on the new version after this step.
    pub traffic_percent: u8,
    /// Observation window before the next step.
    pub duration: Option<Duration>,
}

/// Which deployment outcomes roll the alias back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoRollback {
    pub failed_deployment: bool,
    pub stopped_deployment: bool,
    pub deployment_in_alarm: bool,
}

impl Default for AutoRollback {
    fn default() -> Self {
        Self {
            failed_deployment: true,
            stopped_deployment: false,
            deployment_in_alarm: true,
        }
    }
}

impl AutoRollback {
    /// CodeDeploy rollback event names.
    pub fn events(&self) -> Vec<&'static str> {
        let mut events = Vec::new();
        if self.failed_deployment {
            events.push("DEPLOYMENT_FAILURE");
        }
        if self.stopped_deployment {
            events.push("DEPLOYMENT_STOP_ON_REQUEST");
        }
        if self.deployment_in_alarm {
            events.push("DEPLOYMENT_STOP_ON_ALARM");
        }
        events
    }

    pub fn to_config(&self) -> Value {
        let events = self.events();
        json!({
            "Enabled": !events.is_empty(),
            "Events": events
        })
    }
}

/// How an alarm treats periods without data points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TreatMissingData {
    Breaching,
    NotBreaching,
    Ignore,
    Missing,
}

impl TreatMissingData {
    pub fn as_str(&self) -> &'static str {
        match self {
            TreatMissingData::Breaching => "breaching",
            TreatMissingData::NotBreaching => "notBreaching",
            TreatMissingData::Ignore => "ignore",
            TreatMissingData::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    GreaterThanOrEqualToThreshold,
    GreaterThanThreshold,
    LessThanThreshold,
    LessThanOrEqualToThreshold,
}

impl ComparisonOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOperator::GreaterThanOrEqualToThreshold => "GreaterThanOrEqualToThreshold",
            ComparisonOperator::GreaterThanThreshold => "GreaterThanThreshold",
            ComparisonOperator::LessThanThreshold => "LessThanThreshold",
            ComparisonOperator::LessThanOrEqualToThreshold => "LessThanOrEqualToThreshold",
        }
    }
}

/// Evaluation settings of a metric alarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmSpec {
    pub period: Duration,
    pub threshold: f64,
    pub evaluation_periods: u32,
    pub comparison_operator: ComparisonOperator,
    pub treat_missing_data: TreatMissingData,
    pub statistic: String,
}

impl AlarmSpec {
    /// One or more errors within a single one-minute window.
    pub fn server_errors_per_minute() -> Self {
        Self {
            period: Duration::from_secs(60),
            threshold: 1.0,
            evaluation_periods: 1,
            comparison_operator: ComparisonOperator::GreaterThanOrEqualToThreshold,
            treat_missing_data: TreatMissingData::NotBreaching,
            statistic: "Sum".to_string(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let secs = self.period.as_secs();
        if secs == 0 || (secs >= 60 && secs % 60 != 0) || (secs < 60 && ![10, 30].contains(&secs))
        {
            return Err(Error::InvalidInput(format!(
                "alarm period must be 10s, 30s or a multiple of 60s, got {secs}s"
            )));
        }
        if self.evaluation_periods == 0 {
            return Err(Error::InvalidInput(
                "alarm needs at least one evaluation period".to_string(),
            ));
        }
        if !self.threshold.is_finite() {
            return Err(Error::InvalidInput("alarm threshold must be finite".to_string()));
        }
        Ok(())
    }
}
