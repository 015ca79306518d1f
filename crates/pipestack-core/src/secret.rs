//! Secret references.
//!
//! Secrets never appear in templates in clear text; they are rendered as
//! CloudFormation dynamic references resolved by the deployment engine.

use serde::{Deserialize, Serialize};

/// A secret value referenced by a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretValue {
    /// A Secrets Manager secret, optionally a single JSON field of it.
    SecretsManager {
        secret_id: String,
        json_field: Option<String>,
    },
    /// A literal value. Only meant for tests and local experiments.
    Plaintext(String),
}

impl SecretValue {
    pub fn secrets_manager(secret_id: impl Into<String>) -> Self {
        SecretValue::SecretsManager {
            secret_id: secret_id.into(),
            json_field: None,
        }
    }

    /// Render the value as it appears in a template.
    pub fn to_template_value(&self) -> String {
        match self {
            SecretValue::SecretsManager {
                secret_id,
                json_field,
            } => format!(
                "{{{{resolve:secretsmanager:{secret_id}:SecretString:{}::}}}}",
                json_field.as_deref().unwrap_or("")
            ),
            SecretValue::Plaintext(s) => s.clone(),
        }
    }

    /// Secrets Manager id, if this is a managed secret.
    pub fn secret_id(&self) -> Option<&str> {
        match self {
            SecretValue::SecretsManager { secret_id, .. } => Some(secret_id),
            SecretValue::Plaintext(_) => None,
        }
    }
}
