//! KDL configuration parsing for pipestack.
//!
//! This crate handles parsing of:
//! - Application definitions (pipestack.kdl)
//! - Variable interpolation

pub mod app;
pub mod error;
pub mod variables;

pub use app::{
    AppConfig, BillingConfig, BuildSpecConfig, PipelineConfig, ServiceConfig, SourceConfig,
    SourceRole, parse_app_config,
};
pub use error::{ConfigError, ConfigResult};
pub use variables::{AppContext, VariableContext, VariableContextBuilder};
