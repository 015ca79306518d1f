//! Deployable units for pipestack.
//!
//! Each unit is a plain configuration struct implementing
//! [`StackDefinition`]; synthesis builds its template from scratch every
//! time. Units:
//! - [`BillingStack`] - a monthly cost budget with an email alert
//! - [`ServiceStack`] - a Lambda function behind inner and outer HTTP APIs
//! - [`PipelineStack`] - the delivery pipeline deploying everything else
//!
//! [`App`] wires them together from an application config.

pub mod app;
pub mod billing;
pub mod budget;
pub mod events;
pub mod iam;
pub mod pipeline;
pub mod service;

pub use app::{App, CloudAssembly};
pub use billing::BillingStack;
pub use pipeline::{PipelineSettings, PipelineStack, SourceSettings};
pub use pipestack_core::StackDefinition;
pub use service::{ServiceCode, ServiceStack};
