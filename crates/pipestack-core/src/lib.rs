//! Core types for pipestack.
//!
//! This crate contains:
//! - The CloudFormation template model and intrinsic functions
//! - Deterministic logical ids and the explicit construct tree
//! - Stack builder, environments and the `StackDefinition` seam
//! - Pipeline artifacts, stages and actions
//! - Deployment strategies, alarms and secrets

pub mod artifact;
pub mod construct;
pub mod deployer;
pub mod error;
pub mod intrinsic;
pub mod pipeline;
pub mod secret;
pub mod stack;
pub mod template;

pub use error::{Error, Result};
pub use stack::{Environment, StackBuilder, StackDefinition, SynthesizedStack};
pub use template::{Output, Parameter, Resource, Template};
