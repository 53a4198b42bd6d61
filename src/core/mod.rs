//! Core domain models
//!
//! This module defines the pipeline documents (jobs, triggers, workflows)
//! and the static registries the generators consult.

pub mod architecture;
pub mod document;
pub mod environment;
pub mod job;
pub mod natural;
pub mod templates;
pub mod trigger;
pub mod variables;
pub mod workflow;

pub use architecture::{ArchitectureConfig, ArchitectureRegistry, BucketConfig};
pub use environment::CiEnvironment;
pub use job::{Image, Job, Need, NeedReference};
pub use trigger::{Include, Trigger, TriggerSpec};
pub use variables::Variables;
pub use workflow::{Workflow, WorkflowEntry};
