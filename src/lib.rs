//! job-creator - generates the GitLab CI pipelines that build spack-based containers

pub mod cli;
pub mod core;
pub mod error;
pub mod generate;

// Re-export commonly used types
pub use core::{ArchitectureConfig, ArchitectureRegistry, CiEnvironment, Job, Need, Trigger, Workflow};
pub use error::{JobCreatorError, Result};
pub use generate::{create_jobs, ComposeOptions, Context, PipelineSplitter, SplitOutcome, SplitPipeline};
