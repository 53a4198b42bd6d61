//! Pipeline generators
//!
//! Each phase of the root pipeline has its own generator returning a
//! [`Workflow`](crate::core::Workflow); the [`composer`] merges them. The
//! [`splitter`] runs later, inside the pipeline, on spack's output.

pub mod cache;
pub mod composer;
pub mod containers;
pub mod definitions;
pub mod packages;
pub mod spack;
pub mod spackah;
pub mod splitter;

pub use composer::{create_jobs, ComposeOptions};
pub use spackah::generate_spackah_workflow;
pub use splitter::{PipelineSplitter, SplitOutcome, SplitPipeline, StageGroup};

use crate::core::{ArchitectureConfig, ArchitectureRegistry, CiEnvironment, Image};
use crate::error::Result;

/// What every generator reads: the architecture registry, the CI run and
/// the tag of the base images built in this run
#[derive(Debug, Clone)]
pub struct Context<'a> {
    pub registry: &'a ArchitectureRegistry,
    pub environment: &'a CiEnvironment,
    pub image_tag: String,
}

impl<'a> Context<'a> {
    pub fn new(registry: &'a ArchitectureRegistry, environment: &'a CiEnvironment) -> Self {
        Self {
            registry,
            environment,
            image_tag: environment.image_tag(),
        }
    }

    /// Use a fixed base image tag instead of the date-based one
    pub fn with_image_tag(mut self, image_tag: impl Into<String>) -> Self {
        self.image_tag = image_tag.into();
        self
    }

    pub fn architecture(&self, architecture: &str) -> Result<&'a ArchitectureConfig> {
        self.registry.lookup(architecture)
    }

    /// Registry image of a base container
    pub fn registry_image(&self, build_path: &str) -> String {
        self.environment.registry_image_for(build_path)
    }

    /// Base image built in this run, always pulled
    pub fn base_image(&self, build_path: &str) -> Image {
        Image::always_pulled(format!("{}:{}", self.registry_image(build_path), self.image_tag))
    }

    /// The builder image spack jobs run in
    pub fn builder_image(&self) -> Image {
        self.base_image("builder")
    }
}
