//! Root pipeline composition
//!
//! The phase generators are merged in a fixed order, then jobs that run
//! inside the builder image are made to wait for it.

use crate::core::Workflow;
use crate::error::Result;
use crate::generate::cache::clean_cache_workflow;
use crate::generate::containers::{
    base_containers_workflow, build_job_base_name, multiarch_job_name, spackah_generation_workflow,
    GENERATE_SPACKAH_JOB,
};
use crate::generate::packages::packages_workflow;
use crate::generate::splitter::POPULATION_JOB;
use crate::generate::Context;
use tracing::{debug, info};

/// Container every fan-in job depends on
pub const BUILDER: &str = "builder";

/// Job name prefixes of the jobs running in the builder image
pub const FAN_IN_PREFIXES: &[&str] = &[POPULATION_JOB, GENERATE_SPACKAH_JOB];

/// Settings of the root pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeOptions {
    pub architectures: Vec<String>,
    pub singularity_version: String,
    pub s3cmd_version: String,
    /// Leave out the base container jobs, e.g. when the images are up to date
    pub skip_base_containers: bool,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            architectures: Vec::new(),
            singularity_version: "4.0.2".to_string(),
            s3cmd_version: "2.3.0".to_string(),
            skip_base_containers: false,
        }
    }
}

/// Names of the jobs a job of `architecture` must wait for to use `container`:
/// the multiarch job if there is one, otherwise the build job of the same
/// architecture. Empty when the container is not built in this pipeline.
pub fn arch_or_multiarch_jobs(workflow: &Workflow, container: &str, architecture: Option<&str>) -> Vec<String> {
    let multiarch: Vec<String> = workflow
        .get_jobs_with_prefix(&multiarch_job_name(container))
        .into_iter()
        .map(|job| job.name.clone())
        .collect();
    if !multiarch.is_empty() {
        debug!("Multi-arch jobs found: {:?}", multiarch);
        return multiarch;
    }

    let prefix = format!("{} ", build_job_base_name(container));
    workflow
        .get_jobs_with_prefix(&prefix)
        .into_iter()
        .filter(|job| architecture.is_none() || job.architecture.as_deref() == architecture)
        .map(|job| job.name.clone())
        .collect()
}

/// Add bare-name needs on the builder image to every fan-in job
pub fn add_builder_needs(workflow: &mut Workflow) {
    let targets: Vec<(String, Vec<String>)> = workflow
        .jobs()
        .filter(|job| FAN_IN_PREFIXES.iter().any(|prefix| job.name.contains(prefix)))
        .map(|job| {
            let needs = arch_or_multiarch_jobs(workflow, BUILDER, job.architecture.as_deref());
            (job.name.clone(), needs)
        })
        .collect();

    for (name, needs) in targets {
        if let Some(job) = workflow.job_mut(&name) {
            debug!("Adding needs for {}", name);
            for need in needs {
                job.add_need(need);
            }
        }
    }
}

/// Build the root pipeline
pub fn create_jobs(context: &Context<'_>, options: &ComposeOptions) -> Result<Workflow> {
    info!("Creating jobs for {:?}", options.architectures);
    for architecture in &options.architectures {
        context.architecture(architecture)?;
    }
    let architectures = &options.architectures;

    let mut workflow = if options.skip_base_containers {
        info!("Skipping base containers");
        Workflow::new()
    } else {
        base_containers_workflow(
            context,
            architectures,
            &options.singularity_version,
            &options.s3cmd_version,
        )?
    };
    workflow = (workflow + packages_workflow(context, architectures)?)?;
    workflow = (workflow + clean_cache_workflow(context, architectures)?)?;
    workflow = (workflow + spackah_generation_workflow(context, architectures, &options.s3cmd_version)?)?;

    add_builder_needs(&mut workflow);
    workflow.validate()?;
    Ok(workflow)
}
