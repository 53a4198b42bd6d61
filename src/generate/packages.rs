//! Build cache population phase
//!
//! Per architecture, one job runs `spack ci generate` on the merged spack
//! environment and one job splits its output (see [`splitter`](super::splitter)).

use crate::core::document::{load_yaml, write_yaml};
use crate::core::templates::{PACKAGES, PROCESS_SPACK_PIPELINE};
use crate::core::{Job, Need, Workflow};
use crate::error::Result;
use crate::generate::definitions::read_definitions;
use crate::generate::spack::build_cache_environment;
use crate::generate::splitter::{population_job_name, POPULATION_JOB, PROCESS_JOB};
use crate::generate::Context;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Job of the parent pipeline that produced the merged spack environments
pub const GENERATE_BASE_PIPELINE_JOB: &str = "generate base pipeline";

/// Name of the merged spack environment of an architecture
pub fn merged_spack_file(architecture: &str) -> String {
    format!("merged_spack_{}.yaml", architecture)
}

/// Directory `spack ci generate` writes its pipeline to
pub fn scratch_dir(architecture: &str) -> String {
    format!("jobs_scratch_dir.{}", architecture)
}

/// Directory the split pipelines of an architecture are written to
pub fn artifacts_dir(architecture: &str) -> String {
    format!("artifacts.{}", architecture)
}

pub fn packages_workflow(context: &Context<'_>, architectures: &[String]) -> Result<Workflow> {
    info!("Generating packages jobs");
    let mut workflow = Workflow::new();

    for architecture in architectures {
        info!("Generating {}", population_job_name(architecture));
        let config = context.architecture(architecture)?;
        let mut job = Job::from_template(POPULATION_JOB, &PACKAGES)
            .with_architecture(architecture, config);

        debug!("Adding build cache-related variables");
        job.variables.insert(
            "SPACK_BUILD_CACHE_BUCKET".to_string(),
            config.cache_bucket.name.clone(),
        );
        job.variables.insert(
            "ENV_DIR".to_string(),
            format!("${{CI_PROJECT_DIR}}/{}", scratch_dir(architecture)),
        );
        job.variables
            .extend(config.variables.iter().map(|(k, v)| (k.clone(), v.clone())));

        job.image = Some(context.builder_image());
        job.needs.push(Need::from_pipeline(
            context.environment.pipeline_id.clone(),
            GENERATE_BASE_PIPELINE_JOB,
        ));
        job.add_spack_mirror(config);
        job.update_before_script(
            &[format!("mv {} spack.yaml", merged_spack_file(architecture))],
            true,
        );

        workflow.add_job(job)?;
    }

    debug!("Generating jobs to process spack-generated pipelines");
    workflow.extend(process_spack_workflow(context, architectures)?)?;

    Ok(workflow)
}

/// Write the merged spack environment of every architecture to `out_dir`.
///
/// The population jobs pick these files up from the artifacts of the job
/// that generated the root pipeline.
pub fn write_build_cache_environments(
    context: &Context<'_>,
    architectures: &[String],
    template: &Path,
    definitions_root: &Path,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let template = load_yaml(template)?;
    let mut documents = Vec::with_capacity(architectures.len());
    for architecture in architectures {
        let config = context.architecture(architecture)?;
        let definitions = read_definitions(definitions_root, architecture)?;
        debug!("Merging {} container definitions for {}", definitions.len(), architecture);
        let environment =
            build_cache_environment(&template, &definitions, config, &context.builder_image())?;
        documents.push((out_dir.join(merged_spack_file(architecture)), environment));
    }

    let mut written = Vec::with_capacity(documents.len());
    for (path, environment) in documents {
        write_yaml(&environment, &path)?;
        written.push(path);
    }
    Ok(written)
}

/// Jobs splitting the spack-generated pipeline of each architecture
pub fn process_spack_workflow(context: &Context<'_>, architectures: &[String]) -> Result<Workflow> {
    let mut workflow = Workflow::new();
    for architecture in architectures {
        let config = context.architecture(architecture)?;
        let mut job = Job::from_template(PROCESS_JOB, &PROCESS_SPACK_PIPELINE)
            .with_architecture(architecture, config);

        job.needs.push(Need::with_artifacts(population_job_name(architecture)));
        job.needs.push(Need::from_pipeline(
            context.environment.pipeline_id.clone(),
            GENERATE_BASE_PIPELINE_JOB,
        ));
        job.variables.insert(
            "SPACK_GENERATED_PIPELINE".to_string(),
            format!("{}/pipeline.yml", scratch_dir(architecture)),
        );
        job.variables.insert(
            "SPACK_PIPELINES_ARCH_DIR".to_string(),
            scratch_dir(architecture),
        );
        job.variables
            .insert("OUTPUT_DIR".to_string(), artifacts_dir(architecture));
        job.variables
            .insert("ARCHITECTURE".to_string(), architecture.to_string());

        workflow.add_job(job)?;
    }
    Ok(workflow)
}
