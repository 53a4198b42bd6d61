//! CLI command definitions

use crate::generate::definitions::DEFINITIONS_DIR;
use crate::generate::splitter::ROOT_PIPELINE_FILE;
use clap::Args;
use std::path::PathBuf;

/// Generate the root pipeline
#[derive(Debug, Args, Clone)]
pub struct CreateJobsCommand {
    /// Singularity version built into the singularitah image
    #[arg(long, default_value = "4.0.2")]
    pub singularity_version: String,

    /// s3cmd version built into the singularitah image
    #[arg(long, default_value = "2.3.0")]
    pub s3cmd_version: String,

    /// Where to write the pipeline
    #[arg(short, long, default_value = "generated_pipeline.yaml")]
    pub output_file: PathBuf,

    /// Architecture to build for; defaults to every directory in the
    /// definitions directory
    #[arg(short, long)]
    pub architecture: Vec<String>,

    /// Leave out the base container jobs
    #[arg(long)]
    pub skip_base_containers: bool,

    /// Directory holding the container definitions, one sub-directory per architecture
    #[arg(long, default_value = DEFINITIONS_DIR)]
    pub definitions_dir: PathBuf,

    /// Spack environment template
    #[arg(long, default_value = "spack.yaml")]
    pub spack_template: PathBuf,
}

/// Split a spack-generated pipeline
#[derive(Debug, Args, Clone)]
pub struct ProcessPipelineCommand {
    /// Pipeline written by `spack ci generate`
    #[arg(short, long)]
    pub pipeline_file: PathBuf,

    /// Directory the stage pipelines are written to
    #[arg(short, long)]
    pub out_dir: PathBuf,

    /// Architecture of the pipeline; taken from the output directory's
    /// extension (`artifacts.amd64`) when missing
    #[arg(short, long)]
    pub architecture: Option<String>,

    /// Where to write the pipeline triggering the stage pipelines
    #[arg(long, default_value = ROOT_PIPELINE_FILE)]
    pub root_file: PathBuf,
}

/// Generate the containers pipeline of an architecture
#[derive(Debug, Args, Clone)]
pub struct GenerateSpackahCommand {
    #[arg(short, long)]
    pub architecture: String,

    /// Directory the pipeline and spack environments are written to
    #[arg(short, long)]
    pub out_dir: PathBuf,

    /// s3cmd version of the singularitah image
    #[arg(long, default_value = "2.3.0")]
    pub s3cmd_version: String,

    /// Directory holding the container definitions, one sub-directory per architecture
    #[arg(long, default_value = DEFINITIONS_DIR)]
    pub definitions_dir: PathBuf,

    /// Spack environment template
    #[arg(long, default_value = "spack.yaml")]
    pub spack_template: PathBuf,
}
