//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{CreateJobsCommand, GenerateSpackahCommand, ProcessPipelineCommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// Generates the GitLab CI pipelines that build spack-based containers
#[derive(Debug, Parser, Clone)]
#[command(name = "jc")]
#[command(version)]
#[command(about = "Generates the GitLab CI pipelines that build spack-based containers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// YAML file describing the architectures, instead of the built-in ones
    #[arg(long, global = true, env = "JC_ARCHITECTURES")]
    pub architectures: Option<PathBuf>,

    /// Don't write job_creator.log
    #[arg(long, global = true)]
    pub no_log_file: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Generate the root pipeline
    CreateJobs(CreateJobsCommand),

    /// Split a spack-generated pipeline into per-stage child pipelines
    ProcessSpackPipeline(ProcessPipelineCommand),

    /// Generate the pipeline building the containers of an architecture
    GenerateSpackahWorkflow(GenerateSpackahCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_jobs_defaults() {
        let cli = Cli::try_parse_from(["jc", "create-jobs"]).unwrap();
        let Command::CreateJobs(cmd) = cli.command else {
            panic!("expected create-jobs");
        };
        assert_eq!(cmd.singularity_version, "4.0.2");
        assert_eq!(cmd.s3cmd_version, "2.3.0");
        assert_eq!(cmd.output_file, PathBuf::from("generated_pipeline.yaml"));
        assert!(cmd.architecture.is_empty());
        assert!(!cmd.skip_base_containers);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_repeated_architecture() {
        let cli = Cli::try_parse_from([
            "jc",
            "create-jobs",
            "--architecture",
            "amd64",
            "--architecture",
            "arm64",
            "--verbose",
        ])
        .unwrap();
        let Command::CreateJobs(cmd) = cli.command else {
            panic!("expected create-jobs");
        };
        assert_eq!(cmd.architecture, vec!["amd64", "arm64"]);
        assert!(cli.verbose);
    }

    #[test]
    fn test_process_spack_pipeline() {
        let cli = Cli::try_parse_from([
            "jc",
            "--no-log-file",
            "process-spack-pipeline",
            "--pipeline-file",
            "jobs_scratch_dir.amd64/pipeline.yml",
            "--out-dir",
            "artifacts.amd64",
        ])
        .unwrap();
        assert!(cli.no_log_file);
        let Command::ProcessSpackPipeline(cmd) = cli.command else {
            panic!("expected process-spack-pipeline");
        };
        assert_eq!(cmd.out_dir, PathBuf::from("artifacts.amd64"));
        assert_eq!(cmd.architecture, None);
        assert_eq!(cmd.root_file, PathBuf::from("spack_pipeline.yaml"));
    }

    #[test]
    fn test_process_spack_pipeline_requires_input() {
        assert!(Cli::try_parse_from(["jc", "process-spack-pipeline", "--out-dir", "x"]).is_err());
    }

    #[test]
    fn test_generate_spackah_workflow() {
        let cli = Cli::try_parse_from([
            "jc",
            "generate-spackah-workflow",
            "--architecture",
            "arm64",
            "--out-dir",
            "artifacts.arm64",
        ])
        .unwrap();
        let Command::GenerateSpackahWorkflow(cmd) = cli.command else {
            panic!("expected generate-spackah-workflow");
        };
        assert_eq!(cmd.architecture, "arm64");
        assert_eq!(cmd.s3cmd_version, "2.3.0");
        assert_eq!(cmd.definitions_dir, PathBuf::from("container_definitions"));
    }
}
