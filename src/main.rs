use anyhow::{bail, Context as _, Result};
use job_creator::cli::commands::{CreateJobsCommand, GenerateSpackahCommand, ProcessPipelineCommand};
use job_creator::cli::output::*;
use job_creator::cli::{Cli, Command};
use job_creator::core::{ArchitectureRegistry, CiEnvironment};
use job_creator::generate::definitions::discover_architectures;
use job_creator::generate::packages::write_build_cache_environments;
use job_creator::generate::spackah::SpackahOptions;
use job_creator::generate::splitter::architecture_from_out_dir;
use job_creator::generate::{create_jobs, generate_spackah_workflow, ComposeOptions, Context, PipelineSplitter};
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn, Level};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

const LOG_FILE: &str = "job_creator.log";

fn main() -> Result<()> {
    let cli = Cli::from_args();
    init_logging(&cli)?;

    let environment = CiEnvironment::from_env();
    let registry = match &cli.architectures {
        Some(path) => ArchitectureRegistry::from_file(path)
            .with_context(|| format!("Failed to load architectures from {}", path.display()))?,
        None => ArchitectureRegistry::builtin(environment.is_production()),
    };
    let context = Context::new(&registry, &environment);

    let result = match &cli.command {
        Command::CreateJobs(cmd) => run_create_jobs(cmd, &context),
        Command::ProcessSpackPipeline(cmd) => run_process_pipeline(cmd, &registry, &environment),
        Command::GenerateSpackahWorkflow(cmd) => run_generate_spackah(cmd, &context),
    };

    if let Err(err) = result {
        eprintln!("{} {}", CROSS, style(format!("{:#}", err)).red());
        std::process::exit(1);
    }
    Ok(())
}

/// Console output at INFO (DEBUG with `--verbose`, overridable with
/// `RUST_LOG`), plus everything at DEBUG in the log file
fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let console_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();
    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let file = if cli.no_log_file {
        None
    } else {
        let file = File::create(LOG_FILE).with_context(|| format!("Failed to create {}", LOG_FILE))?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG),
        )
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to set logging subscriber")?;
    Ok(())
}

fn run_create_jobs(cmd: &CreateJobsCommand, context: &Context<'_>) -> Result<()> {
    let architectures = if cmd.architecture.is_empty() {
        discover_architectures(&cmd.definitions_dir).with_context(|| {
            format!("Failed to list architectures in {}", cmd.definitions_dir.display())
        })?
    } else {
        cmd.architecture.clone()
    };
    if architectures.is_empty() {
        bail!("No architectures to build for");
    }
    println!(
        "{} Creating jobs for {}",
        ROCKET,
        style(architectures.join(", ")).bold()
    );

    let options = ComposeOptions {
        architectures: architectures.clone(),
        singularity_version: cmd.singularity_version.clone(),
        s3cmd_version: cmd.s3cmd_version.clone(),
        skip_base_containers: cmd.skip_base_containers,
    };
    let workflow = create_jobs(context, &options)?;

    if cmd.spack_template.is_file() {
        let out_dir = cmd
            .output_file
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let written = write_build_cache_environments(
            context,
            &architectures,
            &cmd.spack_template,
            &cmd.definitions_dir,
            out_dir,
        )
        .context("Failed to write the merged spack environments")?;
        for path in written {
            info!("Wrote {}", path.display());
        }
    } else {
        warn!(
            "No spack template at {}, not writing merged spack environments",
            cmd.spack_template.display()
        );
    }

    workflow
        .write(&cmd.output_file)
        .with_context(|| format!("Failed to write {}", cmd.output_file.display()))?;

    for line in format_stages(&workflow) {
        println!("{}", line);
    }
    println!("{}", format_workflow_summary(&workflow, &cmd.output_file));
    Ok(())
}

fn run_process_pipeline(
    cmd: &ProcessPipelineCommand,
    registry: &ArchitectureRegistry,
    environment: &CiEnvironment,
) -> Result<()> {
    let architecture = match &cmd.architecture {
        Some(architecture) => architecture.clone(),
        None => architecture_from_out_dir(&cmd.out_dir).with_context(|| {
            format!(
                "No --architecture given and none in the output directory name {}",
                cmd.out_dir.display()
            )
        })?,
    };

    let splitter = PipelineSplitter::new(registry, environment);
    let outcome = splitter
        .process(&cmd.pipeline_file, &cmd.out_dir, &cmd.root_file, &architecture)
        .with_context(|| format!("Failed to process {}", cmd.pipeline_file.display()))?;

    println!("{}", format_split_outcome(&outcome, &cmd.root_file));
    Ok(())
}

fn run_generate_spackah(cmd: &GenerateSpackahCommand, context: &Context<'_>) -> Result<()> {
    let options = SpackahOptions {
        architecture: &cmd.architecture,
        out_dir: &cmd.out_dir,
        definitions_root: &cmd.definitions_dir,
        spack_template: &cmd.spack_template,
        s3cmd_version: &cmd.s3cmd_version,
    };
    let pipeline = generate_spackah_workflow(context, &options)?;
    let path = pipeline
        .write(&cmd.out_dir)
        .with_context(|| format!("Failed to write the spackah pipeline to {}", cmd.out_dir.display()))?;

    for line in format_stages(&pipeline.workflow) {
        println!("{}", line);
    }
    println!("{}", format_workflow_summary(&pipeline.workflow, &path));
    Ok(())
}
