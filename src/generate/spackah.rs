//! Spackah pipeline: building the spack-based containers
//!
//! Generated inside the root pipeline by `jc generate-spackah-workflow`, once
//! the base images exist. Every container definition of the architecture
//! yields a build job, a SIF conversion job, for amd64 a job copying the SIF
//! file onto the cluster and, on the default branch, a Docker Hub push.

use crate::core::document::{load_yaml, write_yaml};
use crate::core::templates::{
    BB5_DOWNLOAD_SIF, BUILDAH_INCLUDE, BUILD_CUSTOM_CONTAINER, BUILD_SPACKTAINER,
    CONTAINERIZER_INCLUDE, CREATE_SIF, DOCKER_HUB_PUSH,
};
use crate::core::{ArchitectureConfig, Image, Job, Need, Workflow};
use crate::error::{JobCreatorError, Result};
use crate::generate::containers::generate_spackah_job_name;
use crate::generate::definitions::{
    read_custom_definitions, read_definitions, ContainerDefinition, CustomDefinition,
};
use crate::generate::spack::container_environment;
use crate::generate::Context;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File the spackah pipeline is written to, inside the output directory
pub const SPACKAH_PIPELINE_FILE: &str = "spackah_pipeline.yaml";

/// Job emitted when there is nothing to build
pub const NOTHING_TO_BUILD_JOB: &str = "No containers to rebuild";

/// Where the SIF files end up on the cluster
pub const BB5_SIF_ROOT: &str = "/gpfs/bbp.cscs.ch/ssd/containers/hpc/spacktainerizah";

/// Architecture whose containers are copied to the cluster
pub const BB5_ARCHITECTURE: &str = "amd64";

/// Docker Hub organisation the containers are published under
pub const HUB_NAMESPACE: &str = "bluebrain";

const SPACKTAINER_BUILD_PATH: &str = "spacktainer";

/// Inputs of the spackah pipeline generation
#[derive(Debug, Clone)]
pub struct SpackahOptions<'p> {
    pub architecture: &'p str,
    pub out_dir: &'p Path,
    pub definitions_root: &'p Path,
    pub spack_template: &'p Path,
    pub s3cmd_version: &'p str,
}

/// The spackah pipeline and the spack environments its jobs build
#[derive(Debug, Clone, PartialEq)]
pub struct SpackahPipeline {
    pub workflow: Workflow,
    pub environments: Vec<(PathBuf, Value)>,
}

impl SpackahPipeline {
    /// Write the environments, then the pipeline; returns the pipeline path
    pub fn write(&self, out_dir: &Path) -> Result<PathBuf> {
        let pipeline = self.workflow.to_yaml()?;
        for (path, environment) in &self.environments {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(JobCreatorError::io_at(parent))?;
            }
            write_yaml(environment, path)?;
        }

        std::fs::create_dir_all(out_dir).map_err(JobCreatorError::io_at(out_dir))?;
        let path = out_dir.join(SPACKAH_PIPELINE_FILE);
        std::fs::write(&path, pipeline).map_err(JobCreatorError::io_at(&path))?;
        Ok(path)
    }
}

fn s3_container_path(config: &ArchitectureConfig, filename: &str) -> String {
    format!(
        "s3://{}/containers/spacktainerizah/{}",
        config.containers_bucket().name,
        filename
    )
}

fn singularitah_image(context: &Context<'_>) -> Image {
    Image::Name(format!("{}:{}", context.registry_image("singularitah"), context.image_tag))
}

/// Registry tag of a spack-based container: the version of its main
/// package, plus the branch outside of production
fn container_tag(context: &Context<'_>, definition: &ContainerDefinition) -> Result<String> {
    let version = definition
        .main_version()?
        .unwrap_or_else(|| "latest".to_string());
    if context.environment.is_production() {
        Ok(version)
    } else {
        Ok(format!(
            "{}__{}",
            version,
            context.environment.commit_ref_slug.as_deref().unwrap_or_default()
        ))
    }
}

/// Jobs building one spack-based container
fn container_jobs(
    context: &Context<'_>,
    options: &SpackahOptions<'_>,
    definition: &ContainerDefinition,
) -> Result<Vec<Job>> {
    let architecture = options.architecture;
    let config = context.architecture(architecture)?;
    let tag = container_tag(context, definition)?;
    let registry_image = context.registry_image(&definition.name);
    let spack_env_dir = options.out_dir.join(architecture).join(&definition.name);
    let filename = format!("{}__{}.sif", definition.name, tag);

    let mut build = Job::from_template(format!("build {} container", definition.name), &BUILD_SPACKTAINER)
        .with_architecture(architecture, config);
    build.needs.push(Need::from_pipeline(
        context.environment.pipeline_id.clone(),
        generate_spackah_job_name(architecture),
    ));
    build.variables
        .insert("CI_REGISTRY_IMAGE".to_string(), registry_image.clone());
    build.variables
        .insert("REGISTRY_IMAGE_TAG".to_string(), tag.clone());
    build.variables.insert(
        "SPACK_ENV_DIR".to_string(),
        spack_env_dir.to_string_lossy().into_owned(),
    );
    build.variables
        .insert("ARCH".to_string(), architecture.to_string());
    build.variables
        .insert("BUILD_PATH".to_string(), SPACKTAINER_BUILD_PATH.to_string());
    let labels = [
        format!("--label org.opencontainers.image.title={}", definition.name),
        format!("--label org.opencontainers.image.version={}", tag),
        format!("--label ch.epfl.bbpgitlab.container_checksum={}", definition.checksum),
    ];
    let args = build
        .variables
        .entry("BUILDAH_EXTRA_ARGS".to_string())
        .or_default();
    args.push(' ');
    args.push_str(&labels.join(" "));

    let dockerfile = format!("{}/Dockerfile", SPACKTAINER_BUILD_PATH);
    let mut dockerfile_lines = vec![
        format!("FROM {}:{} AS builder", context.registry_image("builder"), context.image_tag),
        format!("FROM {}:{}", context.registry_image("runtime"), context.image_tag),
        "# Triggers building the 'builder' image, otherwise it is optimized away".to_string(),
        "COPY --from=builder /etc/debian_version /etc/debian_version".to_string(),
    ];
    for (source, target) in definition.files() {
        dockerfile_lines.push(format!("COPY {} {}", source, target));
    }
    let echo_lines: Vec<String> = dockerfile_lines
        .iter()
        .map(|line| format!("echo '{}' >> {}", line, dockerfile))
        .collect();
    build.update_before_script(&echo_lines, true);

    let mut artifacts = Mapping::new();
    artifacts.insert(Value::from("when"), Value::from("always"));
    artifacts.insert(Value::from("paths"), Value::Sequence(vec![Value::from(dockerfile)]));
    build.artifacts = Some(Value::Mapping(artifacts));

    let bucket = config.containers_bucket();
    let mut sif = Job::from_template(format!("create {} sif file", definition.name), &CREATE_SIF)
        .with_architecture(architecture, config);
    sif.add_need(build.name.clone());
    for (key, value) in [
        ("CI_REGISTRY_IMAGE", registry_image),
        ("REGISTRY_IMAGE_TAG", tag.clone()),
        ("FS_CONTAINER_PATH", format!("/tmp/{}", filename)),
        ("CONTAINER_NAME", definition.name.clone()),
        ("CONTAINER_CHECKSUM", definition.checksum.clone()),
        ("BUCKET", bucket.name.clone()),
        ("S3_CONTAINER_PATH", s3_container_path(config, &filename)),
    ] {
        sif.variables.insert(key.to_string(), value);
    }
    sif.image = Some(singularitah_image(context));
    sif.configure_s3cmd(bucket);

    let push = if context.environment.on_default_branch() {
        Some(docker_hub_push_job(&definition.name, &tag, &build))
    } else {
        debug!("Not on the default branch, not pushing {} to Docker Hub", definition.name);
        None
    };

    let mut jobs = vec![build];

    if architecture == BB5_ARCHITECTURE {
        info!("We want the {} containers on bb5", architecture);
        let mut download = Job::from_template(
            format!("download {} SIF to bb5", definition.name),
            &BB5_DOWNLOAD_SIF,
        );
        download.add_need(sif.name.clone());
        for (key, value) in [
            ("BUCKET", bucket.name.clone()),
            ("SIF_FILENAME", filename.clone()),
            ("FULL_SIF_PATH", format!("{}/{}", BB5_SIF_ROOT, filename)),
            ("S3_CONTAINER_PATH", s3_container_path(config, &filename)),
            ("CONTAINER_CHECKSUM", definition.checksum.clone()),
            ("S3CMD_VERSION", options.s3cmd_version.to_string()),
        ] {
            download.variables.insert(key.to_string(), value);
        }
        jobs.push(sif);
        jobs.push(download);
    } else {
        jobs.push(sif);
    }
    jobs.extend(push);

    Ok(jobs)
}

fn docker_hub_push_job(name: &str, tag: &str, build: &Job) -> Job {
    let mut job = Job::from_template(format!("push {}:{} to docker hub", name, tag), &DOCKER_HUB_PUSH);
    job.add_need(build.name.clone());
    for (key, value) in [
        ("CONTAINER_NAME", name.to_string()),
        ("REGISTRY_IMAGE_TAG", tag.to_string()),
        ("HUB_REPO_NAMESPACE", HUB_NAMESPACE.to_string()),
        ("HUB_REPO_NAME", format!("spackah-{}", name)),
    ] {
        job.variables.insert(key.to_string(), value);
    }
    job
}

/// Job converting an existing image to SIF
fn custom_container_job(context: &Context<'_>, custom: &CustomDefinition) -> Result<Job> {
    let config = context.architecture(&custom.architecture)?;
    let tag = if context.environment.is_production() {
        format!("{}__{}", custom.source_tag, custom.architecture)
    } else {
        format!(
            "{}__{}__{}",
            custom.source_tag,
            context.environment.commit_ref_slug.as_deref().unwrap_or_default(),
            custom.architecture
        )
    };
    let filename = format!("{}__{}.sif", custom.name, tag);

    let mut job = Job::from_template(format!("build sif file for {}", custom.name), &BUILD_CUSTOM_CONTAINER)
        .with_architecture(&custom.architecture, config);
    job.variables
        .insert("CONTAINER_FILENAME".to_string(), filename.clone());
    job.variables.insert(
        "CONTAINER_DEFINITION".to_string(),
        custom.path.to_string_lossy().into_owned(),
    );
    job.variables.insert(
        "SOURCE_IMAGE".to_string(),
        format!("{}:{}", custom.source_image, custom.source_tag),
    );
    job.variables
        .insert("S3_CONTAINER_PATH".to_string(), s3_container_path(config, &filename));
    job.configure_s3cmd(config.containers_bucket());
    job.image = Some(singularitah_image(context));
    Ok(job)
}

/// Generate the pipeline building every container defined for an architecture
pub fn generate_spackah_workflow(
    context: &Context<'_>,
    options: &SpackahOptions<'_>,
) -> Result<SpackahPipeline> {
    let architecture = options.architecture;
    context.architecture(architecture)?;

    let mut workflow = Workflow::new();
    let mut environments = Vec::new();

    let definitions = read_definitions(options.definitions_root, architecture)?;
    if !definitions.is_empty() {
        let template = load_yaml(options.spack_template)?;
        let mut containers = Workflow::with_includes(vec![
            BUILDAH_INCLUDE.to_include(),
            CONTAINERIZER_INCLUDE.to_include(),
        ]);
        for definition in &definitions {
            info!("Generating workflow for container {} on {}", definition.name, architecture);
            environments.push((
                options
                    .out_dir
                    .join(architecture)
                    .join(&definition.name)
                    .join("spack.yaml"),
                container_environment(&template, definition)?,
            ));
            for job in container_jobs(context, options, definition)? {
                containers.add_job(job)?;
            }
        }
        workflow.extend(containers)?;
    }

    for custom in read_custom_definitions(options.definitions_root, architecture)? {
        info!("Generating workflow for custom container {} on {}", custom.name, architecture);
        workflow.add_job(custom_container_job(context, &custom)?)?;
    }

    debug!("Spackah workflow has {} jobs", workflow.len());
    if workflow.is_empty() {
        let mut job = Job::new(NOTHING_TO_BUILD_JOB);
        job.script = vec!["echo No containers to rebuild".to_string()];
        workflow.add_job(job)?;
    }

    Ok(SpackahPipeline {
        workflow,
        environments,
    })
}
