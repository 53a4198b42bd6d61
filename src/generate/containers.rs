//! Base container phase
//!
//! `singularitah` (singularity + s3cmd), `builder` (spack, used to build
//! packages) and `runtime` (spack, base of the final images) are built with
//! buildah for every architecture. When more than one architecture is built,
//! a multiarch manifest combines them.

use crate::core::templates::{BUILDAH_BUILD, BUILDAH_INCLUDE, GENERATE_CONTAINERS_WORKFLOW, MULTIARCH};
use crate::core::{Job, Need, Workflow};
use crate::error::Result;
use crate::generate::packages::{artifacts_dir, GENERATE_BASE_PIPELINE_JOB};
use crate::generate::Context;
use tracing::{debug, info};

/// Job generating the spackah pipeline of an architecture
pub const GENERATE_SPACKAH_JOB: &str = "generate spackah jobs";

pub fn generate_spackah_job_name(architecture: &str) -> String {
    format!("{} for {}", GENERATE_SPACKAH_JOB, architecture)
}

/// Name of the multiarch job of a container
pub fn multiarch_job_name(container: &str) -> String {
    format!("create multiarch for {}", container)
}

/// Name of the build job of a container, without architecture
pub fn build_job_base_name(container: &str) -> String {
    format!("build {}", container)
}

/// A container built from a directory of the repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseContainer {
    pub name: String,
    pub build_path: String,
    /// Appended to `BUILDAH_EXTRA_ARGS`
    pub extra_args: Vec<String>,
    /// Whether the image gets spack's build cache as build argument
    pub spack_based: bool,
}

impl BaseContainer {
    /// Singularity and s3cmd, used to convert and upload images
    pub fn singularitah(singularity_version: &str, s3cmd_version: &str) -> Self {
        Self {
            name: "singularitah".to_string(),
            build_path: "singularitah".to_string(),
            extra_args: vec![
                format!("--label ch.epfl.bbpgitlab.singularity_version=\"{}\"", singularity_version),
                format!("--label ch.epfl.bbpgitlab.s3cmd_version=\"{}\"", s3cmd_version),
                format!("--build-arg SINGULARITY_VERSION=\"{}\"", singularity_version),
                format!("--build-arg S3CMD_VERSION=\"{}\"", s3cmd_version),
            ],
            spack_based: false,
        }
    }

    /// An image carrying our spack fork
    pub fn spacktainerizer(name: &str, spack_branch: &str) -> Self {
        Self {
            name: name.to_string(),
            build_path: name.to_string(),
            extra_args: vec![format!("--build-arg SPACK_BRANCH={}", spack_branch)],
            spack_based: true,
        }
    }

    /// Build jobs for every architecture, plus the multiarch job if needed
    pub fn generate(&self, context: &Context<'_>, architectures: &[String]) -> Result<Workflow> {
        info!("Generating build jobs for {}", self.name);
        let mut workflow = Workflow::with_includes(vec![BUILDAH_INCLUDE.to_include()]);
        let registry_image = context.registry_image(&self.build_path);

        let mut labels = vec![
            format!("--label org.opencontainers.image.title=\"{}\"", self.name),
            format!("--label org.opencontainers.image.version=\"{}\"", context.image_tag),
        ];
        labels.extend(self.extra_args.iter().cloned());

        for architecture in architectures {
            let config = context.architecture(architecture)?;
            let mut job = Job::from_template(build_job_base_name(&self.name), &BUILDAH_BUILD)
                .with_architecture(architecture, config);

            job.variables
                .insert("CI_REGISTRY_IMAGE".to_string(), registry_image.clone());
            job.variables
                .insert("REGISTRY_IMAGE_TAG".to_string(), context.image_tag.clone());
            job.variables
                .insert("BUILD_PATH".to_string(), self.build_path.clone());

            let mut extra_args = labels.clone();
            if self.spack_based {
                extra_args.push(format!(
                    "--build-arg CACHE_BUCKET=\"s3://{}\"",
                    config.cache_bucket.name
                ));
                if let Some(endpoint_url) = &config.cache_bucket.endpoint_url {
                    extra_args.push(format!("--build-arg MIRROR_URL=\"{}\"", endpoint_url));
                }
                job.update_before_script(
                    &[format!(
                        "cp \"$SPACK_DEPLOYMENT_KEY_PUBLIC\" \"$CI_PROJECT_DIR/{}/key.pub\"",
                        self.build_path
                    )],
                    true,
                );
            }
            let args = job
                .variables
                .entry("BUILDAH_EXTRA_ARGS".to_string())
                .or_default();
            args.push(' ');
            args.push_str(&extra_args.join(" "));

            workflow.add_job(job)?;
        }

        if architectures.len() > 1 {
            for job in workflow.jobs_mut() {
                let architecture = job.architecture.clone().unwrap_or_default();
                if let Some(tag) = job.variables.get_mut("REGISTRY_IMAGE_TAG") {
                    tag.push('-');
                    tag.push_str(&architecture);
                }
            }
            let multiarch = self.multiarch_job(&workflow, &registry_image, context, architectures);
            workflow.add_job(multiarch)?;
        }

        Ok(workflow)
    }

    /// Fan-in job creating the multiarch manifest from every build job
    fn multiarch_job(
        &self,
        workflow: &Workflow,
        registry_image: &str,
        context: &Context<'_>,
        architectures: &[String],
    ) -> Job {
        let mut job = Job::from_template(multiarch_job_name(&self.name), &MULTIARCH);
        for build_job in workflow.jobs() {
            job.add_need(build_job.name.clone());
        }
        debug!("Replacing placeholders in multiarch job script");
        job.script = expand_multiarch_script(&job.script, registry_image, &context.image_tag, architectures);
        job
    }
}

/// Replace the image placeholders, repeating each run of `%ARCH%` lines for
/// every architecture
fn expand_multiarch_script(
    lines: &[String],
    registry_image: &str,
    image_tag: &str,
    architectures: &[String],
) -> Vec<String> {
    let substitute = |line: &str| {
        line.replace("%REGISTRY_IMAGE_TAG%", image_tag)
            .replace("%REGISTRY_IMAGE%", registry_image)
    };

    let mut script = Vec::with_capacity(lines.len());
    let mut index = 0;
    while index < lines.len() {
        if lines[index].contains("%ARCH%") {
            let end = lines[index..]
                .iter()
                .position(|line| !line.contains("%ARCH%"))
                .map_or(lines.len(), |offset| index + offset);
            for architecture in architectures {
                for line in &lines[index..end] {
                    script.push(substitute(line).replace("%ARCH%", architecture));
                }
            }
            index = end;
        } else {
            script.push(substitute(&lines[index]));
            index += 1;
        }
    }
    script
}

/// Build jobs of the base containers
pub fn base_containers_workflow(
    context: &Context<'_>,
    architectures: &[String],
    singularity_version: &str,
    s3cmd_version: &str,
) -> Result<Workflow> {
    info!("Generating base container jobs");
    let spack_branch = context.environment.spack_branch.as_str();
    let containers = [
        BaseContainer::singularitah(singularity_version, s3cmd_version),
        BaseContainer::spacktainerizer("builder", spack_branch),
        BaseContainer::spacktainerizer("runtime", spack_branch),
    ];

    let mut workflow = Workflow::new();
    for container in &containers {
        workflow.extend(container.generate(context, architectures)?)?;
    }
    Ok(workflow)
}

/// Jobs producing the pipeline that builds the spack-based containers
pub fn spackah_generation_workflow(
    context: &Context<'_>,
    architectures: &[String],
    s3cmd_version: &str,
) -> Result<Workflow> {
    let mut workflow = Workflow::new();
    for architecture in architectures {
        let config = context.architecture(architecture)?;
        let mut job = Job::from_template(GENERATE_SPACKAH_JOB, &GENERATE_CONTAINERS_WORKFLOW)
            .with_architecture(architecture, config);
        job.image = Some(context.builder_image());
        job.needs.push(Need::from_pipeline(
            context.environment.pipeline_id.clone(),
            GENERATE_BASE_PIPELINE_JOB,
        ));
        job.variables
            .insert("ARCHITECTURE".to_string(), architecture.to_string());
        job.variables
            .insert("OUTPUT_DIR".to_string(), artifacts_dir(architecture));
        job.variables
            .insert("S3CMD_VERSION".to_string(), s3cmd_version.to_string());
        workflow.add_job(job)?;
    }
    Ok(workflow)
}
