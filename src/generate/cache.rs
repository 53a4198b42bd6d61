//! Build cache cleanup phase

use crate::core::templates::CLEAN_CACHE;
use crate::core::{Job, Need, Variables, Workflow};
use crate::error::Result;
use crate::generate::packages::scratch_dir;
use crate::generate::splitter::population_job_name;
use crate::generate::Context;
use tracing::info;

pub const CLEAN_CACHE_JOB: &str = "clean build cache";

/// One job per architecture removing build cache entries no environment
/// uses anymore and that are older than the bucket's max age
pub fn clean_cache_workflow(context: &Context<'_>, architectures: &[String]) -> Result<Workflow> {
    info!("Generating build cache cleanup jobs");
    let mut workflow = Workflow::new();
    workflow.add_stage(CLEAN_CACHE.stage);

    for architecture in architectures {
        let config = context.architecture(architecture)?;
        let mut job = Job::from_template(CLEAN_CACHE_JOB, &CLEAN_CACHE)
            .with_architecture(architecture, config);

        job.needs = vec![Need::with_artifacts(population_job_name(architecture))];

        let mut variables = Variables::new();
        variables.insert(
            "SPACK_ENV".to_string(),
            format!("{}/concrete_environment/spack.lock", scratch_dir(architecture)),
        );
        variables.insert("BUCKET".to_string(), config.cache_bucket.name.clone());
        variables.insert("MAX_AGE".to_string(), config.cache_max_age().to_string());
        job.variables = variables;

        workflow.add_job(job)?;
    }

    Ok(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArchitectureRegistry, CiEnvironment};

    #[test]
    fn test_clean_cache_jobs() {
        let registry = ArchitectureRegistry::builtin(true);
        let environment = CiEnvironment::default();
        let context = Context::new(&registry, &environment);

        let workflow =
            clean_cache_workflow(&context, &["amd64".to_string(), "arm64".to_string()]).unwrap();
        assert_eq!(workflow.stages, vec!["clean build cache"]);

        let amd64 = workflow.job("clean build cache for amd64").unwrap();
        assert_eq!(amd64.variables["BUCKET"], "spack-build-cache");
        assert_eq!(amd64.variables["MAX_AGE"], "90");
        assert_eq!(
            amd64.variables["SPACK_ENV"],
            "jobs_scratch_dir.amd64/concrete_environment/spack.lock"
        );
        assert_eq!(
            amd64.needs,
            vec![Need::with_artifacts("generate build cache population job for amd64")]
        );

        let arm64 = workflow.job("clean build cache for arm64").unwrap();
        assert_eq!(arm64.variables["BUCKET"], "spack-cache-xlme2pbun4");
        assert!(arm64
            .before_script
            .contains(&"unset http_proxy https_proxy HTTP_PROXY HTTPS_PROXY".to_string()));
    }
}
