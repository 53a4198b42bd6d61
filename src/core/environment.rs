//! CI run environment
//!
//! The handful of GitLab-provided variables the generators read. They are
//! captured once and passed around explicitly so generation stays a pure
//! function of its inputs.

use chrono::{Local, NaiveDate};

/// Registry the images are pushed to when `CI_REGISTRY_IMAGE` is not set
pub const DEFAULT_REGISTRY_IMAGE: &str = "bbpgitlab.epfl.ch:5050/hpc/spacktainerizah";

/// Values of the CI variables for the current run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CiEnvironment {
    /// `CI_PIPELINE_ID`: identifies the parent pipeline in cross-pipeline needs
    pub pipeline_id: Option<String>,

    /// `CI_COMMIT_REF_SLUG`
    pub commit_ref_slug: Option<String>,

    /// `CI_COMMIT_BRANCH`
    pub commit_branch: Option<String>,

    /// `CI_DEFAULT_BRANCH`
    pub default_branch: Option<String>,

    /// `CI_REGISTRY_IMAGE`
    pub registry_image: Option<String>,

    /// `SPACK_BRANCH`, defaults to `develop`
    pub spack_branch: String,
}

impl CiEnvironment {
    /// Read the environment of the running process
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok();
        Self {
            pipeline_id: var("CI_PIPELINE_ID"),
            commit_ref_slug: var("CI_COMMIT_REF_SLUG"),
            commit_branch: var("CI_COMMIT_BRANCH"),
            default_branch: var("CI_DEFAULT_BRANCH"),
            registry_image: var("CI_REGISTRY_IMAGE"),
            spack_branch: var("SPACK_BRANCH").unwrap_or_else(|| "develop".to_string()),
        }
    }

    /// Production runs happen on the default branch
    pub fn is_production(&self) -> bool {
        self.commit_ref_slug == self.default_branch
    }

    /// Whether the commit being built is on the default branch
    pub fn on_default_branch(&self) -> bool {
        self.commit_branch == self.default_branch
    }

    /// Tag of the base images built in this run
    pub fn image_tag(&self) -> String {
        self.image_tag_on(Local::now().date_naive())
    }

    /// Tag of the base images built on the given day: `latest` on the default
    /// branch, otherwise the date followed by the branch name
    pub fn image_tag_on(&self, day: NaiveDate) -> String {
        if self.on_default_branch() {
            "latest".to_string()
        } else {
            format!(
                "{}-{}",
                day.format("%Y.%m.%d"),
                self.commit_branch.as_deref().unwrap_or_default()
            )
        }
    }

    /// Registry path of an image built from `build_path`
    pub fn registry_image_for(&self, build_path: &str) -> String {
        format!(
            "{}/{}",
            self.registry_image.as_deref().unwrap_or(DEFAULT_REGISTRY_IMAGE),
            build_path
        )
    }
}
