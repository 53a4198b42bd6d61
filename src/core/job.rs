//! Job domain model

use crate::core::architecture::{ArchitectureConfig, BucketConfig};
use crate::core::templates::JobTemplate;
use crate::core::variables::{scalar_to_string, variables_from_value, Variables};
use crate::error::{JobCreatorError, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info, warn};

/// Top-level job keys GitLab understands that are passed through untouched
pub const PASSTHROUGH_KEYS: &[&str] = &[
    "after_script",
    "allow_failure",
    "cache",
    "coverage",
    "dependencies",
    "environment",
    "extends",
    "hooks",
    "id_tokens",
    "inherit",
    "interruptible",
    "parallel",
    "release",
    "resource_group",
    "retry",
    "rules",
    "secrets",
    "services",
    "timeout",
    "trigger",
    "when",
];

/// A dependency of a job on another job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Need {
    /// Bare job name in the same pipeline
    Name(String),
    /// Structured reference, possibly to another pipeline
    Reference(NeedReference),
}

/// Structured `needs` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeedReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,

    pub job: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<bool>,
}

impl Need {
    /// Depend on a job by name
    pub fn name(job: impl Into<String>) -> Self {
        Need::Name(job.into())
    }

    /// Depend on a job in the same pipeline and fetch its artifacts
    pub fn with_artifacts(job: impl Into<String>) -> Self {
        Need::Reference(NeedReference {
            pipeline: None,
            job: job.into(),
            artifacts: Some(true),
        })
    }

    /// Depend on a job of a given pipeline run and fetch its artifacts
    pub fn from_pipeline(pipeline: Option<String>, job: impl Into<String>) -> Self {
        Need::Reference(NeedReference {
            pipeline,
            job: job.into(),
            artifacts: Some(true),
        })
    }

    /// Name of the job depended on
    pub fn job_name(&self) -> &str {
        match self {
            Need::Name(name) => name,
            Need::Reference(reference) => &reference.job,
        }
    }

    /// Whether this need points at a job of the same pipeline
    pub fn is_local(&self) -> bool {
        match self {
            Need::Name(_) => true,
            Need::Reference(reference) => reference.pipeline.is_none(),
        }
    }

    /// Whether artifacts of the needed job are requested
    pub fn wants_artifacts(&self) -> bool {
        matches!(self, Need::Reference(NeedReference { artifacts: Some(true), .. }))
    }
}

/// Container image of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Image {
    /// Plain image reference
    Name(String),
    /// Image with options (pull policy, entrypoint, ...)
    Spec(ImageSpec),
}

/// Image given as a mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub name: String,

    #[serde(flatten)]
    pub options: Mapping,
}

impl Image {
    /// Image with `pull_policy: always`
    pub fn always_pulled(name: impl Into<String>) -> Self {
        let mut image = Image::Name(name.into());
        image.force_pull_always();
        image
    }

    /// Force the runner to pull the image for every job
    pub fn force_pull_always(&mut self) {
        if let Image::Name(name) = self {
            let name = std::mem::take(name);
            *self = Image::Spec(ImageSpec {
                name,
                options: Mapping::new(),
            });
        }
        if let Image::Spec(spec) = self {
            spec.options
                .insert(Value::from("pull_policy"), Value::from("always"));
        }
    }

    /// Image reference
    pub fn name(&self) -> &str {
        match self {
            Image::Name(name) => name,
            Image::Spec(spec) => &spec.name,
        }
    }

    /// Pull policy, if one is set
    pub fn pull_policy(&self) -> Option<&str> {
        match self {
            Image::Name(_) => None,
            Image::Spec(spec) => spec.options.get("pull_policy").and_then(Value::as_str),
        }
    }
}

/// A single CI job
///
/// Fields serialize in the order GitLab users are used to reading; empty
/// fields are omitted. `name` and `architecture` are not part of the
/// serialized job: the name is the key the job is stored under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    #[serde(skip)]
    pub name: String,

    #[serde(skip)]
    pub architecture: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<Need>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub script: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Value>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub before_script: Vec<String>,

    #[serde(skip_serializing_if = "Variables::is_empty")]
    pub variables: Variables,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,

    /// Passthrough keys (timeout, rules, extends, ...)
    #[serde(flatten)]
    pub extra: Mapping,
}

impl Job {
    /// Create an empty job
    pub fn new(name: impl Into<String>) -> Self {
        Job {
            name: name.into(),
            architecture: None,
            needs: Vec::new(),
            script: Vec::new(),
            stage: None,
            artifacts: None,
            tags: Vec::new(),
            before_script: Vec::new(),
            variables: Variables::new(),
            image: None,
            extra: Mapping::new(),
        }
    }

    /// Create a job from a template
    pub fn from_template(name: impl Into<String>, template: &JobTemplate) -> Self {
        let mut job = Job::new(name);
        job.stage = Some(template.stage.to_string());
        job.script = template.script.iter().map(|line| line.to_string()).collect();
        job.before_script = template
            .before_script
            .iter()
            .map(|line| line.to_string())
            .collect();
        job.tags = template.tags.iter().map(|tag| tag.to_string()).collect();
        job.variables = template
            .variables
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        job.image = template.image.map(|image| Image::Name(image.to_string()));
        job.artifacts = template.artifacts.as_ref().map(|artifacts| artifacts.to_value());

        if let Some(extends) = template.extends {
            job.extra.insert(Value::from("extends"), Value::from(extends));
        }
        if let Some(timeout) = template.timeout {
            job.extra.insert(Value::from("timeout"), Value::from(timeout));
        }
        if template.allow_failure {
            job.extra.insert(Value::from("allow_failure"), Value::from(true));
        }
        if !template.rules.is_empty() {
            let rules = template
                .rules
                .iter()
                .map(|condition| {
                    let mut rule = Mapping::new();
                    rule.insert(Value::from("if"), Value::from(*condition));
                    Value::Mapping(rule)
                })
                .collect();
            job.extra.insert(Value::from("rules"), Value::Sequence(rules));
        }
        job
    }

    /// Build a job from a raw document mapping (e.g. a spack-generated job)
    ///
    /// Known fields are parsed into their typed counterparts; everything else
    /// is kept as passthrough, with a warning for keys GitLab would not know.
    pub fn from_document(name: impl Into<String>, document: Mapping) -> Result<Self> {
        let mut job = Job::new(name);

        for (key, value) in document {
            let key_name = scalar_to_string(&key).ok_or_else(|| {
                JobCreatorError::schema(job.name.clone(), "job keys must be scalars")
            })?;
            let path = format!("{}.{}", job.name, key_name);

            match key_name.as_str() {
                "needs" => {
                    job.needs = serde_yaml::from_value(value)
                        .map_err(|e| JobCreatorError::schema(path, e.to_string()))?;
                }
                "script" => job.script = string_list(&path, value)?,
                "before_script" => job.before_script = string_list(&path, value)?,
                "tags" => job.tags = string_list(&path, value)?,
                "stage" => {
                    job.stage = Some(scalar_to_string(&value).ok_or_else(|| {
                        JobCreatorError::schema(path, "stage must be a string")
                    })?);
                }
                "artifacts" => job.artifacts = Some(value),
                "variables" => job.variables = variables_from_value(&path, &value)?,
                "image" => {
                    job.image = Some(
                        serde_yaml::from_value(value)
                            .map_err(|e| JobCreatorError::schema(path, e.to_string()))?,
                    );
                }
                other => {
                    if !PASSTHROUGH_KEYS.contains(&other) {
                        warn!("Job '{}' has unrecognized key '{}', passing it through", job.name, other);
                    }
                    job.extra.insert(key, value);
                }
            }
        }

        Ok(job)
    }

    /// Bind the job to an architecture.
    ///
    /// The architecture is appended to the job name, its runner tag is added
    /// and proxy/S3 settings are injected into `before_script`.
    pub fn with_architecture(mut self, architecture: &str, config: &ArchitectureConfig) -> Self {
        self.name = format!("{} for {}", self.name, architecture);
        self.architecture = Some(architecture.to_string());
        if !self.tags.contains(&config.tag) {
            self.tags.push(config.tag.clone());
        }
        self.set_proxy_variables(config);
        self.set_aws_variables(config);
        self
    }

    /// Runners without proxy must not inherit the proxy variables
    pub fn set_proxy_variables(&mut self, config: &ArchitectureConfig) {
        if !config.proxy {
            self.update_before_script(
                &["unset http_proxy https_proxy HTTP_PROXY HTTPS_PROXY".to_string()],
                false,
            );
        }
    }

    /// Export the S3 credentials and endpoint of the architecture's cache bucket
    pub fn set_aws_variables(&mut self, config: &ArchitectureConfig) {
        let bucket = &config.cache_bucket;
        let mut lines = Vec::new();
        match &bucket.keypair_variables {
            Some(keypair) => {
                lines.push(format!("export AWS_ACCESS_KEY_ID=${}", keypair.access_key));
                lines.push(format!("export AWS_SECRET_ACCESS_KEY=${}", keypair.secret_key));
            }
            None => info!(
                "No keypair defined for {}",
                self.architecture.as_deref().unwrap_or(&self.name)
            ),
        }
        if let Some(endpoint_url) = &bucket.endpoint_url {
            lines.push(format!("export S3_ENDPOINT_URL={}", endpoint_url));
        }

        self.update_before_script(&lines, false);
    }

    /// Register the architecture's build cache as a spack mirror
    pub fn add_spack_mirror(&mut self, config: &ArchitectureConfig) {
        let bucket = &config.cache_bucket;
        let mut mirror_add = vec!["spack mirror add".to_string()];
        if let Some(keypair) = &bucket.keypair_variables {
            mirror_add.push(format!("--s3-access-key-id=${}", keypair.access_key));
            mirror_add.push(format!("--s3-access-key-secret=${}", keypair.secret_key));
        }
        if let Some(endpoint_url) = &bucket.endpoint_url {
            mirror_add.push(format!("--s3-endpoint-url={}", endpoint_url));
        }
        mirror_add.push(format!("s3Cache s3://{}", bucket.name));

        let lines = vec![
            ". ${SPACK_ROOT}/share/spack/setup-env.sh".to_string(),
            "spack mirror rm bbpS3 || true".to_string(),
            mirror_add.join(" "),
        ];
        self.update_before_script(&lines, true);
    }

    /// Write an s3cmd configuration for the given bucket
    pub fn configure_s3cmd(&mut self, bucket: &BucketConfig) {
        let mut lines = vec!["echo '[default]' > /root/.s3cfg".to_string()];
        if let Some(keypair) = &bucket.keypair_variables {
            lines.push(format!("echo \"access_key = ${{{}}}\" >> /root/.s3cfg", keypair.access_key));
            lines.push(format!("echo \"secret_key = ${{{}}}\" >> /root/.s3cfg", keypair.secret_key));
        }
        if let Some(endpoint_url) = &bucket.endpoint_url {
            let host = endpoint_url
                .trim_start_matches("https://")
                .trim_start_matches("http://");
            lines.push(format!("echo \"host_base = {}\" >> /root/.s3cfg", host));
            lines.push(format!("echo \"host_bucket = {}\" >> /root/.s3cfg", host));
        }
        self.update_before_script(&lines, true);
    }

    /// Insert lines into `before_script` unless all of them are already there.
    ///
    /// `append` puts them at the end, otherwise they go to the front.
    pub fn update_before_script(&mut self, lines: &[String], append: bool) {
        if lines.iter().all(|line| self.before_script.contains(line)) {
            return;
        }
        if append {
            self.before_script.extend(lines.iter().cloned());
        } else {
            self.before_script.splice(0..0, lines.iter().cloned());
        }
    }

    /// Append a bare-name dependency, unless it is already there
    pub fn add_need(&mut self, name: impl Into<String>) {
        let need = Need::Name(name.into());
        if !self.needs.contains(&need) {
            debug!("Adding need {} to {}", need.job_name(), self.name);
            self.needs.push(need);
        }
    }
}

/// Parse a string or a (possibly nested) list of strings
fn string_list(path: &str, value: Value) -> Result<Vec<String>> {
    match value {
        Value::Sequence(items) => {
            let mut lines = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Sequence(_) => lines.extend(string_list(path, item)?),
                    other => lines.push(scalar_to_string(&other).ok_or_else(|| {
                        JobCreatorError::schema(path, "expected a list of strings")
                    })?),
                }
            }
            Ok(lines)
        }
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![scalar_to_string(&other)
            .ok_or_else(|| JobCreatorError::schema(path, "expected a string or a list of strings"))?]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::architecture::ArchitectureRegistry;

    fn document(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_empty_job_serializes_to_empty_mapping() {
        let job = Job::new("empty");
        assert_eq!(serde_yaml::to_value(&job).unwrap(), Value::Mapping(Mapping::new()));
    }

    #[test]
    fn test_from_document() {
        let job = Job::from_document(
            "build zlib",
            document(
                r#"
stage: stage-1
script: [spack ci rebuild]
variables: {SPACK_JOB_SPEC_PKG_NAME: zlib, RETRIES: 2}
image: {name: builder, entrypoint: [""]}
retry: {max: 2}
"#,
            ),
        )
        .unwrap();

        assert_eq!(job.stage.as_deref(), Some("stage-1"));
        assert_eq!(job.script, vec!["spack ci rebuild"]);
        assert_eq!(job.variables["RETRIES"], "2");
        assert_eq!(job.image.as_ref().unwrap().name(), "builder");
        assert!(job.extra.contains_key("retry"));
    }

    #[test]
    fn test_from_document_parses_needs() {
        let job = Job::from_document(
            "test",
            document("needs: [a, {job: b, artifacts: false}]"),
        )
        .unwrap();
        assert_eq!(job.needs[0], Need::name("a"));
        assert_eq!(job.needs[1].job_name(), "b");
        assert!(!job.needs[1].wants_artifacts());
    }

    #[test]
    fn test_unrecognized_key_is_kept() {
        let job = Job::from_document("test", document("custom_field: 1")).unwrap();
        assert_eq!(job.extra.get("custom_field"), Some(&Value::from(1)));
    }

    #[test]
    fn test_with_architecture() {
        let registry = ArchitectureRegistry::builtin(false);
        let arm64 = registry.lookup("arm64").unwrap();
        let job = Job::new("build builder").with_architecture("arm64", arm64);

        assert_eq!(job.name, "build builder for arm64");
        assert_eq!(job.tags, vec!["aws_graviton"]);
        assert_eq!(
            job.before_script,
            vec![
                "export AWS_ACCESS_KEY_ID=$AWS_CACHE_ACCESS_KEY_ID",
                "export AWS_SECRET_ACCESS_KEY=$AWS_CACHE_SECRET_ACCESS_KEY",
                "unset http_proxy https_proxy HTTP_PROXY HTTPS_PROXY",
            ]
        );
    }

    #[test]
    fn test_set_aws_variables_is_idempotent() {
        let registry = ArchitectureRegistry::builtin(false);
        let amd64 = registry.lookup("amd64").unwrap();
        let mut job = Job::new("job").with_architecture("amd64", amd64);
        let before = job.before_script.clone();
        job.set_aws_variables(amd64);
        assert_eq!(job.before_script, before);
        assert_eq!(before.last().unwrap(), "export S3_ENDPOINT_URL=https://bbpobjectstorage.epfl.ch");
    }

    #[test]
    fn test_add_spack_mirror() {
        let registry = ArchitectureRegistry::builtin(false);
        let amd64 = registry.lookup("amd64").unwrap();
        let mut job = Job::new("job");
        job.before_script.push("first".to_string());
        job.add_spack_mirror(amd64);

        assert_eq!(job.before_script[0], "first");
        assert_eq!(
            job.before_script.last().unwrap(),
            "spack mirror add --s3-access-key-id=$BBP_CACHE_ACCESS_KEY_ID \
             --s3-access-key-secret=$BBP_CACHE_SECRET_ACCESS_KEY \
             --s3-endpoint-url=https://bbpobjectstorage.epfl.ch s3Cache s3://spack-build-cache-dev"
        );
    }

    #[test]
    fn test_force_pull_always() {
        let mut image = Image::Name("ubuntu:22.04".to_string());
        image.force_pull_always();
        assert_eq!(image.pull_policy(), Some("always"));
        assert_eq!(image.name(), "ubuntu:22.04");

        let value = serde_yaml::to_value(&image).unwrap();
        assert_eq!(value["pull_policy"], Value::from("always"));
    }

    #[test]
    fn test_add_need_deduplicates() {
        let mut job = Job::new("job");
        job.add_need("other");
        job.add_need("other");
        assert_eq!(job.needs, vec![Need::name("other")]);
    }

    #[test]
    fn test_serialization_order() {
        let mut job = Job::new("job");
        job.image = Some(Image::Name("img".to_string()));
        job.variables.insert("A".to_string(), "1".to_string());
        job.stage = Some("build".to_string());
        job.needs.push(Need::with_artifacts("other"));
        job.extra.insert(Value::from("timeout"), Value::from("1h"));

        let yaml = serde_yaml::to_string(&job).unwrap();
        let keys: Vec<&str> = yaml
            .lines()
            .filter(|line| !line.starts_with(' ') && !line.starts_with('-'))
            .map(|line| line.split(':').next().unwrap())
            .collect();
        assert_eq!(keys, vec!["needs", "stage", "variables", "image", "timeout"]);
    }
}
