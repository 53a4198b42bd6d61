//! Spack pipeline splitter
//!
//! `spack ci generate` produces one pipeline document holding every build
//! job, grouped in stages. Running it as a single child pipeline does not
//! work for us: jobs need artifacts from the parent pipeline and a few
//! per-architecture settings. The splitter turns it into:
//!
//! * one child pipeline document per non-empty stage,
//! * a root document with a `collect artifacts` job and one trigger per
//!   stage, each trigger waiting for the previous one.

use crate::core::natural::{natural_cmp, natural_key_cmp};
use crate::core::variables::{variables_from_value, Variables};
use crate::core::{
    ArchitectureConfig, ArchitectureRegistry, CiEnvironment, Job, Need, NeedReference, Trigger,
    TriggerSpec, Workflow,
};
use crate::error::{JobCreatorError, Result};
use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_yaml::{Mapping, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Key spack emits when nothing needs to be rebuilt
pub const NO_SPECS_TO_REBUILD: &str = "no-specs-to-rebuild";

/// Job gathering the split documents so triggers can include them
pub const COLLECT_ARTIFACTS_JOB: &str = "collect artifacts";

/// Stage of the collect job and of the root pipeline
pub const RUN_PIPELINES_STAGE: &str = "run spack-generated pipelines";

/// Bucket for jobs that do not declare a stage
pub const FALLBACK_STAGE: &str = "no stage";

/// Default name of the root document
pub const ROOT_PIPELINE_FILE: &str = "spack_pipeline.yaml";

/// Job running `spack ci generate`
pub const POPULATION_JOB: &str = "generate build cache population job";

/// Job running the splitter
pub const PROCESS_JOB: &str = "process spack pipeline";

/// Name of the job producing the spack pipeline for an architecture
pub fn population_job_name(architecture: &str) -> String {
    format!("{} for {}", POPULATION_JOB, architecture)
}

/// Name of the job running the splitter for an architecture
pub fn process_job_name(architecture: &str) -> String {
    format!("{} for {}", PROCESS_JOB, architecture)
}

/// File name of the child pipeline of a stage
pub fn stage_file_name(stage: &str) -> String {
    format!("pipeline-{}.yaml", stage)
}

/// Derive the architecture from an output directory named `<prefix>.<architecture>`
/// (e.g. `artifacts.amd64`)
pub fn architecture_from_out_dir(out_dir: &Path) -> Option<String> {
    let name = out_dir.file_name()?.to_str()?;
    name.split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// The jobs of one stage, sharing the pipeline's variables
#[derive(Debug, Clone, PartialEq)]
pub struct StageGroup {
    pub stage: String,
    pub variables: Variables,
    pub jobs: IndexMap<String, Job>,
}

impl StageGroup {
    fn new(stage: impl Into<String>, variables: Variables) -> Self {
        StageGroup {
            stage: stage.into(),
            variables,
            jobs: IndexMap::new(),
        }
    }

    /// A group holding only the shared variables is not emitted
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl Serialize for StageGroup {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1 + self.jobs.len()))?;
        map.serialize_entry("variables", &self.variables)?;
        for (name, job) in &self.jobs {
            map.serialize_entry(name, job)?;
        }
        map.end()
    }
}

/// Result of splitting one spack pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPipeline {
    pub architecture: String,

    /// Non-empty stage groups, in natural stage order
    pub stage_groups: Vec<StageGroup>,

    /// Root document: collect job plus one trigger per stage group
    pub root: Workflow,
}

impl SplitPipeline {
    /// Documents to write, child pipelines first and root document last
    fn render(&self, out_dir: &Path, root_file: &Path) -> Result<Vec<(PathBuf, String)>> {
        let mut documents = Vec::with_capacity(self.stage_groups.len() + 1);
        for group in &self.stage_groups {
            documents.push((
                out_dir.join(stage_file_name(&group.stage)),
                serde_yaml::to_string(group)?,
            ));
        }
        documents.push((root_file.to_path_buf(), self.root.to_yaml()?));
        Ok(documents)
    }
}

/// What processing a spack pipeline produced
#[derive(Debug, Clone, PartialEq)]
pub enum SplitOutcome {
    /// Spack found nothing to build; the input was copied as the root document
    NothingToRebuild,
    /// The pipeline was split and all documents written
    Split(SplitPipeline),
}

/// Splits spack-generated pipelines into chained per-stage child pipelines
pub struct PipelineSplitter<'a> {
    registry: &'a ArchitectureRegistry,
    environment: &'a CiEnvironment,
}

impl<'a> PipelineSplitter<'a> {
    pub fn new(registry: &'a ArchitectureRegistry, environment: &'a CiEnvironment) -> Self {
        Self {
            registry,
            environment,
        }
    }

    /// Split the pipeline in `pipeline_file` and write the results.
    ///
    /// Child pipelines go to `out_dir`, the root document to `root_file`.
    /// Nothing is written unless every document could be built.
    pub fn process(
        &self,
        pipeline_file: &Path,
        out_dir: &Path,
        root_file: &Path,
        architecture: &str,
    ) -> Result<SplitOutcome> {
        info!(
            "Processing spack pipeline {} for {} into {}",
            pipeline_file.display(),
            architecture,
            out_dir.display()
        );
        self.registry.lookup(architecture)?;

        let raw = std::fs::read(pipeline_file).map_err(JobCreatorError::io_at(pipeline_file))?;
        let document: Value = serde_yaml::from_slice(&raw)?;

        if has_nothing_to_rebuild(&document) {
            info!("Spack found no specs to rebuild for {}", architecture);
            std::fs::write(root_file, &raw).map_err(JobCreatorError::io_at(root_file))?;
            return Ok(SplitOutcome::NothingToRebuild);
        }

        let split = self.split(&document, architecture, out_dir, root_file)?;
        let documents = split.render(out_dir, root_file)?;

        std::fs::create_dir_all(out_dir).map_err(JobCreatorError::io_at(out_dir))?;
        write_all_or_nothing(&documents)?;
        info!(
            "Split spack pipeline for {} into {} stage pipelines",
            architecture,
            split.stage_groups.len()
        );

        Ok(SplitOutcome::Split(split))
    }

    /// Split a parsed spack pipeline document, without touching the filesystem.
    ///
    /// `out_dir` and `root_file` only determine the paths the generated
    /// documents refer to.
    pub fn split(
        &self,
        document: &Value,
        architecture: &str,
        out_dir: &Path,
        root_file: &Path,
    ) -> Result<SplitPipeline> {
        let config = self.registry.lookup(architecture)?;
        let document = document
            .as_mapping()
            .ok_or_else(|| JobCreatorError::schema("<root>", "expected a mapping"))?;

        let stages = declared_stages(document)?;
        let variables = shared_variables(document, config)?;

        let mut groups: IndexMap<String, StageGroup> = stages
            .iter()
            .map(|stage| (stage.clone(), StageGroup::new(stage.clone(), variables.clone())))
            .collect();

        for (key, value) in document {
            let name = key
                .as_str()
                .ok_or_else(|| JobCreatorError::schema(format!("{:?}", key), "job names must be strings"))?;
            if name == "stages" || name == "variables" {
                continue;
            }

            let (stage, job) = self.transform_job(name, value, architecture, config)?;
            if !groups.contains_key(&stage) {
                if stage != FALLBACK_STAGE {
                    return Err(JobCreatorError::schema(
                        format!("{}.stage", name),
                        format!("stage '{}' is not declared in stages", stage),
                    ));
                }
                groups.insert(stage.clone(), StageGroup::new(stage.clone(), variables.clone()));
            }
            if let Some(group) = groups.get_mut(&stage) {
                group.jobs.insert(name.to_string(), job);
            }
        }

        let mut ordered: Vec<StageGroup> = groups.into_values().collect();
        ordered.sort_by(|a, b| natural_cmp(&a.stage, &b.stage));
        check_stage_collisions(&ordered)?;

        let collect_job = self.collect_artifacts_job(architecture, config, out_dir, root_file);
        let mut root = Workflow::new();

        let mut previous_stage: Option<String> = None;
        let mut stage_groups = Vec::new();
        for group in ordered {
            if group.is_empty() {
                debug!("Skipping empty stage {}", group.stage);
                continue;
            }
            debug!("Adding stage {}", group.stage);

            let pipeline_file = out_dir.join(stage_file_name(&group.stage));
            let mut trigger = Trigger::new(
                group.stage.clone(),
                TriggerSpec::artifact(pipeline_file.to_string_lossy(), collect_job.name.clone()),
            );
            trigger.needs.push(Need::with_artifacts(collect_job.name.clone()));
            if let Some(previous) = previous_stage.take() {
                trigger.needs.push(Need::Reference(NeedReference {
                    pipeline: None,
                    job: previous,
                    artifacts: None,
                }));
            }
            trigger.stage = Some(group.stage.clone());

            previous_stage = Some(group.stage.clone());
            stage_groups.push((trigger, group));
        }

        root.add_job(collect_job)?;
        let mut groups = Vec::with_capacity(stage_groups.len());
        for (trigger, group) in stage_groups {
            root.add_trigger(trigger)?;
            groups.push(group);
        }
        root.validate()?;

        Ok(SplitPipeline {
            architecture: architecture.to_string(),
            stage_groups: groups,
            root,
        })
    }

    /// Turn one spack job into a job for the child pipeline; returns its stage
    fn transform_job(
        &self,
        name: &str,
        value: &Value,
        architecture: &str,
        config: &ArchitectureConfig,
    ) -> Result<(String, Job)> {
        let mut fields = value
            .as_mapping()
            .cloned()
            .ok_or_else(|| JobCreatorError::schema(name, "job definition must be a mapping"))?;

        // spack's needs refer to its own job graph, which the split breaks up
        fields.remove("needs");
        let stage = match fields.remove("stage") {
            Some(stage) => stage
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| JobCreatorError::schema(format!("{}.stage", name), "stage must be a string"))?,
            None => {
                warn!("Job '{}' has no stage, putting it in '{}'", name, FALLBACK_STAGE);
                FALLBACK_STAGE.to_string()
            }
        };

        let mut job = Job::from_document(name, fields)?.with_architecture(architecture, config);
        job.add_spack_mirror(config);

        match job.image.as_mut() {
            Some(image) => image.force_pull_always(),
            None => warn!("Job '{}' has no image, cannot force its pull policy", name),
        }

        job.needs = vec![Need::from_pipeline(
            self.environment.pipeline_id.clone(),
            population_job_name(architecture),
        )];

        Ok((stage, job))
    }

    fn collect_artifacts_job(
        &self,
        architecture: &str,
        config: &ArchitectureConfig,
        out_dir: &Path,
        root_file: &Path,
    ) -> Job {
        let mut job = Job::new(COLLECT_ARTIFACTS_JOB).with_architecture(architecture, config);
        job.needs = vec![Need::from_pipeline(
            self.environment.pipeline_id.clone(),
            process_job_name(architecture),
        )];
        job.script = vec![
            format!("cat {}", root_file.display()),
            format!("find {}", out_dir.display()),
        ];
        job.stage = Some(RUN_PIPELINES_STAGE.to_string());

        let mut artifacts = Mapping::new();
        artifacts.insert(Value::from("when"), Value::from("always"));
        artifacts.insert(
            Value::from("paths"),
            Value::Sequence(vec![
                Value::from("*.yaml"),
                Value::from(out_dir.to_string_lossy().into_owned()),
            ]),
        );
        job.artifacts = Some(Value::Mapping(artifacts));
        job
    }
}

/// Write every document to a temporary file next to its target, then move
/// them into place. A failed write leaves none of the documents behind.
fn write_all_or_nothing(documents: &[(PathBuf, String)]) -> Result<()> {
    let mut staged = Vec::with_capacity(documents.len());
    for (path, content) in documents {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir).map_err(JobCreatorError::io_at(path))?;
        file.write_all(content.as_bytes())
            .map_err(JobCreatorError::io_at(path))?;
        staged.push((path, file));
    }

    for (path, file) in staged {
        debug!("Writing {}", path.display());
        file.persist(path)
            .map_err(|err| JobCreatorError::io_at(path)(err.error))?;
    }
    Ok(())
}

/// Whether spack signalled there is nothing to build
pub fn has_nothing_to_rebuild(document: &Value) -> bool {
    document
        .as_mapping()
        .map(|mapping| mapping.contains_key(NO_SPECS_TO_REBUILD))
        .unwrap_or(false)
}

fn declared_stages(document: &Mapping) -> Result<Vec<String>> {
    let stages = document
        .get("stages")
        .ok_or_else(|| JobCreatorError::schema("stages", "missing required key"))?
        .as_sequence()
        .ok_or_else(|| JobCreatorError::schema("stages", "expected a list of stage names"))?;

    stages
        .iter()
        .map(|stage| {
            let stage = stage
                .as_str()
                .ok_or_else(|| JobCreatorError::schema("stages", "stage names must be strings"))?;
            check_stage_name(stage)?;
            Ok(stage.to_string())
        })
        .collect()
}

/// Stage names end up in file names, so they must be a single plain path
/// component
fn check_stage_name(stage: &str) -> Result<()> {
    if stage.is_empty() || stage == "." || stage == ".." || stage.contains(['/', '\\', '\0']) {
        return Err(JobCreatorError::schema(
            "stages",
            format!("stage '{}' cannot be used in a file name", stage),
        ));
    }
    Ok(())
}

/// The pipeline's variables with the architecture's own variables on top
fn shared_variables(document: &Mapping, config: &ArchitectureConfig) -> Result<Variables> {
    let value = document
        .get("variables")
        .ok_or_else(|| JobCreatorError::schema("variables", "missing required key"))?;
    let mut variables = variables_from_value("variables", value)?;
    variables.extend(
        config
            .variables
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );
    Ok(variables)
}

/// Distinct stage names must not compare equal in natural order, or the
/// chain order would depend on spelling (`stage-1` vs `stage-01`)
fn check_stage_collisions(groups: &[StageGroup]) -> Result<()> {
    for pair in groups.windows(2) {
        if natural_key_cmp(&pair[0].stage, &pair[1].stage).is_eq() {
            return Err(JobCreatorError::schema(
                "stages",
                format!(
                    "stages '{}' and '{}' collide in natural order",
                    pair[0].stage, pair[1].stage
                ),
            ));
        }
    }
    Ok(())
}
