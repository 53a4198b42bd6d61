//! Splitting spack-generated pipelines on disk

mod helpers;

use helpers::*;
use job_creator::core::ArchitectureRegistry;
use job_creator::generate::{PipelineSplitter, SplitOutcome};
use job_creator::JobCreatorError;
use serde_yaml::Value;
use std::fs;
use std::path::PathBuf;

const TWO_STAGES: &str = r#"
stages: [1-build, 2-test]
variables:
  SPACK_VERSION: develop
  KUBERNETES_CPU_LIMIT: 2
zlib:
  stage: 1-build
  image: {name: spack/builder, entrypoint: [""]}
  script: [spack ci rebuild]
  artifacts:
    paths: [jobs_scratch_dir/logs]
cmake:
  stage: 1-build
  needs:
    - zlib
    - {job: zlib, artifacts: true}
  image: spack/builder
  script: [spack ci rebuild]
ctest:
  stage: 2-test
  needs: [cmake]
  image: spack/builder
  tags: [kubernetes]
  script: [spack ci rebuild]
"#;

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        Workspace {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn pipeline(&self, content: &str) -> PathBuf {
        let path = self.dir.path().join("pipeline.yml");
        fs::write(&path, content).unwrap();
        path
    }

    fn out_dir(&self, architecture: &str) -> PathBuf {
        self.dir.path().join(format!("artifacts.{}", architecture))
    }

    fn root_file(&self) -> PathBuf {
        self.dir.path().join("spack_pipeline.yaml")
    }
}

#[test]
fn test_nothing_to_rebuild_is_copied_verbatim() {
    let workspace = Workspace::new();
    let content = "# generated by spack\nno-specs-to-rebuild:\n  script:   [echo 'nothing to do']\n";
    let pipeline = workspace.pipeline(content);

    let registry = ArchitectureRegistry::builtin(false);
    let environment = feature_branch();
    let outcome = PipelineSplitter::new(&registry, &environment)
        .process(&pipeline, &workspace.out_dir("amd64"), &workspace.root_file(), "amd64")
        .unwrap();

    assert_eq!(outcome, SplitOutcome::NothingToRebuild);
    assert_eq!(fs::read(workspace.root_file()).unwrap(), content.as_bytes());
    assert!(file_names(&workspace.out_dir("amd64")).is_empty());
}

#[test]
fn test_split_writes_one_pipeline_per_stage() {
    let workspace = Workspace::new();
    let pipeline = workspace.pipeline(TWO_STAGES);
    let out_dir = workspace.out_dir("x86_64");

    let registry = x86_64_registry();
    let environment = feature_branch();
    let outcome = PipelineSplitter::new(&registry, &environment)
        .process(&pipeline, &out_dir, &workspace.root_file(), "x86_64")
        .unwrap();

    let SplitOutcome::Split(split) = outcome else {
        panic!("expected the pipeline to be split");
    };
    assert_eq!(split.stage_groups.len(), 2);
    assert_eq!(
        file_names(&out_dir),
        vec!["pipeline-1-build.yaml", "pipeline-2-test.yaml"]
    );

    let root = read_yaml(&workspace.root_file());
    assert_eq!(
        keys(&root),
        vec!["stages", "collect artifacts for x86_64", "1-build", "2-test"]
    );
    assert_eq!(
        root["stages"],
        serde_yaml::from_str::<Value>("[run spack-generated pipelines, 1-build, 2-test]").unwrap()
    );
}

#[test]
fn test_triggers_form_a_chain() {
    let workspace = Workspace::new();
    let pipeline = workspace.pipeline(TWO_STAGES);
    let out_dir = workspace.out_dir("x86_64");

    let registry = x86_64_registry();
    let environment = feature_branch();
    PipelineSplitter::new(&registry, &environment)
        .process(&pipeline, &out_dir, &workspace.root_file(), "x86_64")
        .unwrap();
    let root = read_yaml(&workspace.root_file());

    let first = &root["1-build"];
    assert_eq!(
        first["needs"],
        serde_yaml::from_str::<Value>("[{job: collect artifacts for x86_64, artifacts: true}]").unwrap()
    );
    assert_eq!(first["stage"], Value::from("1-build"));
    assert_eq!(first["trigger"]["strategy"], Value::from("depend"));
    assert_eq!(
        first["trigger"]["include"][0]["artifact"],
        Value::from(out_dir.join("pipeline-1-build.yaml").to_string_lossy().into_owned())
    );
    assert_eq!(
        first["trigger"]["include"][0]["job"],
        Value::from("collect artifacts for x86_64")
    );

    assert_eq!(
        root["2-test"]["needs"],
        serde_yaml::from_str::<Value>(
            "[{job: collect artifacts for x86_64, artifacts: true}, {job: 1-build}]"
        )
        .unwrap()
    );
}

#[test]
fn test_collect_job_waits_for_the_process_job() {
    let workspace = Workspace::new();
    let pipeline = workspace.pipeline(TWO_STAGES);
    let out_dir = workspace.out_dir("x86_64");

    let registry = x86_64_registry();
    let environment = feature_branch();
    PipelineSplitter::new(&registry, &environment)
        .process(&pipeline, &out_dir, &workspace.root_file(), "x86_64")
        .unwrap();
    let collect = &read_yaml(&workspace.root_file())["collect artifacts for x86_64"];

    assert_eq!(
        collect["needs"],
        serde_yaml::from_str::<Value>(
            "[{pipeline: '4242', job: process spack pipeline for x86_64, artifacts: true}]"
        )
        .unwrap()
    );
    assert_eq!(collect["stage"], Value::from("run spack-generated pipelines"));
    assert_eq!(collect["artifacts"]["when"], Value::from("always"));
    assert_eq!(collect["artifacts"]["paths"][0], Value::from("*.yaml"));
    assert_eq!(collect["tags"], serde_yaml::from_str::<Value>("[kubernetes]").unwrap());
}

#[test]
fn test_stage_pipeline_jobs() {
    let workspace = Workspace::new();
    let pipeline = workspace.pipeline(TWO_STAGES);
    let out_dir = workspace.out_dir("x86_64");

    let registry = x86_64_registry();
    let environment = feature_branch();
    PipelineSplitter::new(&registry, &environment)
        .process(&pipeline, &out_dir, &workspace.root_file(), "x86_64")
        .unwrap();

    let build = read_yaml(&out_dir.join("pipeline-1-build.yaml"));
    assert_eq!(keys(&build), vec!["variables", "zlib", "cmake"]);
    assert_eq!(build["variables"]["SPACK_VERSION"], Value::from("develop"));
    assert_eq!(build["variables"]["KUBERNETES_CPU_LIMIT"], Value::from("16"));
    assert_eq!(build["variables"]["SPACK_BUILD_JOBS"], Value::from("8"));

    let population_need = serde_yaml::from_str::<Value>(
        "[{pipeline: '4242', job: generate build cache population job for x86_64, artifacts: true}]",
    )
    .unwrap();
    let cmake = &build["cmake"];
    assert_eq!(cmake["needs"], population_need, "spack's own needs are dropped");
    assert!(cmake.get("stage").is_none());
    assert_eq!(cmake["image"]["name"], Value::from("spack/builder"));
    assert_eq!(cmake["image"]["pull_policy"], Value::from("always"));

    let zlib = &build["zlib"];
    assert_eq!(zlib["image"]["entrypoint"], serde_yaml::from_str::<Value>("['']").unwrap());
    assert_eq!(zlib["image"]["pull_policy"], Value::from("always"));
    assert_eq!(
        zlib["artifacts"],
        serde_yaml::from_str::<Value>("{paths: [jobs_scratch_dir/logs]}").unwrap()
    );

    let before_script: Vec<&str> = zlib["before_script"]
        .as_sequence()
        .unwrap()
        .iter()
        .map(|line| line.as_str().unwrap())
        .collect();
    assert!(before_script.contains(&"unset http_proxy https_proxy HTTP_PROXY HTTPS_PROXY"));
    assert!(before_script.contains(&"export AWS_ACCESS_KEY_ID=$CACHE_ACCESS_KEY"));
    assert!(before_script.contains(&"export S3_ENDPOINT_URL=https://s3.example.org"));
    assert_eq!(
        before_script.last(),
        Some(&"spack mirror add --s3-access-key-id=$CACHE_ACCESS_KEY --s3-access-key-secret=$CACHE_SECRET_KEY --s3-endpoint-url=https://s3.example.org s3Cache s3://x86-cache")
    );

    let test = read_yaml(&out_dir.join("pipeline-2-test.yaml"));
    assert_eq!(keys(&test), vec!["variables", "ctest"]);
    assert_eq!(test["ctest"]["needs"], population_need);
    assert_eq!(test["ctest"]["tags"], serde_yaml::from_str::<Value>("[kubernetes]").unwrap());
    assert_eq!(test["variables"], build["variables"]);
}

#[test]
fn test_out_dir_extension_names_the_architecture() {
    let workspace = Workspace::new();
    let out_dir = workspace.out_dir("x86_64");
    assert_eq!(
        job_creator::generate::splitter::architecture_from_out_dir(&out_dir).as_deref(),
        Some("x86_64")
    );
}

#[test]
fn test_unknown_architecture_writes_nothing() {
    let workspace = Workspace::new();
    let pipeline = workspace.pipeline(TWO_STAGES);
    let out_dir = workspace.out_dir("riscv99");

    let registry = ArchitectureRegistry::builtin(false);
    let environment = feature_branch();
    let err = PipelineSplitter::new(&registry, &environment)
        .process(&pipeline, &out_dir, &workspace.root_file(), "riscv99")
        .unwrap_err();

    assert!(matches!(err, JobCreatorError::UnknownArchitecture { ref architecture } if architecture == "riscv99"));
    assert!(!out_dir.exists());
    assert!(!workspace.root_file().exists());
}

#[test]
fn test_invalid_pipeline_writes_nothing() {
    let workspace = Workspace::new();
    let pipeline = workspace.pipeline(
        r#"
stages: [1-build]
variables: {}
zlib:
  stage: 9-deploy
  script: [spack ci rebuild]
"#,
    );
    let out_dir = workspace.out_dir("amd64");

    let registry = ArchitectureRegistry::builtin(false);
    let environment = feature_branch();
    let err = PipelineSplitter::new(&registry, &environment)
        .process(&pipeline, &out_dir, &workspace.root_file(), "amd64")
        .unwrap_err();

    assert!(matches!(err, JobCreatorError::Schema { .. }));
    assert!(!out_dir.exists());
    assert!(!workspace.root_file().exists());
}

#[test]
fn test_stage_name_with_path_separator_writes_nothing() {
    let workspace = Workspace::new();
    let pipeline = workspace.pipeline(
        r#"
stages: [stage-1, stage-2/x]
variables: {}
zlib:
  stage: stage-1
  image: spack/builder
  script: [spack ci rebuild]
cmake:
  stage: stage-2/x
  image: spack/builder
  script: [spack ci rebuild]
"#,
    );
    let out_dir = workspace.out_dir("amd64");

    let registry = ArchitectureRegistry::builtin(false);
    let environment = feature_branch();
    let err = PipelineSplitter::new(&registry, &environment)
        .process(&pipeline, &out_dir, &workspace.root_file(), "amd64")
        .unwrap_err();

    assert!(err.to_string().contains("stage-2/x"), "{}", err);
    assert!(file_names(&out_dir).is_empty());
    assert!(!workspace.root_file().exists());
}

#[test]
fn test_missing_pipeline_file_is_named_in_the_error() {
    let workspace = Workspace::new();
    let missing = workspace.dir.path().join("missing.yml");

    let registry = ArchitectureRegistry::builtin(false);
    let environment = feature_branch();
    let err = PipelineSplitter::new(&registry, &environment)
        .process(&missing, &workspace.out_dir("amd64"), &workspace.root_file(), "amd64")
        .unwrap_err();

    assert!(matches!(err, JobCreatorError::Io { ref path, .. } if path == &missing));
    assert!(err.to_string().contains("missing.yml"));
}
