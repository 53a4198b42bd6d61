//! Shared fixtures for the integration tests

#![allow(dead_code)]

use job_creator::core::{ArchitectureRegistry, CiEnvironment};
use serde_yaml::Value;
use std::path::Path;

/// A feature-branch CI run of pipeline 4242
pub fn feature_branch() -> CiEnvironment {
    CiEnvironment {
        pipeline_id: Some("4242".to_string()),
        commit_ref_slug: Some("my-feature".to_string()),
        commit_branch: Some("my-feature".to_string()),
        default_branch: Some("main".to_string()),
        registry_image: Some("registry.example.org/hpc/spacktainerizah".to_string()),
        spack_branch: "develop".to_string(),
    }
}

/// Registry declaring a single `x86_64` architecture
pub fn x86_64_registry() -> ArchitectureRegistry {
    ArchitectureRegistry::from_yaml(
        r#"
x86_64:
  tag: "kubernetes"
  proxy: false
  cache_bucket:
    name: "x86-cache"
    max_age: 14
    endpoint_url: "https://s3.example.org"
    keypair_variables:
      access_key: CACHE_ACCESS_KEY
      secret_key: CACHE_SECRET_KEY
  variables:
    KUBERNETES_CPU_LIMIT: 16
    SPACK_BUILD_JOBS: 8
"#,
    )
    .unwrap()
}

/// Parse a YAML file
pub fn read_yaml(path: &Path) -> Value {
    let content = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("cannot read {}: {}", path.display(), e));
    serde_yaml::from_str(&content).unwrap()
}

/// Names of the files in a directory, sorted
pub fn file_names(dir: &Path) -> Vec<String> {
    if !dir.exists() {
        return Vec::new();
    }
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Top-level keys of a mapping document, in document order
pub fn keys(document: &Value) -> Vec<String> {
    document
        .as_mapping()
        .unwrap()
        .keys()
        .map(|key| key.as_str().unwrap().to_string())
        .collect()
}
