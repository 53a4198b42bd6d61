//! Architecture registry
//!
//! Static, per-architecture deployment settings: which runner tag to use,
//! which S3 buckets hold the build cache and the container images, and
//! which extra variables package-build jobs receive.

use crate::core::variables::{deserialize_variables, Variables};
use crate::error::{JobCreatorError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Names of the CI variables holding an S3 keypair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeypairVariables {
    pub access_key: String,
    pub secret_key: String,
}

/// An S3 bucket used by the generated jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Bucket name
    pub name: String,

    /// Maximum age (in days) of build cache entries
    #[serde(default)]
    pub max_age: Option<u32>,

    /// Custom S3 endpoint, if not AWS
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// CI variables holding the credentials for this bucket
    #[serde(default)]
    pub keypair_variables: Option<KeypairVariables>,
}

/// Deployment settings for one architecture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureConfig {
    /// Runner tag jobs for this architecture are scheduled on
    pub tag: String,

    /// Whether the runners sit behind the HTTP proxy
    #[serde(default = "default_proxy")]
    pub proxy: bool,

    /// Spack build cache bucket
    pub cache_bucket: BucketConfig,

    /// Bucket holding the SIF images
    #[serde(default)]
    pub containers_bucket: Option<BucketConfig>,

    /// Spack requirement matching this architecture
    #[serde(default)]
    pub base_arch: Option<String>,

    /// Extra variables merged into package build jobs
    #[serde(default, deserialize_with = "deserialize_variables")]
    pub variables: Variables,
}

fn default_proxy() -> bool {
    true
}

impl ArchitectureConfig {
    /// Bucket the container images are uploaded to; falls back to the cache bucket
    pub fn containers_bucket(&self) -> &BucketConfig {
        self.containers_bucket.as_ref().unwrap_or(&self.cache_bucket)
    }

    /// Cache entry lifetime in days
    pub fn cache_max_age(&self) -> u32 {
        self.cache_bucket.max_age.unwrap_or(30)
    }
}

/// Read-only lookup table from architecture name to its configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchitectureRegistry {
    architectures: IndexMap<String, ArchitectureConfig>,
}

impl ArchitectureRegistry {
    /// The architectures the build infrastructure ships with.
    ///
    /// Production runs (default branch) use the long-lived cache bucket.
    pub fn builtin(production: bool) -> Self {
        let infrastructure_bucket = BucketConfig {
            name: "sboinfrastructureassets".to_string(),
            max_age: None,
            endpoint_url: None,
            keypair_variables: Some(KeypairVariables {
                access_key: "AWS_INFRASTRUCTURE_ACCESS_KEY_ID".to_string(),
                secret_key: "AWS_INFRASTRUCTURE_SECRET_ACCESS_KEY".to_string(),
            }),
        };
        let max_age = if production { 90 } else { 30 };

        let mut amd64_variables = Variables::new();
        amd64_variables.insert("KUBERNETES_CPU_REQUEST".to_string(), "4".to_string());
        amd64_variables.insert("KUBERNETES_CPU_LIMIT".to_string(), "8".to_string());
        amd64_variables.insert("KUBERNETES_MEMORY_REQUEST".to_string(), "8Gi".to_string());
        amd64_variables.insert("KUBERNETES_MEMORY_LIMIT".to_string(), "8Gi".to_string());

        let amd64 = ArchitectureConfig {
            tag: "kubernetes".to_string(),
            proxy: true,
            cache_bucket: BucketConfig {
                name: if production {
                    "spack-build-cache".to_string()
                } else {
                    "spack-build-cache-dev".to_string()
                },
                max_age: Some(max_age),
                endpoint_url: Some("https://bbpobjectstorage.epfl.ch".to_string()),
                keypair_variables: Some(KeypairVariables {
                    access_key: "BBP_CACHE_ACCESS_KEY_ID".to_string(),
                    secret_key: "BBP_CACHE_SECRET_ACCESS_KEY".to_string(),
                }),
            },
            containers_bucket: Some(infrastructure_bucket.clone()),
            base_arch: Some("%gcc@12 os=ubuntu22.04 target=x86_64_v3".to_string()),
            variables: amd64_variables,
        };

        let arm64 = ArchitectureConfig {
            tag: "aws_graviton".to_string(),
            proxy: false,
            cache_bucket: BucketConfig {
                name: "spack-cache-xlme2pbun4".to_string(),
                max_age: Some(max_age),
                endpoint_url: None,
                keypair_variables: Some(KeypairVariables {
                    access_key: "AWS_CACHE_ACCESS_KEY_ID".to_string(),
                    secret_key: "AWS_CACHE_SECRET_ACCESS_KEY".to_string(),
                }),
            },
            containers_bucket: Some(infrastructure_bucket),
            base_arch: Some("%gcc@12 os=ubuntu22.04 target=armv8.4a".to_string()),
            variables: Variables::new(),
        };

        let mut architectures = IndexMap::new();
        architectures.insert("amd64".to_string(), amd64);
        architectures.insert("arm64".to_string(), arm64);
        Self { architectures }
    }

    /// Load a registry from a YAML file mapping architecture names to settings
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(JobCreatorError::io_at(path))?;
        Self::from_yaml(&content)
    }

    /// Parse a registry from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let registry: ArchitectureRegistry = serde_yaml::from_str(yaml)?;
        Ok(registry)
    }

    /// Register (or replace) an architecture
    pub fn with_architecture(mut self, name: impl Into<String>, config: ArchitectureConfig) -> Self {
        self.architectures.insert(name.into(), config);
        self
    }

    /// Look up the settings of an architecture
    pub fn lookup(&self, architecture: &str) -> Result<&ArchitectureConfig> {
        self.architectures
            .get(architecture)
            .ok_or_else(|| JobCreatorError::UnknownArchitecture {
                architecture: architecture.to_string(),
            })
    }

    /// Whether the architecture is known
    pub fn contains(&self, architecture: &str) -> bool {
        self.architectures.contains_key(architecture)
    }

    /// Known architecture names, in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.architectures.keys().map(String::as_str)
    }
}
