//! Trigger jobs: jobs that start a child pipeline

use crate::core::job::Need;
use serde::{Deserialize, Serialize};

/// A file included into a (child) pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Include {
    /// A pipeline file produced as an artifact of a job
    Artifact { artifact: String, job: String },
    /// A file from another project
    Project { project: String, file: String },
}

/// What a trigger job starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub include: Vec<Include>,

    /// `depend` makes the trigger job mirror the child pipeline status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
}

impl TriggerSpec {
    /// Start the pipeline stored in an artifact of `job`, and wait for it
    pub fn artifact(path: impl Into<String>, job: impl Into<String>) -> Self {
        TriggerSpec {
            include: vec![Include::Artifact {
                artifact: path.into(),
                job: job.into(),
            }],
            strategy: Some("depend".to_string()),
        }
    }
}

/// A job whose payload is another pipeline document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trigger {
    #[serde(skip)]
    pub name: String,

    pub trigger: TriggerSpec,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<Need>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

impl Trigger {
    pub fn new(name: impl Into<String>, trigger: TriggerSpec) -> Self {
        Trigger {
            name: name.into(),
            trigger,
            needs: Vec::new(),
            stage: None,
        }
    }

    /// The pipeline file this trigger starts, if it comes from an artifact
    pub fn artifact_path(&self) -> Option<&str> {
        self.trigger.include.iter().find_map(|include| match include {
            Include::Artifact { artifact, .. } => Some(artifact.as_str()),
            Include::Project { .. } => None,
        })
    }
}
