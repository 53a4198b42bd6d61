//! Error types for pipeline generation

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building or transforming pipeline documents
#[derive(Error, Debug)]
pub enum JobCreatorError {
    /// The architecture tag is not present in the registry
    #[error("Unknown architecture '{architecture}': not present in the architecture registry")]
    UnknownArchitecture { architecture: String },

    /// An input document is malformed
    #[error("Invalid pipeline document at '{key}': {reason}")]
    Schema { key: String, reason: String },

    /// Two jobs with the same name ended up in one workflow
    #[error("Duplicate job name '{name}' in workflow")]
    DuplicateJob { name: String },

    /// A job references a stage the workflow does not declare
    #[error("Job '{job}' uses stage '{stage}' which is not declared in the workflow stages")]
    UndeclaredStage { job: String, stage: String },

    /// The local `needs` graph loops back on itself
    #[error("Cycle detected in job dependencies involving '{job}'")]
    DependencyCycle { job: String },

    /// Reading or writing a file failed
    #[error("IO error at '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl JobCreatorError {
    pub(crate) fn schema(key: impl Into<String>, reason: impl Into<String>) -> Self {
        JobCreatorError::Schema {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an IO error with the path it happened at, for `map_err`
    pub(crate) fn io_at(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| JobCreatorError::Io { path, source }
    }
}

pub type Result<T> = std::result::Result<T, JobCreatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_names_the_path() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory");
        let err = JobCreatorError::io_at("out/pipeline-1-build.yaml")(source);
        let message = err.to_string();
        assert!(message.contains("out/pipeline-1-build.yaml"), "{}", message);
        assert!(message.contains("No such file or directory"), "{}", message);
    }
}
