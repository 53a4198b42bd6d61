//! Reading, writing and merging YAML documents

use crate::error::{JobCreatorError, Result};
use serde::Serialize;
use serde_yaml::Value;
use std::path::Path;
use tracing::debug;

/// Load a YAML document from a file
pub fn load_yaml<P: AsRef<Path>>(path: P) -> Result<Value> {
    let path = path.as_ref();
    debug!("Loading {}", path.display());
    let content = std::fs::read_to_string(path).map_err(JobCreatorError::io_at(path))?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Write a document to a file as YAML
pub fn write_yaml<T: Serialize + ?Sized, P: AsRef<Path>>(document: &T, path: P) -> Result<()> {
    let path = path.as_ref();
    debug!("Writing {}", path.display());
    let yaml = serde_yaml::to_string(document)?;
    std::fs::write(path, yaml).map_err(JobCreatorError::io_at(path))?;
    Ok(())
}

/// Deep-merge `source` into `target`.
///
/// Mappings merge key by key and lists are concatenated. Equal leaves are
/// kept; differing leaves are a conflict.
pub fn merge_values(target: &mut Value, source: Value) -> Result<()> {
    merge_at(target, source, &mut Vec::new())
}

fn merge_at(target: &mut Value, source: Value, path: &mut Vec<String>) -> Result<()> {
    match (target, source) {
        (Value::Mapping(target), Value::Mapping(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => {
                        path.push(key_label(&key));
                        merge_at(existing, value, path)?;
                        path.pop();
                    }
                    None => {
                        target.insert(key, value);
                    }
                }
            }
            Ok(())
        }
        (Value::Sequence(target), Value::Sequence(source)) => {
            target.extend(source);
            Ok(())
        }
        (target, source) if *target == source => Ok(()),
        _ => Err(JobCreatorError::schema(path.join("."), "conflicting values while merging")),
    }
}

fn key_label(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_merge_nested_mappings() {
        let mut target = yaml("spack: {specs: [zlib], config: {a: 1}}");
        merge_values(&mut target, yaml("spack: {specs: [cmake], config: {b: 2}}")).unwrap();
        assert_eq!(
            target,
            yaml("spack: {specs: [zlib, cmake], config: {a: 1, b: 2}}")
        );
    }

    #[test]
    fn test_merge_equal_leaves() {
        let mut target = yaml("a: {b: same}");
        merge_values(&mut target, yaml("a: {b: same}")).unwrap();
        assert_eq!(target, yaml("a: {b: same}"));
    }

    #[test]
    fn test_merge_conflict_reports_path() {
        let mut target = yaml("packages: {zlib: {require: '@1.2'}}");
        let err = merge_values(&mut target, yaml("packages: {zlib: {require: '@1.3'}}")).unwrap_err();
        assert!(matches!(err, JobCreatorError::Schema { ref key, .. } if key == "packages.zlib.require"));
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.yaml");
        write_yaml(&yaml("stages: [a, b]"), &path).unwrap();
        assert_eq!(load_yaml(&path).unwrap(), yaml("stages: [a, b]"));
    }
}
