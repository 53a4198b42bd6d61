//! Container definitions
//!
//! Containers are declared under `container_definitions/<architecture>/`:
//! `<name>.yaml` files hold a spack environment section describing a
//! container we build, `<name>.def` files are singularity definitions of an
//! existing image we only convert to SIF.

use crate::core::document::merge_values;
use crate::core::natural::natural_sort;
use crate::error::{JobCreatorError, Result};
use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default location of the container definitions
pub const DEFINITIONS_DIR: &str = "container_definitions";

/// Architectures having a sub-directory in the definitions directory, sorted
pub fn discover_architectures(root: &Path) -> Result<Vec<String>> {
    let mut architectures = Vec::new();
    for entry in std::fs::read_dir(root).map_err(JobCreatorError::io_at(root))? {
        let entry = entry.map_err(JobCreatorError::io_at(root))?;
        if entry.path().is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                architectures.push(name.to_string());
            }
        }
    }
    natural_sort(&mut architectures);
    debug!("Found architectures {:?} in {}", architectures, root.display());
    Ok(architectures)
}

/// Files of an architecture with the given extension, sorted by path
fn files_with_extension(root: &Path, architecture: &str, extension: &str) -> Result<Vec<PathBuf>> {
    let dir = root.join(architecture);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(&dir).map_err(JobCreatorError::io_at(&dir))? {
        let path = entry.map_err(JobCreatorError::io_at(&dir))?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_stem(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .ok_or_else(|| JobCreatorError::schema(path.display().to_string(), "invalid file name"))
}

/// Hex-encoded SHA-256 of some content
pub fn sha256_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// A spack-based container definition
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerDefinition {
    pub name: String,
    pub architecture: String,
    pub path: PathBuf,
    /// SHA-256 of the definition file
    pub checksum: String,
    pub document: Value,
}

impl ContainerDefinition {
    pub fn load(path: &Path, architecture: &str) -> Result<Self> {
        let raw = std::fs::read(path).map_err(JobCreatorError::io_at(path))?;
        let document: Value = serde_yaml::from_slice(&raw)?;
        if document.get("spack").and_then(Value::as_mapping).is_none() {
            return Err(JobCreatorError::schema(
                format!("{}: spack", path.display()),
                "container definitions need a spack section",
            ));
        }

        Ok(ContainerDefinition {
            name: file_stem(path)?,
            architecture: architecture.to_string(),
            path: path.to_path_buf(),
            checksum: sha256_hex(&raw),
            document,
        })
    }

    /// Specs the container installs
    pub fn specs(&self) -> Result<Vec<String>> {
        let specs = self
            .document
            .get("spack")
            .and_then(|spack| spack.get("specs"))
            .and_then(Value::as_sequence)
            .ok_or_else(|| JobCreatorError::schema(format!("{}.spack.specs", self.name), "expected a list of specs"))?;

        specs
            .iter()
            .map(|spec| {
                spec.as_str().map(str::to_string).ok_or_else(|| {
                    JobCreatorError::schema(format!("{}.spack.specs", self.name), "specs must be strings")
                })
            })
            .collect()
    }

    /// Package restrictions (`spack.packages`), if any
    pub fn packages(&self) -> Option<&Value> {
        self.document.get("spack").and_then(|spack| spack.get("packages"))
    }

    /// `source:target` pairs copied into the container image
    pub fn files(&self) -> Vec<(String, String)> {
        self.document
            .get("spacktainer")
            .and_then(|section| section.get("files"))
            .and_then(Value::as_sequence)
            .map(|files| {
                files
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|pair| pair.split_once(':'))
                    .map(|(source, target)| (source.to_string(), target.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The first spec of the container, without variants
    pub fn main_spec(&self) -> Result<String> {
        let specs = self.specs()?;
        let first = specs
            .first()
            .ok_or_else(|| JobCreatorError::schema(format!("{}.spack.specs", self.name), "no specs"))?;
        Ok(first
            .split(|c: char| c == '~' || c == '+' || c.is_whitespace())
            .next()
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    /// Name of the main package
    pub fn main_package(&self) -> Result<String> {
        Ok(self.main_spec()?.split('@').next().unwrap_or_default().to_string())
    }

    /// Version pinned on the main spec, if any
    pub fn main_version(&self) -> Result<Option<String>> {
        Ok(self
            .main_spec()?
            .split_once('@')
            .map(|(_, version)| version.to_string())
            .filter(|version| !version.is_empty()))
    }
}

/// Spack-based container definitions of an architecture
pub fn read_definitions(root: &Path, architecture: &str) -> Result<Vec<ContainerDefinition>> {
    files_with_extension(root, architecture, "yaml")?
        .iter()
        .map(|path| {
            debug!("Reading file {}", path.display());
            ContainerDefinition::load(path, architecture)
        })
        .collect()
}

/// A singularity definition file converting an existing image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomDefinition {
    pub name: String,
    pub architecture: String,
    pub path: PathBuf,
    pub source_image: String,
    pub source_tag: String,
}

impl CustomDefinition {
    pub fn load(path: &Path, architecture: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(JobCreatorError::io_at(path))?;
        let from = content
            .lines()
            .find(|line| line.to_lowercase().starts_with("from:"))
            .ok_or_else(|| JobCreatorError::schema(path.display().to_string(), "missing From: line"))?;

        let mut parts = from.splitn(3, ':').map(str::trim).skip(1);
        let source_image = parts.next().unwrap_or_default().to_string();
        let source_tag = parts.next().unwrap_or("latest").to_string();
        if source_image.is_empty() {
            return Err(JobCreatorError::schema(path.display().to_string(), "empty source image"));
        }

        Ok(CustomDefinition {
            name: file_stem(path)?,
            architecture: architecture.to_string(),
            path: path.to_path_buf(),
            source_image,
            source_tag,
        })
    }
}

/// Custom container definitions of an architecture
pub fn read_custom_definitions(root: &Path, architecture: &str) -> Result<Vec<CustomDefinition>> {
    files_with_extension(root, architecture, "def")?
        .iter()
        .map(|path| CustomDefinition::load(path, architecture))
        .collect()
}

/// All specs and merged package restrictions of the definitions
pub fn collect_specs(definitions: &[ContainerDefinition]) -> Result<(Vec<String>, Value)> {
    let mut specs = Vec::new();
    let mut packages = Value::Mapping(Mapping::new());
    for definition in definitions {
        let found = definition.specs()?;
        debug!("Found specs: {:?}", found);
        specs.extend(found);
        if let Some(restrictions) = definition.packages() {
            merge_values(&mut packages, restrictions.clone())?;
        }
    }
    Ok((specs, packages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn definitions_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("amd64")).unwrap();
        fs::create_dir_all(dir.path().join("arm64")).unwrap();
        fs::write(
            dir.path().join("amd64/neurodamus.yaml"),
            "spack:\n  specs:\n    - neurodamus-neocortex@1.2.3+ngv\n    - py-neurodamus\n  packages:\n    all: {providers: {mpi: [mpich]}}\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("amd64/brayns.yaml"),
            "spack:\n  specs: [brayns]\n  packages:\n    all: {providers: {mpi: [mpich]}}\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("amd64/ubuntu.def"),
            "Bootstrap: docker\nFrom: ubuntu:22.04\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_discover_architectures() {
        let dir = definitions_dir();
        fs::write(dir.path().join("README.md"), "not an architecture").unwrap();
        assert_eq!(discover_architectures(dir.path()).unwrap(), vec!["amd64", "arm64"]);
    }

    #[test]
    fn test_read_definitions() {
        let dir = definitions_dir();
        let definitions = read_definitions(dir.path(), "amd64").unwrap();
        let names: Vec<&str> = definitions.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["brayns", "neurodamus"]);

        let neurodamus = &definitions[1];
        assert_eq!(neurodamus.main_package().unwrap(), "neurodamus-neocortex");
        assert_eq!(neurodamus.main_version().unwrap().as_deref(), Some("1.2.3"));
        assert_eq!(definitions[0].main_version().unwrap(), None);
        assert_eq!(neurodamus.checksum.len(), 64);

        assert!(read_definitions(dir.path(), "arm64").unwrap().is_empty());
        assert!(read_definitions(dir.path(), "riscv99").unwrap().is_empty());
    }

    #[test]
    fn test_checksum_is_sha256_of_file() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_custom_definition_source() {
        let dir = definitions_dir();
        let custom = read_custom_definitions(dir.path(), "amd64").unwrap();
        assert_eq!(custom.len(), 1);
        assert_eq!(custom[0].name, "ubuntu");
        assert_eq!(custom[0].source_image, "ubuntu");
        assert_eq!(custom[0].source_tag, "22.04");
    }

    #[test]
    fn test_collect_specs_merges_packages() {
        let dir = definitions_dir();
        let definitions = read_definitions(dir.path(), "amd64").unwrap();
        let (specs, packages) = collect_specs(&definitions).unwrap();
        assert_eq!(specs, vec!["brayns", "neurodamus-neocortex@1.2.3+ngv", "py-neurodamus"]);
        assert_eq!(
            packages["all"]["providers"]["mpi"],
            serde_yaml::from_str::<Value>("[mpich, mpich]").unwrap()
        );
    }
}
