//! Spack environment files
//!
//! The repository's `spack.yaml` is the template every environment starts
//! from: the build cache population job gets one environment holding all
//! specs of an architecture, each container gets its own.

use crate::core::document::merge_values;
use crate::core::{ArchitectureConfig, Image};
use crate::error::{JobCreatorError, Result};
use crate::generate::definitions::{collect_specs, ContainerDefinition};
use serde_yaml::{Mapping, Value};

/// Default location of the spack environment template
pub const SPACK_TEMPLATE: &str = "spack.yaml";

/// Placeholder in package requirements replaced by the architecture's base arch
pub const BASE_ARCH_PLACEHOLDER: &str = "%BASE_ARCH%";

/// Walk down nested mappings
fn section<'v>(value: &'v mut Value, path: &[&str]) -> Result<&'v mut Value> {
    let mut current = value;
    for (depth, key) in path.iter().enumerate() {
        current = current
            .get_mut(*key)
            .ok_or_else(|| JobCreatorError::schema(path[..=depth].join("."), "missing section"))?;
    }
    Ok(current)
}

fn mapping_mut<'v>(value: &'v mut Value, path: &[&str]) -> Result<&'v mut Mapping> {
    section(value, path)?
        .as_mapping_mut()
        .ok_or_else(|| JobCreatorError::schema(path.join("."), "expected a mapping"))
}

fn strings(items: &[&str]) -> Value {
    Value::Sequence(items.iter().map(|item| Value::from(*item)).collect())
}

/// Template for a single container: installed to `/opt/software` with a view
/// in `/opt/view`, without the template's own specs
pub fn container_template(template: &Value) -> Result<Value> {
    let mut spack = template.clone();
    mapping_mut(&mut spack, &["spack", "config"])?
        .insert(Value::from("install_tree"), Value::from("/opt/software"));
    let root = mapping_mut(&mut spack, &["spack"])?;
    root.insert(Value::from("view"), Value::from("/opt/view"));
    root.remove("specs");
    Ok(spack)
}

/// Environment of one container: the container template merged with the
/// `spack` section of the container definition
pub fn container_environment(template: &Value, definition: &ContainerDefinition) -> Result<Value> {
    let mut spack = container_template(template)?;
    let mut overlay = Mapping::new();
    if let Some(section) = definition.document.get("spack") {
        overlay.insert(Value::from("spack"), section.clone());
    }
    merge_values(&mut spack, Value::Mapping(overlay))?;
    Ok(spack)
}

/// Environment used to populate the build cache of an architecture: every
/// spec of every container, with the runners and mirror of the architecture
pub fn build_cache_environment(
    template: &Value,
    definitions: &[ContainerDefinition],
    config: &ArchitectureConfig,
    builder_image: &Image,
) -> Result<Value> {
    let (specs, packages) = collect_specs(definitions)?;
    let mut spack = template.clone();

    mapping_mut(&mut spack, &["spack"])?.insert(
        Value::from("specs"),
        Value::Sequence(specs.into_iter().map(Value::from).collect()),
    );
    let mut restrictions = Mapping::new();
    restrictions.insert(Value::from("packages"), packages);
    let mut overlay = Mapping::new();
    overlay.insert(Value::from("spack"), Value::Mapping(restrictions));
    merge_values(&mut spack, Value::Mapping(overlay))?;

    let tags = strings(&[config.tag.as_str()]);
    let base_arch = config.base_arch.clone().unwrap_or_default();
    let image = serde_yaml::to_value(builder_image)?;
    let mut runner_image = image.clone();
    if let Value::Mapping(runner_image) = &mut runner_image {
        runner_image.insert(Value::from("entrypoint"), strings(&[""]));
    }

    let ci = mapping_mut(&mut spack, &["spack", "gitlab-ci"])?;
    ci.insert(Value::from("tags"), tags.clone());

    let mappings = ci
        .get_mut("mappings")
        .and_then(Value::as_sequence_mut)
        .ok_or_else(|| JobCreatorError::schema("spack.gitlab-ci.mappings", "expected a list"))?;
    let mapping = mappings
        .iter_mut()
        .filter_map(Value::as_mapping_mut)
        .find(|mapping| mapping.contains_key("runner-attributes"))
        .ok_or_else(|| {
            JobCreatorError::schema("spack.gitlab-ci.mappings", "no mapping with runner-attributes")
        })?;
    mapping.insert(Value::from("match"), strings(&[base_arch.as_str()]));
    let runner = mapping
        .get_mut("runner-attributes")
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| {
            JobCreatorError::schema("spack.gitlab-ci.mappings.runner-attributes", "expected a mapping")
        })?;
    runner.insert(Value::from("tags"), tags.clone());
    runner.insert(Value::from("image"), runner_image);

    let service = mapping_mut(&mut spack, &["spack", "gitlab-ci", "service-job-attributes"])?;
    service.insert(Value::from("image"), image);
    service.insert(Value::from("tags"), tags);

    mapping_mut(&mut spack, &["spack", "mirrors"])?.insert(
        Value::from("bbpS3_upload"),
        Value::from(format!("s3://{}", config.cache_bucket.name)),
    );

    if let Ok(packages) = mapping_mut(&mut spack, &["spack", "packages"]) {
        for (_, package) in packages.iter_mut() {
            if let Some(package) = package.as_mapping_mut() {
                if package.get("require").and_then(Value::as_str) == Some(BASE_ARCH_PLACEHOLDER) {
                    package.insert(Value::from("require"), Value::from(base_arch.as_str()));
                }
            }
        }
    }

    Ok(spack)
}
