//! CI variables
//!
//! GitLab treats every variable value as a string. Documents coming from
//! spack or from hand-written YAML may carry numbers or booleans, so values
//! are normalized to strings on the way in.

use crate::error::{JobCreatorError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use serde_yaml::Value;

/// Ordered variable mapping
pub type Variables = IndexMap<String, String>;

/// Render a scalar YAML value as a variable string
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

/// Convert a YAML mapping into variables, rejecting nested values
pub fn variables_from_value(key: &str, value: &Value) -> Result<Variables> {
    let mapping = match value {
        Value::Mapping(mapping) => mapping,
        Value::Null => return Ok(Variables::new()),
        _ => return Err(JobCreatorError::schema(key, "expected a mapping of variables")),
    };

    let mut variables = Variables::with_capacity(mapping.len());
    for (name, value) in mapping {
        let name = scalar_to_string(name)
            .ok_or_else(|| JobCreatorError::schema(key, "variable names must be scalars"))?;
        let rendered = scalar_to_string(value).ok_or_else(|| {
            JobCreatorError::schema(format!("{}.{}", key, name), "variable values must be scalars")
        })?;
        variables.insert(name, rendered);
    }
    Ok(variables)
}

/// Serde helper for `#[serde(deserialize_with = ...)]` on variable maps
pub fn deserialize_variables<'de, D>(deserializer: D) -> std::result::Result<Variables, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    variables_from_value("variables", &value).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_become_strings() {
        let value: Value = serde_yaml::from_str("{A: 1, B: true, C: text, D: ~}").unwrap();
        let variables = variables_from_value("variables", &value).unwrap();
        assert_eq!(variables["A"], "1");
        assert_eq!(variables["B"], "true");
        assert_eq!(variables["C"], "text");
        assert_eq!(variables["D"], "");
        assert_eq!(variables.keys().collect::<Vec<_>>(), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_nested_value_rejected() {
        let value: Value = serde_yaml::from_str("{A: [1, 2]}").unwrap();
        let err = variables_from_value("variables", &value).unwrap_err();
        assert!(err.to_string().contains("variables.A"));
    }

    #[test]
    fn test_non_mapping_rejected() {
        let value: Value = serde_yaml::from_str("[1, 2]").unwrap();
        assert!(variables_from_value("variables", &value).is_err());
    }
}
