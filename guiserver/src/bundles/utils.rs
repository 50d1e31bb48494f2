//! Bundle parsing and preparation helpers

use std::collections::BTreeMap;

use crate::bundles::models::{Bundle, Constraints};

/// Constraint keys understood by the environment
pub const SUPPORTED_CONSTRAINTS: &[&str] = &[
    "arch",
    "container",
    "cpu-cores",
    "cpu-power",
    "mem",
    "root-disk",
    "tags",
];

/// Parse a YAML document of named bundles and pick the one to deploy.
///
/// Without a name, the document must contain exactly one bundle.
pub fn select_bundle(contents: &str, name: Option<&str>) -> Result<(String, Bundle), String> {
    let mut bundles: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(contents)
        .map_err(|e| format!("the provided YAML is not valid: {}", e))?;

    let (name, data) = match name {
        Some(name) => {
            let data = bundles
                .remove(name)
                .ok_or_else(|| format!("bundle {} not found", name))?;
            (name.to_string(), data)
        }
        None => match bundles.len() {
            0 => return Err("no bundles found".to_string()),
            1 => bundles
                .pop_first()
                .ok_or_else(|| "no bundles found".to_string())?,
            _ => return Err("multiple bundles found, but no bundle name specified".to_string()),
        },
    };

    let bundle = serde_yaml::from_value(data)
        .map_err(|e| format!("the bundle data is not well formed: {}", e))?;
    Ok((name, bundle))
}

/// Normalize the bundle in place before validation
pub fn prepare_bundle(bundle: &mut Bundle) -> Result<(), String> {
    for service in bundle.services.values_mut() {
        if let Some(constraints) = &service.constraints {
            let parsed = parse_constraints(constraints)?;
            service.constraints = Some(Constraints::Map(
                parsed
                    .into_iter()
                    .map(|(key, value)| (key, serde_yaml::Value::String(value)))
                    .collect(),
            ));
        }
    }
    Ok(())
}

/// Turn constraints into a mapping, rejecting unsupported keys
pub fn parse_constraints(constraints: &Constraints) -> Result<BTreeMap<String, String>, String> {
    let parsed = match constraints {
        Constraints::Map(map) => map
            .iter()
            .map(|(key, value)| Ok((key.clone(), scalar_to_string(key, value)?)))
            .collect::<Result<BTreeMap<_, _>, String>>()?,
        Constraints::Text(text) => text
            .split(',')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    Ok((key.trim().to_string(), value.trim().to_string()))
                }
                _ => Err(format!("invalid constraints: {}", text)),
            })
            .collect::<Result<BTreeMap<_, _>, String>>()?,
    };

    let unsupported: Vec<&str> = parsed
        .keys()
        .map(String::as_str)
        .filter(|key| !SUPPORTED_CONSTRAINTS.contains(key))
        .collect();
    if !unsupported.is_empty() {
        return Err(format!("unsupported constraints: {}", unsupported.join(", ")));
    }
    Ok(parsed)
}

fn scalar_to_string(key: &str, value: &serde_yaml::Value) -> Result<String, String> {
    match value {
        serde_yaml::Value::String(value) => Ok(value.clone()),
        serde_yaml::Value::Number(value) => Ok(value.to_string()),
        serde_yaml::Value::Bool(value) => Ok(value.to_string()),
        _ => Err(format!("invalid constraints: {} is not a scalar value", key)),
    }
}
