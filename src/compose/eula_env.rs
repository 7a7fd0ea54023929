//! Pre-accepting the license through the compose service environment.

use super::definition::{find_service_key, load_compose};
use crate::eula::EULA_ENVIRONMENT_VARIABLES;
use crate::error::{Error, Result};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;

/// Add any missing acceptance variables to the `environment` of the service
/// running `container`. Both the list (`- KEY=value`) and mapping forms are
/// kept in their existing shape. Returns whether the file was rewritten.
///
/// The file is re-serialized, so comments are not preserved.
pub fn ensure_compose_accepts_eula(compose_file: &Path, container: &str) -> Result<bool> {
    let mut document = load_compose(compose_file)?;
    let key = find_service_key(&document, container).ok_or_else(|| {
        Error::Compose(format!(
            "no service for container '{}' in {}",
            container,
            compose_file.display()
        ))
    })?;
    let service = document
        .get_mut("services")
        .and_then(|services| services.get_mut(&key))
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| {
            Error::Compose(format!(
                "service for '{}' in {} is not a mapping",
                container,
                compose_file.display()
            ))
        })?;

    if !add_missing_variables(service) {
        return Ok(false);
    }

    fs::write(compose_file, serde_yaml::to_string(&document)?)?;
    tracing::info!(
        "Updated compose file {} to include Vertica EULA acceptance variables",
        compose_file.display()
    );
    Ok(true)
}

fn add_missing_variables(service: &mut Mapping) -> bool {
    let env_key = Value::String("environment".to_string());
    let environment = service
        .entry(env_key)
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if environment.is_null() {
        *environment = Value::Mapping(Mapping::new());
    }

    match environment {
        Value::Sequence(entries) => {
            let present: Vec<String> = entries
                .iter()
                .filter_map(Value::as_str)
                .map(|entry| entry.split('=').next().unwrap_or("").trim().to_string())
                .collect();
            let mut changed = false;
            for (name, value) in EULA_ENVIRONMENT_VARIABLES {
                if !present.iter().any(|p| p == name) {
                    entries.push(Value::String(format!("{}={}", name, value)));
                    changed = true;
                }
            }
            changed
        }
        Value::Mapping(map) => {
            let mut changed = false;
            for (name, value) in EULA_ENVIRONMENT_VARIABLES {
                let key = Value::String(name.to_string());
                if !map.contains_key(&key) {
                    map.insert(key, Value::String(value.to_string()));
                    changed = true;
                }
            }
            changed
        }
        other => {
            tracing::warn!("Unsupported compose environment form: {:?}", other);
            false
        }
    }
}
