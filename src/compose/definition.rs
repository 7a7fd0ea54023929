//! Read-only view of a compose file.

use crate::error::Result;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;

pub fn load_compose(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Key of the service that runs `container`: a service named after it, or
/// one whose `container_name` matches.
pub fn find_service_key(document: &Value, container: &str) -> Option<Value> {
    let services = document.get("services")?.as_mapping()?;
    let name = Value::String(container.to_string());
    if services.contains_key(&name) {
        return Some(name);
    }
    services
        .iter()
        .find(|(_, service)| {
            service
                .get("container_name")
                .and_then(Value::as_str)
                .is_some_and(|n| n == container)
        })
        .map(|(key, _)| key.clone())
}

pub fn find_service<'a>(document: &'a Value, container: &str) -> Option<&'a Mapping> {
    let key = find_service_key(document, container)?;
    document.get("services")?.get(&key)?.as_mapping()
}

/// `image:` of the service running `container`.
pub fn service_image(compose_file: &Path, container: &str) -> Option<String> {
    let document = match load_compose(compose_file) {
        Ok(document) => document,
        Err(e) => {
            tracing::debug!("Unable to read image from {}: {}", compose_file.display(), e);
            return None;
        }
    };
    find_service(&document, container)?
        .get("image")?
        .as_str()
        .map(str::trim)
        .filter(|image| !image.is_empty())
        .map(str::to_string)
}
