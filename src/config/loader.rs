//! Load resource definitions from JSON.

use crate::config::types::{ApiConfig, ResourceConfig};
use crate::config::validate;
use crate::error::ConfigError;
use crate::resource::{Method, Resource, SubResource};
use std::path::Path;

/// Build resources from a parsed config (validates first).
pub fn resolve(config: &ApiConfig) -> Result<Vec<Resource>, ConfigError> {
    validate(config)?;
    config.resources.iter().map(resolve_resource).collect()
}

fn resolve_resource(rc: &ResourceConfig) -> Result<Resource, ConfigError> {
    let name = rc.effective_name();
    let methods = |names: &[String]| -> Result<Vec<Method>, ConfigError> {
        names
            .iter()
            .map(|m| {
                m.parse().map_err(|_| ConfigError::InvalidMethod {
                    resource: name.clone(),
                    method: m.clone(),
                })
            })
            .collect()
    };

    let mut builder = Resource::builder(rc.model.clone())
        .name(name.clone())
        .resource_methods(methods(&rc.resource_methods)?)
        .item_methods(methods(&rc.item_methods)?)
        .bulk_inserts(rc.bulk_inserts)
        .allowed_filters(rc.allowed_filters)
        .embedding(rc.embedding);
    if let Some(item_name) = &rc.item_name {
        builder = builder.item_name(item_name.clone());
    }
    if let Some(m) = &rc.response_model {
        builder = builder.response_model(m.clone());
    }
    if let Some(m) = &rc.create_model {
        builder = builder.create_model(m.clone());
    }
    if let Some(m) = &rc.update_model {
        builder = builder.update_model(m.clone());
    }
    if let Some(alt) = &rc.alt_id {
        builder = builder.alt_id(alt.clone());
    }
    for sub in &rc.sub_resources {
        let mut s = SubResource::new(sub.resource.clone(), sub.id_field.clone());
        if let Some(n) = &sub.name {
            s = s.name(n.clone());
        }
        builder = builder.sub_resource(s);
    }
    builder.build()
}

/// Parse and resolve a JSON document of the form `{"resources": [...]}`.
pub fn parse_resources(json: &str) -> Result<Vec<Resource>, ConfigError> {
    let config: ApiConfig = serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))?;
    resolve(&config)
}

/// Read, parse and resolve a resource-definition file.
pub fn load_resources(path: impl AsRef<Path>) -> Result<Vec<Resource>, ConfigError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    parse_resources(&json)
}
