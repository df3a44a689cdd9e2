//! Resource-definition validation: unique names, known methods, resolvable references.

use crate::config::ApiConfig;
use crate::error::ConfigError;
use crate::resource::Method;
use std::collections::HashSet;

pub fn validate(config: &ApiConfig) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for r in &config.resources {
        let name = r.effective_name();
        if !names.insert(name.clone()) {
            return Err(ConfigError::DuplicateResource(name));
        }
        for m in r.resource_methods.iter().chain(&r.item_methods) {
            if m.parse::<Method>().is_err() {
                return Err(ConfigError::InvalidMethod {
                    resource: name,
                    method: m.clone(),
                });
            }
        }
    }

    for r in &config.resources {
        for sub in &r.sub_resources {
            if !names.contains(&sub.resource.to_lowercase()) {
                return Err(ConfigError::UnknownRelationTarget {
                    resource: r.effective_name(),
                    target: sub.resource.clone(),
                });
            }
        }
    }
    Ok(())
}
