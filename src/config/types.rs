//! Raw resource-definition types matching the JSON file format.

use crate::resource::Model;
use serde::{Deserialize, Serialize};

fn default_methods() -> Vec<String> {
    vec!["GET".into()]
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubResourceConfig {
    pub resource: String,
    pub id_field: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub model: Model,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub item_name: Option<String>,
    /// Method names; validated when resolved so a typo is a config error, not a parse error.
    #[serde(default = "default_methods")]
    pub resource_methods: Vec<String>,
    #[serde(default = "default_methods")]
    pub item_methods: Vec<String>,
    #[serde(default)]
    pub response_model: Option<Model>,
    #[serde(default)]
    pub create_model: Option<Model>,
    #[serde(default)]
    pub update_model: Option<Model>,
    #[serde(default)]
    pub alt_id: Option<String>,
    #[serde(default)]
    pub sub_resources: Vec<SubResourceConfig>,
    #[serde(default = "default_true")]
    pub bulk_inserts: bool,
    #[serde(default = "default_true")]
    pub allowed_filters: bool,
    #[serde(default = "default_true")]
    pub embedding: bool,
}

impl ResourceConfig {
    /// Name the resource will be registered under.
    pub fn effective_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.model.name.clone())
            .to_lowercase()
    }
}

/// Top level of a resource-definition file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}
