//! Resource descriptors: what a collection exposes and how it is addressed.

use crate::error::ConfigError;
use crate::resource::model::Model;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub const ALL: [Method; 6] = [
        Method::Get,
        Method::Head,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    pub fn from_http(method: &axum::http::Method) -> Option<Method> {
        method.as_str().parse().ok()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            other => Err(other.to_string()),
        }
    }
}

const COLLECTION_METHODS: [Method; 4] = [Method::Get, Method::Post, Method::Delete, Method::Head];
const ITEM_METHODS: [Method; 5] = [Method::Get, Method::Head, Method::Put, Method::Patch, Method::Delete];

/// Nested read-only listing of `resource` scoped by `id_field` equal to the parent's id.
#[derive(Clone, Debug, PartialEq)]
pub struct SubResource {
    pub resource: String,
    pub id_field: String,
    pub name: String,
}

impl SubResource {
    /// Name defaults to the child resource's name.
    pub fn new(resource: impl Into<String>, id_field: impl Into<String>) -> Self {
        let resource = resource.into().to_lowercase();
        SubResource {
            name: resource.clone(),
            resource,
            id_field: id_field.into(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Immutable declaration of one collection. Built with [`Resource::builder`].
#[derive(Clone, Debug)]
pub struct Resource {
    name: String,
    item_name: String,
    model: Model,
    response_model: Model,
    create_model: Model,
    update_model: Model,
    resource_methods: Vec<Method>,
    item_methods: Vec<Method>,
    alt_id: Option<String>,
    sub_resources: Vec<SubResource>,
    bulk_inserts: bool,
    allowed_filters: bool,
    embedding: bool,
}

impl Resource {
    pub fn builder(model: Model) -> ResourceBuilder {
        ResourceBuilder::new(model)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn item_name(&self) -> &str {
        &self.item_name
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn response_model(&self) -> &Model {
        &self.response_model
    }

    pub fn create_model(&self) -> &Model {
        &self.create_model
    }

    /// Every field optional; PATCH bodies are checked against this.
    pub fn update_model(&self) -> &Model {
        &self.update_model
    }

    pub fn resource_methods(&self) -> &[Method] {
        &self.resource_methods
    }

    pub fn item_methods(&self) -> &[Method] {
        &self.item_methods
    }

    pub fn alt_id(&self) -> Option<&str> {
        self.alt_id.as_deref()
    }

    pub fn sub_resources(&self) -> &[SubResource] {
        &self.sub_resources
    }

    pub fn bulk_inserts(&self) -> bool {
        self.bulk_inserts
    }

    pub fn allowed_filters(&self) -> bool {
        self.allowed_filters
    }

    pub fn embedding(&self) -> bool {
        self.embedding
    }

    /// A HEAD request is served wherever GET is declared.
    pub fn serves(&self, method: Method) -> bool {
        let declared = |m: Method| self.resource_methods.contains(&m) || self.item_methods.contains(&m);
        declared(method) || (method == Method::Head && declared(Method::Get))
    }
}

pub struct ResourceBuilder {
    model: Model,
    name: Option<String>,
    item_name: Option<String>,
    response_model: Option<Model>,
    create_model: Option<Model>,
    update_model: Option<Model>,
    resource_methods: Vec<Method>,
    item_methods: Vec<Method>,
    alt_id: Option<String>,
    sub_resources: Vec<SubResource>,
    bulk_inserts: bool,
    allowed_filters: bool,
    embedding: bool,
}

impl ResourceBuilder {
    fn new(model: Model) -> Self {
        ResourceBuilder {
            model,
            name: None,
            item_name: None,
            response_model: None,
            create_model: None,
            update_model: None,
            resource_methods: vec![Method::Get],
            item_methods: vec![Method::Get],
            alt_id: None,
            sub_resources: Vec::new(),
            bulk_inserts: true,
            allowed_filters: true,
            embedding: true,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn item_name(mut self, item_name: impl Into<String>) -> Self {
        self.item_name = Some(item_name.into());
        self
    }

    pub fn response_model(mut self, model: Model) -> Self {
        self.response_model = Some(model);
        self
    }

    pub fn create_model(mut self, model: Model) -> Self {
        self.create_model = Some(model);
        self
    }

    pub fn update_model(mut self, model: Model) -> Self {
        self.update_model = Some(model);
        self
    }

    pub fn resource_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.resource_methods = methods.into_iter().collect();
        self
    }

    pub fn item_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.item_methods = methods.into_iter().collect();
        self
    }

    pub fn alt_id(mut self, field: impl Into<String>) -> Self {
        self.alt_id = Some(field.into());
        self
    }

    pub fn sub_resource(mut self, sub: SubResource) -> Self {
        self.sub_resources.push(sub);
        self
    }

    pub fn bulk_inserts(mut self, enabled: bool) -> Self {
        self.bulk_inserts = enabled;
        self
    }

    pub fn allowed_filters(mut self, enabled: bool) -> Self {
        self.allowed_filters = enabled;
        self
    }

    pub fn embedding(mut self, enabled: bool) -> Self {
        self.embedding = enabled;
        self
    }

    /// Derives the name (lowercased model name) and item name (one trailing "s"
    /// stripped) once, and defaults every model variant to the base model.
    pub fn build(self) -> Result<Resource, ConfigError> {
        let name = self
            .name
            .unwrap_or_else(|| self.model.name.clone())
            .to_lowercase();
        if name.is_empty() {
            return Err(ConfigError::Validation("resource name must not be empty".into()));
        }
        let item_name = self.item_name.unwrap_or_else(|| singular(&name));

        for m in &self.resource_methods {
            if !COLLECTION_METHODS.contains(m) {
                return Err(ConfigError::InvalidMethod {
                    resource: name,
                    method: m.to_string(),
                });
            }
        }
        for m in &self.item_methods {
            if !ITEM_METHODS.contains(m) {
                return Err(ConfigError::InvalidMethod {
                    resource: name,
                    method: m.to_string(),
                });
            }
        }

        if let Some(alt) = &self.alt_id {
            if self.model.get(alt).is_none() {
                return Err(ConfigError::Validation(format!(
                    "resource {}: alt_id '{}' is not a field of {}",
                    name, alt, self.model.name
                )));
            }
        }

        let response_model = self.response_model.unwrap_or_else(|| self.model.clone());
        let create_model = self.create_model.unwrap_or_else(|| self.model.clone());
        let update_model = self
            .update_model
            .unwrap_or_else(|| self.model.clone())
            .optional();

        Ok(Resource {
            name,
            item_name,
            model: self.model,
            response_model,
            create_model,
            update_model,
            resource_methods: dedup(self.resource_methods),
            item_methods: dedup(self.item_methods),
            alt_id: self.alt_id,
            sub_resources: self.sub_resources,
            bulk_inserts: self.bulk_inserts,
            allowed_filters: self.allowed_filters,
            embedding: self.embedding,
        })
    }
}

fn singular(name: &str) -> String {
    name.strip_suffix('s').unwrap_or(name).to_string()
}

fn dedup(methods: Vec<Method>) -> Vec<Method> {
    let mut out: Vec<Method> = Vec::with_capacity(methods.len());
    for m in methods {
        if !out.contains(&m) {
            out.push(m);
        }
    }
    out
}
