//! Registration: validates relations, synthesizes the response model and fixes the
//! primary-key field for each resource before any route is built.

use crate::error::{ConfigError, ErrorDetail};
use crate::io::{DataLayer, Document};
use crate::resource::descriptor::{Resource, SubResource};
use crate::resource::model::Model;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const CREATED: &str = "_created";
pub const UPDATED: &str = "_updated";

/// How a relation field can be expanded in responses.
#[derive(Clone, Debug, PartialEq)]
pub struct Embed {
    pub resource: String,
    pub many: bool,
    pub embeddable: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResponseField {
    pub name: String,
    /// Relation fields carry either the foreign key or the embedded document.
    pub embed: Option<Embed>,
}

/// Response shape derived from a resource's response model: declared fields plus the
/// primary key and write timestamps.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseModel {
    id_field: String,
    fields: Vec<ResponseField>,
}

impl ResponseModel {
    pub fn synthesize(model: &Model, id_field: &str) -> Result<Self, ConfigError> {
        check_relations(model)?;
        let fields = model
            .fields
            .iter()
            .map(|f| ResponseField {
                name: f.name.clone(),
                embed: f.data_relation.as_ref().map(|rel| Embed {
                    resource: rel.resource.clone(),
                    many: f.ty.is_list(),
                    embeddable: rel.embeddable,
                }),
            })
            .collect();
        Ok(ResponseModel {
            id_field: id_field.to_string(),
            fields,
        })
    }

    pub fn fields(&self) -> &[ResponseField] {
        &self.fields
    }

    /// Keeps only the fields a client may see.
    pub fn project(&self, mut doc: Document) -> Document {
        let mut out = Document::new();
        for key in [self.id_field.as_str(), CREATED, UPDATED] {
            if let Some(v) = doc.remove(key) {
                out.insert(key.to_string(), v);
            }
        }
        for f in &self.fields {
            if let Some(v) = doc.remove(&f.name) {
                out.insert(f.name.clone(), v);
            }
        }
        out
    }

    /// The relation behind `field`, or the 422 detail explaining why it cannot be embedded.
    pub fn embed_target(&self, field: &str, param: &str) -> Result<&Embed, ErrorDetail> {
        let f = self.fields.iter().find(|f| f.name == field).ok_or_else(|| {
            ErrorDetail::query(
                param,
                format!("field '{}' is not valid", field),
                "value_error.not_valid",
            )
        })?;
        match &f.embed {
            Some(embed) if embed.embeddable => Ok(embed),
            _ => Err(ErrorDetail::query(
                param,
                format!("field '{}' is not a embedable", field),
                "value_error.not_embedable",
            )),
        }
    }
}

fn check_relations(model: &Model) -> Result<(), ConfigError> {
    for (field, _) in model.relations() {
        if !field.ty.is_relation_type() {
            return Err(ConfigError::InvalidRelation {
                model: model.name.clone(),
                field: field.name.clone(),
            });
        }
    }
    Ok(())
}

fn check_patterns(model: &Model) -> Result<(), ConfigError> {
    for field in &model.fields {
        if let Some(err) = field.rules.pattern.as_ref().and_then(|p| p.error()) {
            return Err(ConfigError::Validation(format!(
                "model {}: field '{}' has an invalid pattern: {}",
                model.name, field.name, err
            )));
        }
    }
    Ok(())
}

/// A resource after registration.
#[derive(Debug)]
pub struct RegisteredResource {
    descriptor: Resource,
    id_field: String,
    response: ResponseModel,
}

impl RegisteredResource {
    pub fn register(descriptor: Resource, data: &dyn DataLayer) -> Result<Self, ConfigError> {
        check_relations(descriptor.model())?;
        check_relations(descriptor.create_model())?;
        for model in [
            descriptor.model(),
            descriptor.create_model(),
            descriptor.update_model(),
            descriptor.response_model(),
        ] {
            check_patterns(model)?;
        }
        let id_field = data.primary_key(descriptor.model());
        let response = ResponseModel::synthesize(descriptor.response_model(), &id_field)?;
        Ok(RegisteredResource {
            descriptor,
            id_field,
            response,
        })
    }

    pub fn descriptor(&self) -> &Resource {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn item_name(&self) -> &str {
        self.descriptor.item_name()
    }

    pub fn model(&self) -> &Model {
        self.descriptor.model()
    }

    pub fn alt_id(&self) -> Option<&str> {
        self.descriptor.alt_id()
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn response(&self) -> &ResponseModel {
        &self.response
    }

    pub fn sub_resource(&self, name: &str) -> Option<&SubResource> {
        self.descriptor.sub_resources().iter().find(|s| s.name == name)
    }

    /// Path parameter name for item routes, e.g. `person_id`.
    pub fn item_param(&self) -> String {
        format!("{}_id", self.item_name())
    }

    /// Whether `field` may appear in a filter on this resource.
    pub fn filterable(&self, field: &str) -> bool {
        field == self.id_field || self.model().get(field).is_some()
    }

    /// Returns a copy of the id value held by `doc`, if any.
    pub fn id_of(&self, doc: &Document) -> Option<Value> {
        doc.get(&self.id_field).cloned()
    }
}

/// All registered resources, by name and in declaration order.
#[derive(Debug, Default)]
pub struct Registry {
    ordered: Vec<Arc<RegisteredResource>>,
    by_name: HashMap<String, Arc<RegisteredResource>>,
}

impl Registry {
    pub fn build(resources: Vec<Resource>, data: &dyn DataLayer) -> Result<Self, ConfigError> {
        let mut names = HashSet::new();
        for r in &resources {
            if !names.insert(r.name().to_string()) {
                return Err(ConfigError::DuplicateResource(r.name().to_string()));
            }
        }
        let by_model: HashMap<&str, &Resource> = resources.iter().map(|r| (r.name(), r)).collect();
        for r in &resources {
            for model in [r.model(), r.response_model(), r.create_model()] {
                for (_, rel) in model.relations() {
                    if !names.contains(&rel.resource) {
                        return Err(ConfigError::UnknownRelationTarget {
                            resource: r.name().to_string(),
                            target: rel.resource.clone(),
                        });
                    }
                }
            }
            for sub in r.sub_resources() {
                let child = by_model.get(sub.resource.as_str()).ok_or_else(|| {
                    ConfigError::UnknownRelationTarget {
                        resource: r.name().to_string(),
                        target: sub.resource.clone(),
                    }
                })?;
                if child.model().get(&sub.id_field).is_none() {
                    return Err(ConfigError::Validation(format!(
                        "sub-resource {}: '{}' is not a field of {}",
                        sub.name,
                        sub.id_field,
                        child.name()
                    )));
                }
            }
        }

        let mut registry = Registry::default();
        for r in resources {
            let registered = Arc::new(RegisteredResource::register(r, data)?);
            tracing::info!(
                resource = %registered.name(),
                id_field = %registered.id_field(),
                "registered resource"
            );
            registry
                .by_name
                .insert(registered.name().to_string(), registered.clone());
            registry.ordered.push(registered);
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<RegisteredResource>> {
        self.by_name.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<RegisteredResource>> {
        self.ordered.iter()
    }

    pub fn as_slice(&self) -> &[Arc<RegisteredResource>] {
        &self.ordered
    }
}
