//! Collection endpoints: list, create and delete-all.

use crate::error::{AppError, ErrorDetail};
use crate::events::{DataAction, EventName, Level, Payload, Timing};
use crate::handlers::common::{json_body, now_stamp};
use crate::handlers::params::ListParams;
use crate::io::{Document, Query, Stage};
use crate::resource::{RegisteredResource, CREATED, UPDATED};
use crate::response::{page_links, Envelope, Link, Meta, PageRequest};
use crate::service::RequestValidator;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Where a listing is mounted, plus stages that scope it before filters apply.
pub(crate) struct Listing {
    pub path: String,
    pub title: String,
    pub parent: Link,
    pub scope: Vec<Stage>,
}

pub async fn list(
    state: AppState,
    resource: Arc<RegisteredResource>,
    raw: HashMap<String, String>,
) -> Result<Response, AppError> {
    let params = ListParams::parse(&state.settings, &resource, &raw)?;
    let listing = Listing {
        path: format!("/{}", resource.name()),
        title: resource.name().to_string(),
        parent: Link::new("/", "home"),
        scope: Vec::new(),
    };
    list_documents(&state, &resource, params, listing).await
}

/// Shared by collection and sub-resource listings.
pub(crate) async fn list_documents(
    state: &AppState,
    resource: &RegisteredResource,
    params: ListParams,
    listing: Listing,
) -> Result<Response, AppError> {
    let settings = &state.settings;
    let (skip, limit) = params.window(settings);

    let mut payload = Payload::Query(params.filter.clone());
    state
        .events
        .run(
            EventName::data(Timing::Before, DataAction::Fetch, Level::Resource),
            resource.name(),
            &mut payload,
        )
        .await?;
    let filter = payload.into_query()?;

    let mut pipeline = listing.scope;
    if !filter.is_empty() {
        pipeline.push(Stage::Match(filter));
    }
    for field in &params.embedded {
        let target = embed_target(state, resource, field)?;
        pipeline.push(Stage::lookup(target.clone(), field, field));
        let many = resource
            .response()
            .embed_target(field, &settings.query_embedded)
            .map(|e| e.many)
            .unwrap_or(false);
        if !many {
            pipeline.push(Stage::Unwind(field.clone()));
        }
    }

    let (items, total) = match as_plain_query(&pipeline) {
        Some(query) => state.data.find(resource, &query, skip, limit).await,
        None => state.data.aggregate(resource, &pipeline, skip, limit).await,
    }
    .map_err(AppError::from_data)?;
    tracing::debug!(resource = %resource.name(), total, returned = items.len(), "listed documents");

    let mut payload = Payload::Documents(items);
    state
        .events
        .run(
            EventName::data(Timing::After, DataAction::Fetch, Level::Resource),
            resource.name(),
            &mut payload,
        )
        .await?;
    let mut data = Vec::new();
    for doc in payload.into_documents()? {
        data.push(project_embedded(state, resource, &params.embedded, doc)?);
    }

    let meta = settings.pagination.then_some(Meta {
        page: params.page,
        max_results: params.max_results,
        total,
    });
    let links = settings.hateoas.then(|| {
        let req = PageRequest {
            path: &listing.path,
            title: &listing.title,
            parent: listing.parent.clone(),
            page: params.page,
            max_results: if settings.pagination { params.max_results } else { 0 },
        };
        page_links(settings, &req, total)
    });
    Ok(Envelope::page(data, meta, links).respond(settings, StatusCode::OK))
}

/// A pipeline of nothing but matches is a plain filter, as long as no two matches bind the
/// same field to different values. Those stay a pipeline so every match applies.
fn as_plain_query(pipeline: &[Stage]) -> Option<Query> {
    let mut query = Query::new();
    for stage in pipeline {
        let Stage::Match(q) = stage else {
            return None;
        };
        for (field, value) in q {
            match query.get(field) {
                Some(bound) if bound != value => return None,
                _ => {
                    query.insert(field.clone(), value.clone());
                }
            }
        }
    }
    Some(query)
}

fn embed_target<'a>(
    state: &'a AppState,
    resource: &RegisteredResource,
    field: &str,
) -> Result<&'a Arc<RegisteredResource>, AppError> {
    let embed = resource
        .response()
        .embed_target(field, &state.settings.query_embedded)
        .map_err(AppError::invalid)?;
    state
        .registry
        .get(&embed.resource)
        .ok_or_else(|| AppError::Hook(format!("relation target {} is not registered", embed.resource)))
}

/// Projects a document and any documents embedded in it with their own response models.
fn project_embedded(
    state: &AppState,
    resource: &RegisteredResource,
    embedded: &[String],
    doc: Document,
) -> Result<Document, AppError> {
    let mut out = resource.response().project(doc);
    for field in embedded {
        let target = embed_target(state, resource, field)?;
        if let Some(v) = out.get_mut(field) {
            let projected = match v.take() {
                Value::Object(d) => Value::Object(target.response().project(d)),
                Value::Array(items) => Value::Array(
                    items
                        .into_iter()
                        .map(|item| match item {
                            Value::Object(d) => Value::Object(target.response().project(d)),
                            other => other,
                        })
                        .collect(),
                ),
                other => other,
            };
            *v = projected;
        }
    }
    Ok(out)
}

pub async fn create(
    state: AppState,
    resource: Arc<RegisteredResource>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let body = json_body(body)?;
    let model = resource.descriptor().create_model();
    let docs = match body {
        Value::Array(items) if resource.descriptor().bulk_inserts() => {
            if items.is_empty() {
                return Err(AppError::invalid(ErrorDetail::new(
                    vec![json!("body")],
                    "ensure this value has at least 1 items",
                    "value_error.list.min_items",
                )));
            }
            let mut docs = Vec::with_capacity(items.len());
            let mut errors = Vec::new();
            for (i, item) in items.into_iter().enumerate() {
                let loc = [json!("body"), json!(i)];
                match RequestValidator::validate(item, model, state.data.as_ref(), &loc) {
                    Ok(doc) => docs.push(doc),
                    Err(mut e) => errors.append(&mut e),
                }
            }
            if !errors.is_empty() {
                return Err(AppError::Validation(errors));
            }
            docs
        }
        other => {
            let doc = RequestValidator::validate(other, model, state.data.as_ref(), &[json!("body")])
                .map_err(AppError::Validation)?;
            vec![doc]
        }
    };

    let created = insert_documents(&state, &resource, docs).await?;
    let data = created
        .into_iter()
        .map(|d| resource.response().project(d))
        .collect();
    Ok(Envelope::created(data).respond(&state.settings, StatusCode::CREATED))
}

/// Stamps, fires the create events and writes. Returns the stored documents.
pub(crate) async fn insert_documents(
    state: &AppState,
    resource: &RegisteredResource,
    mut docs: Vec<Document>,
) -> Result<Vec<Document>, AppError> {
    let now = now_stamp();
    for doc in &mut docs {
        doc.insert(CREATED.to_string(), now.clone());
        doc.insert(UPDATED.to_string(), now.clone());
    }

    let mut payload = Payload::Documents(docs);
    state
        .events
        .run(
            EventName::data(Timing::Before, DataAction::Create, Level::Items),
            resource.name(),
            &mut payload,
        )
        .await?;
    let docs = payload.into_documents()?;

    let created = if docs.len() > 1 {
        state.data.create_many(resource, docs).await?
    } else {
        let mut created = Vec::new();
        for doc in docs {
            created.push(state.data.create(resource, doc).await?);
        }
        created
    };
    tracing::info!(resource = %resource.name(), count = created.len(), "created documents");

    let mut payload = Payload::Documents(created);
    state
        .events
        .run(
            EventName::data(Timing::After, DataAction::Create, Level::Items),
            resource.name(),
            &mut payload,
        )
        .await?;
    payload.into_documents()
}

pub async fn delete_all(state: AppState, resource: Arc<RegisteredResource>) -> Result<Response, AppError> {
    let mut payload = Payload::Empty;
    state
        .events
        .run(
            EventName::data(Timing::Before, DataAction::Delete, Level::Resource),
            resource.name(),
            &mut payload,
        )
        .await?;
    state.data.remove(&resource).await?;
    tracing::info!(resource = %resource.name(), "deleted collection");
    state
        .events
        .run(
            EventName::data(Timing::After, DataAction::Delete, Level::Resource),
            resource.name(),
            &mut payload,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matching(v: Value) -> Stage {
        Stage::Match(v.as_object().cloned().unwrap())
    }

    #[test]
    fn matches_merge_into_one_filter() {
        let pipeline = [matching(json!({"country_id": "a"})), matching(json!({"name": "Lima"}))];
        assert_eq!(
            as_plain_query(&pipeline),
            json!({"country_id": "a", "name": "Lima"}).as_object().cloned()
        );
    }

    #[test]
    fn conflicting_matches_stay_a_pipeline() {
        let pipeline = [matching(json!({"country_id": "a"})), matching(json!({"country_id": "b"}))];
        assert_eq!(as_plain_query(&pipeline), None);
        let pipeline = [matching(json!({"country_id": "a"})), matching(json!({"country_id": "a"}))];
        assert!(as_plain_query(&pipeline).is_some());
    }
}
