//! Item endpoints addressed by primary key or alternate id.

use crate::error::AppError;
use crate::events::{DataAction, EventName, Level, Payload, Timing};
use crate::handlers::collection::insert_documents;
use crate::handlers::common::{json_body, now_stamp, resolve_item_key, ItemKey};
use crate::io::Document;
use crate::resource::{RegisteredResource, CREATED, UPDATED};
use crate::response::{item_links, Envelope};
use crate::service::RequestValidator;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

async fn fire(
    state: &AppState,
    timing: Timing,
    action: DataAction,
    resource: &RegisteredResource,
    payload: &mut Payload,
) -> Result<(), AppError> {
    state
        .events
        .run(EventName::data(timing, action, Level::Item), resource.name(), payload)
        .await
}

async fn existing(
    state: &AppState,
    resource: &RegisteredResource,
    key: &ItemKey,
) -> Result<Document, AppError> {
    state
        .data
        .find_one(resource, &key.query(resource))
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn get_item(
    state: AppState,
    resource: Arc<RegisteredResource>,
    raw_id: String,
) -> Result<Response, AppError> {
    let key = resolve_item_key(state.data.as_ref(), &resource, &raw_id)?;
    let mut payload = Payload::Query(key.query(&resource));
    fire(&state, Timing::Before, DataAction::Fetch, &resource, &mut payload).await?;
    let query = payload.into_query()?;

    let doc = state
        .data
        .find_one(&resource, &query)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut payload = Payload::Document(doc);
    fire(&state, Timing::After, DataAction::Fetch, &resource, &mut payload).await?;
    let doc = resource.response().project(payload.into_document()?);

    let links = state.settings.hateoas.then(|| {
        let collection = format!("/{}", resource.name());
        item_links(
            &collection,
            resource.name(),
            &format!("{}/{}", collection, raw_id),
            resource.item_name(),
        )
    });
    Ok(Envelope::item(doc, links).respond(&state.settings, StatusCode::OK))
}

/// Replaces an item, or creates it under the addressed key when it does not exist.
pub async fn put_item(
    state: AppState,
    resource: Arc<RegisteredResource>,
    raw_id: String,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let key = resolve_item_key(state.data.as_ref(), &resource, &raw_id)?;
    let body = json_body(body)?;
    let mut doc = RequestValidator::validate(
        body,
        resource.descriptor().create_model(),
        state.data.as_ref(),
        &[json!("body")],
    )
    .map_err(AppError::Validation)?;

    let query = key.query(&resource);
    let Some(current) = state.data.find_one(&resource, &query).await? else {
        key.seed(&resource, &mut doc);
        return match insert_documents(&state, &resource, vec![doc]).await {
            Ok(_) => Ok(StatusCode::NO_CONTENT.into_response()),
            Err(AppError::Validation(details)) if is_key_conflict(&details, key.field(&resource)) => {
                tracing::warn!(
                    resource = %resource.name(),
                    id = %raw_id,
                    "upsert raced with a concurrent insert of the same key"
                );
                Ok(StatusCode::NO_CONTENT.into_response())
            }
            Err(e) => Err(e),
        };
    };

    if let Some(created) = current.get(CREATED) {
        doc.insert(CREATED.to_string(), created.clone());
    }
    doc.insert(UPDATED.to_string(), now_stamp());

    let mut payload = Payload::Document(doc);
    fire(&state, Timing::Before, DataAction::Replace, &resource, &mut payload).await?;
    let doc = payload.into_document()?;
    state.data.replace_item(&resource, &query, doc.clone()).await?;
    tracing::info!(resource = %resource.name(), id = %raw_id, "replaced item");

    let mut payload = Payload::Document(doc);
    fire(&state, Timing::After, DataAction::Replace, &resource, &mut payload).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn is_key_conflict(details: &[crate::error::ErrorDetail], field: &str) -> bool {
    details.iter().any(|d| {
        d.kind == "value_error.duplicate" && d.loc.get(1).and_then(Value::as_str) == Some(field)
    })
}

pub async fn patch_item(
    state: AppState,
    resource: Arc<RegisteredResource>,
    raw_id: String,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let key = resolve_item_key(state.data.as_ref(), &resource, &raw_id)?;
    let body = json_body(body)?;
    let mut updates = RequestValidator::validate_partial(
        body,
        resource.descriptor().update_model(),
        state.data.as_ref(),
        &[json!("body")],
    )
    .map_err(AppError::Validation)?;

    existing(&state, &resource, &key).await?;
    updates.insert(UPDATED.to_string(), now_stamp());

    let mut payload = Payload::Document(updates);
    fire(&state, Timing::Before, DataAction::Update, &resource, &mut payload).await?;
    let updates = payload.into_document()?;
    state
        .data
        .update_item(&resource, &key.query(&resource), updates.clone())
        .await?;
    tracing::info!(resource = %resource.name(), id = %raw_id, "updated item");

    let mut payload = Payload::Document(updates);
    fire(&state, Timing::After, DataAction::Update, &resource, &mut payload).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn delete_item(
    state: AppState,
    resource: Arc<RegisteredResource>,
    raw_id: String,
) -> Result<Response, AppError> {
    let key = resolve_item_key(state.data.as_ref(), &resource, &raw_id)?;
    let original = existing(&state, &resource, &key).await?;

    let mut payload = Payload::Document(original);
    fire(&state, Timing::Before, DataAction::Delete, &resource, &mut payload).await?;
    state.data.remove_item(&resource, &key.query(&resource)).await?;
    tracing::info!(resource = %resource.name(), id = %raw_id, "deleted item");
    fire(&state, Timing::After, DataAction::Delete, &resource, &mut payload).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
