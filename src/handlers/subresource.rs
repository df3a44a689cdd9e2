//! Child listings scoped to one parent item, e.g. `/countries/{id}/cities`.

use crate::error::AppError;
use crate::handlers::collection::{list_documents, Listing};
use crate::handlers::common::{coerce_path_value, invalid_id};
use crate::handlers::params::ListParams;
use crate::io::{Query, Stage};
use crate::resource::{RegisteredResource, SubResource};
use crate::response::Link;
use crate::state::AppState;
use axum::response::Response;
use std::collections::HashMap;
use std::sync::Arc;

pub async fn list(
    state: AppState,
    parent: Arc<RegisteredResource>,
    sub_name: String,
    raw_id: String,
    raw: HashMap<String, String>,
) -> Result<Response, AppError> {
    let sub = parent.sub_resource(&sub_name).ok_or(AppError::NotFound)?;
    let child = state
        .registry
        .get(&sub.resource)
        .cloned()
        .ok_or(AppError::NotFound)?;
    let params = ListParams::parse(&state.settings, &child, &raw)?;
    let scope = parent_scope(&state, &parent, sub, &raw_id)?;

    let parent_href = format!("/{}/{}", parent.name(), raw_id);
    let listing = Listing {
        path: format!("{}/{}", parent_href, sub.name),
        title: sub.name.clone(),
        parent: Link::new(parent_href, parent.item_name()),
        scope,
    };
    list_documents(&state, &child, params, listing).await
}

/// Stages restricting the child collection to documents referencing the parent.
///
/// A parent addressed by alternate id is resolved by joining the parent, matching on
/// the joined alternate field and restoring the foreign key afterwards.
fn parent_scope(
    state: &AppState,
    parent: &Arc<RegisteredResource>,
    sub: &SubResource,
    raw_id: &str,
) -> Result<Vec<Stage>, AppError> {
    if let Some(id) = state.data.parse_id(parent.model(), raw_id) {
        let mut q = Query::new();
        q.insert(sub.id_field.clone(), id);
        return Ok(vec![Stage::Match(q)]);
    }
    let Some(alt) = parent.alt_id() else {
        return Err(invalid_id(parent));
    };
    let mut q = Query::new();
    q.insert(
        format!("{}.{}", sub.id_field, alt),
        coerce_path_value(parent, alt, raw_id),
    );
    Ok(vec![
        Stage::lookup(parent.clone(), &sub.id_field, &sub.id_field),
        Stage::Unwind(sub.id_field.clone()),
        Stage::Match(q),
        Stage::AddField {
            field: sub.id_field.clone(),
            from_path: format!("{}.{}", sub.id_field, parent.id_field()),
        },
    ])
}
