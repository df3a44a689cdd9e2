//! Per-resource routers built from each resource's declared methods.
//! Handlers capture their resource; request events wrap every route of the router.

use crate::handlers::{collection, item, subresource};
use crate::middleware::{request_events, ResourceScope};
use crate::resource::{Method, RegisteredResource};
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{MethodFilter, MethodRouter};
use axum::{middleware, Json, Router};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

type Params = Query<HashMap<String, String>>;
type Body = Result<Json<Value>, JsonRejection>;

/// Collection, item and sub-resource routes for one resource.
pub fn resource_routes(state: &AppState, resource: &Arc<RegisteredResource>) -> Router<AppState> {
    let collection_path = format!("/{}", resource.name());
    let item_path = format!("{}/:{}", collection_path, resource.item_param());
    let mut router = Router::new();
    let mut routed = false;

    if let Some(methods) = collection_methods(resource) {
        router = router.route(&collection_path, methods);
        routed = true;
    }
    if let Some(methods) = item_methods(resource) {
        router = router.route(&item_path, methods);
        routed = true;
    }
    for sub in resource.descriptor().sub_resources() {
        let parent = resource.clone();
        let name = sub.name.clone();
        router = router.route(
            &format!("{}/{}", item_path, sub.name),
            axum::routing::get(
                move |State(state): State<AppState>, Path(id): Path<String>, Query(q): Params| {
                    subresource::list(state, parent, name, id, q)
                },
            ),
        );
        routed = true;
    }

    if routed {
        tracing::debug!(resource = %resource.name(), path = %collection_path, "mounted routes");
        router = router.route_layer(middleware::from_fn_with_state(
            ResourceScope {
                state: state.clone(),
                resource: resource.clone(),
            },
            request_events,
        ));
    }
    router
}

fn collection_methods(resource: &Arc<RegisteredResource>) -> Option<MethodRouter<AppState>> {
    let methods = resource.descriptor().resource_methods();
    if methods.is_empty() {
        return None;
    }
    let mut mr: MethodRouter<AppState> = MethodRouter::new();
    for &method in methods {
        let r = resource.clone();
        mr = match method {
            Method::Get => mr.get(move |State(state): State<AppState>, Query(q): Params| {
                collection::list(state, r, q)
            }),
            // GET routes answer HEAD already.
            Method::Head if methods.contains(&Method::Get) => mr,
            Method::Head => mr.on(
                MethodFilter::HEAD,
                move |State(state): State<AppState>, Query(q): Params| collection::list(state, r, q),
            ),
            Method::Post => mr.post(move |State(state): State<AppState>, body: Body| {
                collection::create(state, r, body)
            }),
            Method::Delete => {
                mr.delete(move |State(state): State<AppState>| collection::delete_all(state, r))
            }
            Method::Put | Method::Patch => mr,
        };
    }
    Some(mr)
}

fn item_methods(resource: &Arc<RegisteredResource>) -> Option<MethodRouter<AppState>> {
    let methods = resource.descriptor().item_methods();
    if methods.is_empty() {
        return None;
    }
    let mut mr: MethodRouter<AppState> = MethodRouter::new();
    for &method in methods {
        let r = resource.clone();
        mr = match method {
            Method::Get => mr.get(move |State(state): State<AppState>, Path(id): Path<String>| {
                item::get_item(state, r, id)
            }),
            Method::Head if methods.contains(&Method::Get) => mr,
            Method::Head => mr.on(
                MethodFilter::HEAD,
                move |State(state): State<AppState>, Path(id): Path<String>| item::get_item(state, r, id),
            ),
            Method::Put => mr.put(
                move |State(state): State<AppState>, Path(id): Path<String>, body: Body| {
                    item::put_item(state, r, id, body)
                },
            ),
            Method::Patch => mr.patch(
                move |State(state): State<AppState>, Path(id): Path<String>, body: Body| {
                    item::patch_item(state, r, id, body)
                },
            ),
            Method::Delete => mr.delete(move |State(state): State<AppState>, Path(id): Path<String>| {
                item::delete_item(state, r, id)
            }),
            Method::Post => mr,
        };
    }
    Some(mr)
}
