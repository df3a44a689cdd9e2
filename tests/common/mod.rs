//! Shared helpers for the HTTP integration tests: an in-memory app and a request helper.

#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use restgen::{ApiBuilder, Field, FieldType, MemoryStore, Method, Model, Resource, Settings, SubResource};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

/// Sends one request; an empty response body reads as `Value::Null`.
pub async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Reply {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let res = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    Reply { status, headers, body }
}

pub fn people() -> Resource {
    Resource::builder(
        Model::new("People")
            .field(Field::string("name").required().unique())
            .field(Field::integer("age"))
            .field(Field::string("role")),
    )
    .resource_methods([Method::Get, Method::Post, Method::Delete])
    .item_methods([Method::Get, Method::Put, Method::Patch, Method::Delete])
    .build()
    .unwrap()
}

pub fn leaders() -> Resource {
    Resource::builder(
        Model::new("Leaders")
            .field(Field::string("name").required())
            .field(Field::string("password")),
    )
    .response_model(Model::new("LeadersOut").field(Field::string("name")))
    .resource_methods([Method::Get, Method::Post])
    .build()
    .unwrap()
}

pub fn countries() -> Resource {
    Resource::builder(
        Model::new("Countries")
            .field(Field::string("name").required().unique())
            .field(Field::id("leader").relation("leaders"))
            .field(Field::new("allies", FieldType::list_of(FieldType::Id)).relation("leaders")),
    )
    .resource_methods([Method::Get, Method::Post])
    .item_methods([Method::Get, Method::Put])
    .alt_id("name")
    .sub_resource(SubResource::new("cities", "country_id"))
    .build()
    .unwrap()
}

pub fn cities() -> Resource {
    Resource::builder(
        Model::new("Cities")
            .field(Field::string("name").required())
            .field(Field::id("country_id").relation("countries")),
    )
    .resource_methods([Method::Post])
    .build()
    .unwrap()
}

pub fn builder(settings: Settings) -> ApiBuilder {
    ApiBuilder::new(settings, Arc::new(MemoryStore::new()))
        .resources([people(), leaders(), countries(), cities()])
        .unwrap()
}

pub fn app() -> Router {
    builder(Settings::default()).build().unwrap().router()
}

/// Percent-encodes a query-string value.
pub fn enc(raw: &str) -> String {
    let mut out = String::new();
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

pub fn id_of(reply: &Reply) -> String {
    reply.body["_data"][0]["_id"].as_str().unwrap().to_string()
}
