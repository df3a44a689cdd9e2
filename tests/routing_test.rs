//! Route table: home, health, fallback, method filtering and request limits.

mod common;

use axum::http::StatusCode;
use common::{app, builder, send};
use pretty_assertions::assert_eq;
use restgen::{ApiBuilder, ConfigError, Field, MemoryStore, Model, Resource, Settings};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn home_links_every_collection() {
    let reply = send(&app(), "GET", "/", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.body,
        json!({"_links": {"child": [
            {"href": "/people", "title": "people"},
            {"href": "/leaders", "title": "leaders"},
            {"href": "/countries", "title": "countries"},
            {"href": "/cities", "title": "cities"}
        ]}})
    );

    let settings = Settings {
        hateoas: false,
        ..Settings::default()
    };
    let app = builder(settings).build().unwrap().router();
    assert_eq!(send(&app, "GET", "/", None).await.body, json!({}));
}

#[tokio::test]
async fn health_and_fallback() {
    let app = app();
    let reply = send(&app, "GET", "/health", None).await;
    assert_eq!(reply.body, json!({"status": "ok"}));

    let reply = send(&app, "GET", "/nowhere", None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body, json!({"detail": "Not Found"}));

    // leaders declares no item methods
    let reply = send(&app, "GET", "/leaders/5f1f7e4b9b1e8a3d4c2b1a09", None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn undeclared_methods_are_405() {
    let app = app();
    assert_eq!(send(&app, "PUT", "/countries", None).await.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(send(&app, "DELETE", "/leaders", None).await.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(send(&app, "GET", "/cities", None).await.status, StatusCode::METHOD_NOT_ALLOWED);
    let reply = send(&app, "DELETE", "/countries/5f1f7e4b9b1e8a3d4c2b1a09", None).await;
    assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn head_answers_get_routes_without_a_body() {
    let app = app();
    let reply = send(&app, "HEAD", "/people", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, serde_json::Value::Null);
}

#[tokio::test]
async fn parent_keys_resolve_like_item_keys() {
    let app = builder(Settings::default()).build().unwrap().router();
    // countries has an alt id, people does not
    let reply = send(&app, "GET", "/countries/Atlantis/cities", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["_data"], json!([]));

    let reply = send(&app, "GET", "/people/bogus", None).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let settings = Settings {
        body_limit: 64,
        ..Settings::default()
    };
    let app = builder(settings).build().unwrap().router();
    let name = "x".repeat(256);
    let reply = send(&app, "POST", "/people", Some(json!({ "name": name }))).await;
    assert!(reply.status.is_client_error(), "status {}", reply.status);
    let listed = send(&app, "GET", "/people", None).await;
    assert_eq!(listed.body["_meta"]["total"], json!(0));
}

#[test]
fn reserved_and_duplicate_names_are_rejected() {
    let health = Resource::builder(Model::new("Health").field(Field::string("name")))
        .build()
        .unwrap();
    let err = ApiBuilder::new(Settings::default(), Arc::new(MemoryStore::new()))
        .resource(health)
        .err()
        .expect("builder should reject this");
    assert!(matches!(err, ConfigError::Validation(_)), "{err:?}");

    let err = builder(Settings::default())
        .resource(common::people())
        .err()
        .expect("duplicate name should be rejected");
    assert!(matches!(err, ConfigError::DuplicateResource(name) if name == "people"));
}
