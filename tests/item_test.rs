//! Item endpoints: fetch, replace/upsert, patch, delete, alternate ids and sub-resources.

mod common;

use axum::http::StatusCode;
use common::{app, builder, enc, id_of, send};
use pretty_assertions::assert_eq;
use restgen::{AppError, AppState, Callback, DataLayer, Payload, Settings};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const UNUSED_ID: &str = "5f1f7e4b9b1e8a3d4c2b1a09";

#[tokio::test]
async fn get_item_returns_envelope_with_links() {
    let app = app();
    let created = send(&app, "POST", "/people", Some(json!({"name": "Curie"}))).await;
    let id = id_of(&created);

    let reply = send(&app, "GET", &format!("/people/{id}"), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["_data"][0]["name"], json!("Curie"));
    assert_eq!(
        reply.body["_links"],
        json!({
            "self": {"href": format!("/people/{id}"), "title": "people"},
            "parent": {"href": "/people", "title": "people"}
        })
    );
}

#[tokio::test]
async fn unknown_and_invalid_ids() {
    let app = app();
    let reply = send(&app, "GET", &format!("/people/{UNUSED_ID}"), None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let reply = send(&app, "GET", "/people/not-an-id", None).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        reply.body,
        json!({"detail": [{"loc": ["path", "people_id"], "msg": "value is not a valid id", "type": "type_error.id"}]})
    );
}

#[tokio::test]
async fn put_replaces_existing_item_and_keeps_created() {
    let app = app();
    let created = send(&app, "POST", "/people", Some(json!({"name": "Curie", "age": 66}))).await;
    let id = id_of(&created);
    let stamp = created.body["_data"][0]["_created"].clone();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let reply = send(&app, "PUT", &format!("/people/{id}"), Some(json!({"name": "Marie"}))).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let doc = send(&app, "GET", &format!("/people/{id}"), None).await.body["_data"][0].clone();
    assert_eq!(doc["name"], json!("Marie"));
    assert!(doc.get("age").is_none());
    assert_eq!(doc["_created"], stamp);
    assert_ne!(doc["_updated"], stamp);
}

#[tokio::test]
async fn put_on_missing_item_creates_it_under_that_id() {
    let app = app();
    let reply = send(&app, "PUT", &format!("/people/{UNUSED_ID}"), Some(json!({"name": "Hopper"}))).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let reply = send(&app, "GET", &format!("/people/{UNUSED_ID}"), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["_data"][0]["_id"], json!(UNUSED_ID));
    assert_eq!(reply.body["_data"][0]["name"], json!("Hopper"));
}

#[tokio::test]
async fn put_validates_the_full_body() {
    let app = app();
    let reply = send(&app, "PUT", &format!("/people/{UNUSED_ID}"), Some(json!({"age": 1}))).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.body["detail"][0]["loc"], json!(["body", "name"]));
}

#[tokio::test]
async fn patch_updates_only_given_fields() {
    let app = app();
    let created = send(&app, "POST", "/people", Some(json!({"name": "Curie", "age": 66}))).await;
    let id = id_of(&created);
    let stamp = created.body["_data"][0]["_created"].clone();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let reply = send(&app, "PATCH", &format!("/people/{id}"), Some(json!({"age": 67}))).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let doc = send(&app, "GET", &format!("/people/{id}"), None).await.body["_data"][0].clone();
    assert_eq!(doc["name"], json!("Curie"));
    assert_eq!(doc["age"], json!(67));
    assert_eq!(doc["_created"], stamp);
    assert_ne!(doc["_updated"], stamp);

    let reply = send(&app, "PATCH", &format!("/people/{id}"), Some(json!({"age": "old"}))).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    let reply = send(&app, "PATCH", &format!("/people/{UNUSED_ID}"), Some(json!({"age": 1}))).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_item_then_it_is_gone() {
    let app = app();
    let created = send(&app, "POST", "/people", Some(json!({"name": "Curie"}))).await;
    let id = id_of(&created);

    let reply = send(&app, "DELETE", &format!("/people/{id}"), None).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    let reply = send(&app, "GET", &format!("/people/{id}"), None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    let reply = send(&app, "DELETE", &format!("/people/{id}"), None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn alt_id_addresses_items_by_name() {
    let app = app();
    let created = send(&app, "POST", "/countries", Some(json!({"name": "Chile"}))).await;
    let id = id_of(&created);

    let reply = send(&app, "GET", "/countries/Chile", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["_data"][0]["_id"], json!(id));

    let reply = send(&app, "GET", "/countries/Peru", None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sub_resource_lists_children_by_parent_id_or_alt_id() {
    let app = app();
    let chile = id_of(&send(&app, "POST", "/countries", Some(json!({"name": "Chile"}))).await);
    let peru = id_of(&send(&app, "POST", "/countries", Some(json!({"name": "Peru"}))).await);
    send(&app, "POST", "/cities", Some(json!({"name": "Santiago", "country_id": chile}))).await;
    send(&app, "POST", "/cities", Some(json!({"name": "Valparaiso", "country_id": chile}))).await;
    send(&app, "POST", "/cities", Some(json!({"name": "Lima", "country_id": peru}))).await;

    let reply = send(&app, "GET", &format!("/countries/{chile}/cities"), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["_meta"]["total"], json!(2));
    assert_eq!(
        reply.body["_links"]["self"],
        json!({"href": format!("/countries/{chile}/cities"), "title": "cities"})
    );
    assert_eq!(
        reply.body["_links"]["parent"],
        json!({"href": format!("/countries/{chile}"), "title": "countrie"})
    );

    let reply = send(&app, "GET", "/countries/Peru/cities", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    let cities = reply.body["_data"].as_array().unwrap();
    assert_eq!(cities.len(), 1);
    assert_eq!(cities[0]["name"], json!("Lima"));
    assert_eq!(cities[0]["country_id"], json!(peru));
}

#[tokio::test]
async fn put_by_alt_id_creates_an_item_carrying_that_name() {
    let app = app();
    let reply = send(&app, "PUT", "/countries/Peru", Some(json!({"name": "Peru"}))).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);

    let reply = send(&app, "GET", "/countries/Peru", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["_data"][0]["name"], json!("Peru"));
    assert!(reply.body["_data"][0]["_id"].is_string());

    // the path value wins over a different name in the body
    let reply = send(&app, "PUT", "/countries/Chile", Some(json!({"name": "Chili"}))).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    let reply = send(&app, "GET", "/countries/Chile", None).await;
    assert_eq!(reply.body["_data"][0]["name"], json!("Chile"));
}

#[tokio::test]
async fn put_create_losing_a_race_on_its_own_key_is_still_204() {
    let slot: Arc<Mutex<Option<AppState>>> = Arc::new(Mutex::new(None));
    let hook_slot = slot.clone();
    let api = builder(Settings::default())
        .on(
            "before_create_items_people",
            Callback::asynchronous(move |_, payload| {
                let slot = hook_slot.clone();
                let contested = match payload {
                    Payload::Documents(docs) => docs.iter().any(|d| d.get("_id") == Some(&json!(UNUSED_ID))),
                    _ => false,
                };
                Box::pin(async move {
                    if !contested {
                        return Ok::<(), AppError>(());
                    }
                    let state = slot.lock().unwrap().clone().unwrap();
                    let people = state.registry.get("people").unwrap().clone();
                    let racer = json!({"_id": UNUSED_ID, "name": "Racer"});
                    state.data.create(&people, racer.as_object().cloned().unwrap()).await?;
                    Ok(())
                })
            }),
        )
        .unwrap()
        .build()
        .unwrap();
    *slot.lock().unwrap() = Some(api.state().clone());
    let app = api.router();

    let reply = send(&app, "PUT", &format!("/people/{UNUSED_ID}"), Some(json!({"name": "Hopper"}))).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    let reply = send(&app, "GET", &format!("/people/{UNUSED_ID}"), None).await;
    assert_eq!(reply.body["_data"][0]["name"], json!("Racer"));
}

#[tokio::test]
async fn put_create_clashing_on_another_unique_field_is_422() {
    let app = app();
    send(&app, "POST", "/people", Some(json!({"name": "Curie"}))).await;
    let reply = send(&app, "PUT", &format!("/people/{UNUSED_ID}"), Some(json!({"name": "Curie"}))).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.body["detail"][0]["loc"], json!(["body", "name"]));
}

#[tokio::test]
async fn sub_resource_filters_cannot_escape_the_parent() {
    let app = app();
    let chile = id_of(&send(&app, "POST", "/countries", Some(json!({"name": "Chile"}))).await);
    let peru = id_of(&send(&app, "POST", "/countries", Some(json!({"name": "Peru"}))).await);
    send(&app, "POST", "/cities", Some(json!({"name": "Santiago", "country_id": chile}))).await;
    send(&app, "POST", "/cities", Some(json!({"name": "Lima", "country_id": peru}))).await;

    let filter = enc(&json!({"country_id": peru}).to_string());
    let reply = send(&app, "GET", &format!("/countries/{chile}/cities?where={filter}"), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["_data"], json!([]));
    assert_eq!(reply.body["_meta"]["total"], json!(0));

    let filter = enc(&json!({"country_id": chile}).to_string());
    let reply = send(&app, "GET", &format!("/countries/{chile}/cities?where={filter}"), None).await;
    assert_eq!(reply.body["_meta"]["total"], json!(1));

    let filter = enc(r#"{"name": "Lima"}"#);
    let reply = send(&app, "GET", &format!("/countries/Chile/cities?where={filter}"), None).await;
    assert_eq!(reply.body["_meta"]["total"], json!(0));
}
