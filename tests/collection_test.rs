//! Collection endpoints over the in-memory store: create, list, paging, filters, embedding.

mod common;

use axum::http::StatusCode;
use common::{app, builder, enc, id_of, send};
use pretty_assertions::assert_eq;
use restgen::Settings;
use serde_json::json;

#[tokio::test]
async fn create_then_list_people() {
    let app = app();
    let created = send(&app, "POST", "/people", Some(json!({"name": "Curie", "age": 66, "extra": 1}))).await;
    assert_eq!(created.status, StatusCode::CREATED);
    let doc = &created.body["_data"][0];
    assert_eq!(doc["name"], json!("Curie"));
    assert_eq!(doc["age"], json!(66));
    assert!(doc.get("extra").is_none());
    assert_eq!(doc["_created"], doc["_updated"]);
    assert!(doc["_created"].as_str().unwrap().ends_with('Z'));

    let listed = send(&app, "GET", "/people", None).await;
    assert_eq!(listed.status, StatusCode::OK);
    assert_eq!(listed.body["_data"].as_array().unwrap().len(), 1);
    assert_eq!(listed.body["_meta"], json!({"page": 1, "max_results": 25, "total": 1}));
    assert_eq!(
        listed.body["_links"],
        json!({
            "self": {"href": "/people", "title": "people"},
            "parent": {"href": "/", "title": "home"}
        })
    );
}

#[tokio::test]
async fn missing_required_field_is_422() {
    let app = app();
    let reply = send(&app, "POST", "/people", Some(json!({"age": 3}))).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        reply.body,
        json!({"detail": [{"loc": ["body", "name"], "msg": "field required", "type": "value_error.missing"}]})
    );
}

#[tokio::test]
async fn malformed_json_is_422() {
    let app = app();
    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/people")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();
    let res = tower::ServiceExt::oneshot(app, req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn bulk_insert_creates_every_item() {
    let app = app();
    let reply = send(
        &app,
        "POST",
        "/people",
        Some(json!([{"name": "Curie"}, {"name": "Noether"}, {"name": "Lovelace"}])),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED);
    let docs = reply.body["_data"].as_array().unwrap();
    assert_eq!(docs.len(), 3);
    let ids: std::collections::HashSet<_> = docs.iter().map(|d| d["_id"].to_string()).collect();
    assert_eq!(ids.len(), 3);
    assert!(docs.iter().all(|d| d["_created"] == docs[0]["_created"]));
    let listed = send(&app, "GET", "/people", None).await;
    assert_eq!(listed.body["_meta"]["total"], json!(3));
}

#[tokio::test]
async fn bulk_insert_reports_item_index_and_rejects_empty_lists() {
    let app = app();
    let reply = send(&app, "POST", "/people", Some(json!([{"name": "Curie"}, {"age": 1}]))).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.body["detail"][0]["loc"], json!(["body", 1, "name"]));
    let listed = send(&app, "GET", "/people", None).await;
    assert_eq!(listed.body["_meta"]["total"], json!(0));

    let reply = send(&app, "POST", "/people", Some(json!([]))).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.body["detail"][0]["type"], json!("value_error.list.min_items"));
}

#[tokio::test]
async fn duplicate_unique_value_is_422() {
    let app = app();
    send(&app, "POST", "/people", Some(json!({"name": "Curie"}))).await;
    let reply = send(&app, "POST", "/people", Some(json!({"name": "Curie"}))).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        reply.body,
        json!({"detail": [{
            "loc": ["body", "name"],
            "msg": "value 'Curie' is not unique",
            "type": "value_error.duplicate"
        }]})
    );
}

#[tokio::test]
async fn pages_carry_next_and_last_links() {
    let app = app();
    let people: Vec<_> = (0..5).map(|i| json!({"name": format!("p{i}")})).collect();
    send(&app, "POST", "/people", Some(json!(people))).await;

    let reply = send(&app, "GET", "/people?page=2&max_results=2", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    let names: Vec<_> = reply.body["_data"].as_array().unwrap().iter().map(|d| d["name"].clone()).collect();
    assert_eq!(names, vec![json!("p2"), json!("p3")]);
    assert_eq!(reply.body["_meta"], json!({"page": 2, "max_results": 2, "total": 5}));
    assert_eq!(
        reply.body["_links"]["next"],
        json!({"href": "/people?page=3&max_results=2", "title": "next page"})
    );
    assert_eq!(reply.body["_links"]["last"]["href"], json!("/people?page=3&max_results=2"));
}

#[tokio::test]
async fn invalid_page_size_is_422() {
    let app = app();
    for size in ["0", "-4", "many"] {
        let reply = send(&app, "GET", &format!("/people?max_results={size}"), None).await;
        assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY, "max_results={size}");
        assert_eq!(reply.body["detail"][0]["loc"], json!(["query", "max_results"]));
    }
}

#[tokio::test]
async fn huge_page_numbers_are_422_not_a_crash() {
    let app = app();
    let reply = send(&app, "GET", "/people?page=9223372036854775807&max_results=1000", None).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.body["detail"][0]["loc"], json!(["query", "page"]));

    let reply = send(&app, "GET", "/people?page=9000000000000000", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["_data"], json!([]));
}

#[tokio::test]
async fn disabled_pagination_and_hateoas_shrink_the_envelope() {
    let settings = Settings {
        pagination: false,
        hateoas: false,
        data_key: "items".into(),
        ..Settings::default()
    };
    let app = builder(settings).build().unwrap().router();
    let people: Vec<_> = (0..30).map(|i| json!({"name": format!("p{i}")})).collect();
    send(&app, "POST", "/people", Some(json!(people))).await;

    let reply = send(&app, "GET", "/people", None).await;
    assert_eq!(reply.body["items"].as_array().unwrap().len(), 30);
    assert!(reply.body.get("_meta").is_none());
    assert!(reply.body.get("_links").is_none());
}

#[tokio::test]
async fn where_filters_on_declared_fields() {
    let app = app();
    send(
        &app,
        "POST",
        "/people",
        Some(json!([
            {"name": "Curie", "role": "admin"},
            {"name": "Noether", "role": "member"},
            {"name": "Hopper", "role": "admin"}
        ])),
    )
    .await;

    let uri = format!("/people?where={}", enc(r#"{"role": "admin"}"#));
    let reply = send(&app, "GET", &uri, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["_meta"]["total"], json!(2));

    let uri = format!("/people?where={}", enc(r#"{"secret": 1}"#));
    let reply = send(&app, "GET", &uri, None).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.body["detail"][0]["loc"], json!(["query", "where"]));
}

#[tokio::test]
async fn delete_collection_empties_it() {
    let app = app();
    send(&app, "POST", "/people", Some(json!([{"name": "a"}, {"name": "b"}]))).await;
    let reply = send(&app, "DELETE", "/people", None).await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    let listed = send(&app, "GET", "/people", None).await;
    assert_eq!(listed.body["_meta"]["total"], json!(0));
}

#[tokio::test]
async fn embedded_relations_are_expanded_and_projected() {
    let app = app();
    let leader = send(&app, "POST", "/leaders", Some(json!({"name": "Boric", "password": "x"}))).await;
    assert!(leader.body["_data"][0].get("password").is_none());
    let leader_id = id_of(&leader);
    send(
        &app,
        "POST",
        "/countries",
        Some(json!({"name": "Chile", "leader": leader_id, "allies": [leader_id]})),
    )
    .await;

    let plain = send(&app, "GET", "/countries", None).await;
    assert_eq!(plain.body["_data"][0]["leader"], json!(leader_id));

    let uri = format!("/countries?embedded={}", enc(r#"{"leader": 1, "allies": 1}"#));
    let reply = send(&app, "GET", &uri, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    let country = &reply.body["_data"][0];
    assert_eq!(country["leader"]["_id"], json!(leader_id));
    assert_eq!(country["leader"]["name"], json!("Boric"));
    assert!(country["leader"].get("password").is_none());
    assert_eq!(country["allies"][0]["name"], json!("Boric"));
}

#[tokio::test]
async fn embedding_errors_name_the_query_parameter() {
    let app = app();
    let uri = format!("/countries?embedded={}", enc(r#"{"name": 1}"#));
    let reply = send(&app, "GET", &uri, None).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        reply.body,
        json!({"detail": [{
            "loc": ["query", "embedded"],
            "msg": "field 'name' is not a embedable",
            "type": "value_error.not_embedable"
        }]})
    );

    let reply = send(&app, "GET", "/countries?embedded=leader", None).await;
    assert_eq!(reply.body["detail"][0]["type"], json!("type_error.dict"));
}
