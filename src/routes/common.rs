//! Common routes: home, health, and the JSON 404 fallback.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

/// Links to every registered collection when HATEOAS is on.
async fn home(State(state): State<AppState>) -> Json<Value> {
    if !state.settings.hateoas {
        return Json(json!({}));
    }
    let children: Vec<Value> = state
        .registry
        .iter()
        .map(|r| json!({"href": format!("/{}", r.name()), "title": r.name()}))
        .collect();
    let mut body = serde_json::Map::new();
    body.insert(state.settings.links_key.clone(), json!({ "child": children }));
    Json(Value::Object(body))
}

pub(crate) async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({"detail": "Not Found"})))
}

/// GET / and GET /health.
pub fn common_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
}
