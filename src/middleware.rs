//! Request-level events wrapped around every route of one resource.

use crate::error::AppError;
use crate::events::{EventName, Payload, Timing};
use crate::resource::{Method, RegisteredResource};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

/// State for [`request_events`]: the app plus the resource owning the routes.
#[derive(Clone)]
pub struct ResourceScope {
    pub state: AppState,
    pub resource: Arc<RegisteredResource>,
}

/// Fires `before_<METHOD>` with the request and `after_<METHOD>` with the response.
/// Header changes made by callbacks are written back in both directions.
pub async fn request_events(
    State(scope): State<ResourceScope>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let events = &scope.state.events;
    let method = match Method::from_http(req.method()) {
        Some(m) if !events.is_empty() => m,
        _ => return Ok(next.run(req).await),
    };
    let resource = scope.resource.name();

    let mut payload = Payload::Request(crate::events::RequestInfo {
        method: method.to_string(),
        uri: req.uri().to_string(),
        headers: req.headers().clone(),
    });
    events
        .run(EventName::Request(Timing::Before, method), resource, &mut payload)
        .await?;
    let request = payload.into_request()?;
    *req.headers_mut() = request.headers.clone();

    let mut response = next.run(req).await;

    let mut payload = Payload::Response {
        request,
        status: response.status(),
        headers: response.headers().clone(),
    };
    events
        .run(EventName::Request(Timing::After, method), resource, &mut payload)
        .await?;
    if let Payload::Response { status, headers, .. } = payload {
        *response.status_mut() = status;
        *response.headers_mut() = headers;
    }
    Ok(response)
}
