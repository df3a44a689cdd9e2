//! Application assembly: resources and callbacks in, a routed axum app out.

use crate::config::Settings;
use crate::error::{AppError, ConfigError};
use crate::events::{Callback, EventBus, EventName, Lifecycle, Payload};
use crate::io::{data_layer_from_settings, DataLayer};
use crate::resource::{Registry, Resource};
use crate::routes::{common_routes, not_found, resource_routes};
use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Paths served by the common routes; a resource may not take them.
const RESERVED: [&str; 1] = ["health"];

pub struct ApiBuilder {
    settings: Settings,
    data: Arc<dyn DataLayer>,
    resources: Vec<Resource>,
    events: EventBus,
}

impl ApiBuilder {
    pub fn new(settings: Settings, data: Arc<dyn DataLayer>) -> Self {
        ApiBuilder {
            settings,
            data,
            resources: Vec::new(),
            events: EventBus::new(),
        }
    }

    /// Builder backed by the data layer `settings.backend` names.
    pub fn from_settings(settings: Settings) -> Result<Self, ConfigError> {
        let data = data_layer_from_settings(&settings)?;
        Ok(Self::new(settings, data))
    }

    pub fn resource(mut self, resource: Resource) -> Result<Self, ConfigError> {
        if RESERVED.contains(&resource.name()) {
            return Err(ConfigError::Validation(format!(
                "resource name '{}' is reserved",
                resource.name()
            )));
        }
        if self.resources.iter().any(|r| r.name() == resource.name()) {
            return Err(ConfigError::DuplicateResource(resource.name().to_string()));
        }
        self.resources.push(resource);
        Ok(self)
    }

    pub fn resources(self, resources: impl IntoIterator<Item = Resource>) -> Result<Self, ConfigError> {
        resources.into_iter().try_fold(self, |b, r| b.resource(r))
    }

    /// Subscribes `callback` to `event`, e.g. `before_GET` or `after_fetch_item_people`.
    /// Resource-specific names only exist for resources added before this call.
    pub fn on(mut self, event: &str, callback: Callback) -> Result<Self, ConfigError> {
        self.events.subscribe(&self.resources, event, callback)?;
        Ok(self)
    }

    pub fn build(self) -> Result<Api, ConfigError> {
        let registry = Registry::build(self.resources, self.data.as_ref())?;
        Ok(Api {
            state: AppState {
                settings: Arc::new(self.settings),
                data: self.data,
                events: Arc::new(self.events),
                registry: Arc::new(registry),
            },
        })
    }
}

pub struct Api {
    state: AppState,
}

impl Api {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The full app: common routes, resource routes, 404 fallback, body limit and CORS.
    pub fn router(&self) -> Router {
        let state = self.state.clone();
        let mut router = common_routes();
        for resource in state.registry.iter() {
            router = router.merge(resource_routes(&state, resource));
        }
        let mut router = router
            .fallback(not_found)
            .layer(DefaultBodyLimit::max(state.settings.body_limit));
        if let Some(cors) = cors_layer(&state.settings) {
            router = router.layer(cors);
        }
        router.with_state(state)
    }

    /// Connects the data layer, then runs `startup` callbacks.
    pub async fn startup(&self) -> Result<(), AppError> {
        self.state.data.connect(self.state.registry.as_slice()).await?;
        self.state
            .events
            .run(EventName::Lifecycle(Lifecycle::Startup), "", &mut Payload::Empty)
            .await?;
        tracing::info!(resources = self.state.registry.as_slice().len(), "api started");
        Ok(())
    }

    /// Runs `shutdown` callbacks, then closes the data layer.
    pub async fn shutdown(&self) -> Result<(), AppError> {
        self.state
            .events
            .run(EventName::Lifecycle(Lifecycle::Shutdown), "", &mut Payload::Empty)
            .await?;
        self.state.data.close().await?;
        tracing::info!("api stopped");
        Ok(())
    }

    /// Serves until ctrl-c, with startup and shutdown around it.
    pub async fn serve(self, listener: TcpListener) -> Result<(), AppError> {
        self.startup().await?;
        tracing::info!("listening on {:?}", listener.local_addr().ok());
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        self.shutdown().await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

fn cors_layer(settings: &Settings) -> Option<CorsLayer> {
    let origins = settings.cors_origins.as_ref()?;
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return Some(layer.allow_origin(Any));
    }
    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    Some(layer.allow_origin(AllowOrigin::list(allowed)))
}
