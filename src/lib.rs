//! restgen: REST APIs generated from declarative resource definitions.
//!
//! Declare resources (a model plus the methods to expose), register callbacks on
//! named events, and build an axum router backed by an in-memory, MongoDB or
//! Postgres data layer.

pub mod app;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod io;
pub mod middleware;
pub mod resource;
pub mod response;
pub mod routes;
pub mod service;
pub mod state;

pub use app::{Api, ApiBuilder};
pub use config::{load_resources, parse_resources, resolve, ApiConfig, Settings};
pub use error::{AppError, ConfigError, DataError, ErrorDetail};
pub use events::{Callback, EventBus, EventContext, HookResult, Payload, RequestInfo};
#[cfg(feature = "mongo")]
pub use io::MongoStore;
pub use io::{data_layer_from_settings, Backend, DataLayer, Document, MemoryStore, PgStore};
pub use resource::{Field, FieldType, Method, Model, Resource, SubResource, ValidationRule};
pub use state::AppState;
