//! Data layer: the storage contract handlers call, and its backends.

pub mod memory;
#[cfg(feature = "mongo")]
pub mod mongo;
pub mod query;
pub mod sql;

use crate::config::Settings;
use crate::error::{ConfigError, DataError};
use crate::resource::{Model, RegisteredResource};
use async_trait::async_trait;
use bson::oid::ObjectId;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

pub use memory::MemoryStore;
#[cfg(feature = "mongo")]
pub use mongo::MongoStore;
pub use query::{Query, Stage};
pub use sql::PgStore;

/// One persisted entity as a JSON object.
pub type Document = serde_json::Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Document,
    Relational,
}

/// Storage contract. Backend errors are returned untouched; callers classify
/// uniqueness violations with [`crate::AppError::from_data`].
#[async_trait]
pub trait DataLayer: Send + Sync {
    fn kind(&self) -> StoreKind;

    /// Field holding the primary key of documents stored for `model`.
    fn primary_key(&self, model: &Model) -> String;

    /// Parses a path id into a key value, or `None` if it is not valid key syntax.
    fn parse_id(&self, model: &Model, raw: &str) -> Option<Value>;

    /// Whether a body value is acceptable for an `Id`-typed field.
    fn is_valid_id(&self, value: &Value) -> bool;

    async fn connect(&self, resources: &[Arc<RegisteredResource>]) -> Result<(), DataError>;

    async fn close(&self) -> Result<(), DataError>;

    /// A page of matching documents in key order, plus the total number of matches.
    async fn find(
        &self,
        resource: &RegisteredResource,
        query: &Query,
        skip: u64,
        limit: u64,
    ) -> Result<(Vec<Document>, u64), DataError>;

    async fn find_one(
        &self,
        resource: &RegisteredResource,
        query: &Query,
    ) -> Result<Option<Document>, DataError>;

    /// Runs `pipeline` and returns one page plus the true total in a single round trip.
    /// A `limit` of 0 means no limit.
    async fn aggregate(
        &self,
        resource: &RegisteredResource,
        pipeline: &[Stage],
        skip: u64,
        limit: u64,
    ) -> Result<(Vec<Document>, u64), DataError>;

    async fn create(&self, resource: &RegisteredResource, payload: Document) -> Result<Document, DataError>;

    async fn create_many(
        &self,
        resource: &RegisteredResource,
        payloads: Vec<Document>,
    ) -> Result<Vec<Document>, DataError>;

    async fn remove(&self, resource: &RegisteredResource) -> Result<(), DataError>;

    async fn remove_item(&self, resource: &RegisteredResource, query: &Query) -> Result<(), DataError>;

    async fn replace_item(
        &self,
        resource: &RegisteredResource,
        query: &Query,
        payload: Document,
    ) -> Result<(), DataError>;

    async fn update_item(
        &self,
        resource: &RegisteredResource,
        query: &Query,
        payload: Document,
    ) -> Result<(), DataError>;
}

/// Primary-key field of document stores.
pub const OBJECT_ID_FIELD: &str = "_id";

pub(crate) fn parse_object_id(raw: &str) -> Option<Value> {
    ObjectId::parse_str(raw).ok().map(|oid| Value::String(oid.to_hex()))
}

pub(crate) fn is_object_id(value: &Value) -> bool {
    value.as_str().map(|s| ObjectId::parse_str(s).is_ok()).unwrap_or(false)
}

pub(crate) fn new_object_id() -> Value {
    Value::String(ObjectId::new().to_hex())
}

/// Which backend to construct, from the `BACKEND` setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Mongo,
    Postgres,
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "mongo" | "mongodb" => Ok(Backend::Mongo),
            "postgres" | "postgresql" | "sql" => Ok(Backend::Postgres),
            other => Err(ConfigError::Validation(format!("unknown backend '{}'", other))),
        }
    }
}

/// Builds the configured backend. Nothing connects until [`DataLayer::connect`].
pub fn data_layer_from_settings(settings: &Settings) -> Result<Arc<dyn DataLayer>, ConfigError> {
    match settings.backend {
        Backend::Memory => Ok(Arc::new(MemoryStore::new())),
        Backend::Postgres => Ok(Arc::new(PgStore::new(
            settings.sql_uri.clone(),
            settings.connection_timeout,
        ))),
        #[cfg(feature = "mongo")]
        Backend::Mongo => Ok(Arc::new(MongoStore::new(
            settings.mongodb_uri.clone(),
            settings.mongodb_database.clone(),
            settings.connection_timeout,
        ))),
        #[cfg(not(feature = "mongo"))]
        Backend::Mongo => Err(ConfigError::Validation(
            "mongo backend requires the `mongo` feature".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_id_syntax() {
        assert!(parse_object_id("5f1f7e4b9b1e8a3d4c2b1a09").is_some());
        assert!(parse_object_id("not-an-id").is_none());
        assert!(is_object_id(&new_object_id()));
        assert!(!is_object_id(&json!(42)));
    }

    #[test]
    fn backend_names() {
        assert_eq!("MongoDB".parse::<Backend>().unwrap(), Backend::Mongo);
        assert_eq!("postgres".parse::<Backend>().unwrap(), Backend::Postgres);
        assert!("redis".parse::<Backend>().is_err());
    }
}
