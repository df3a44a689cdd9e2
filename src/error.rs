//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::OnceLock;
use thiserror::Error;

/// Raised while declaring resources or subscribing to events. Always fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("model {model}: field '{field}' is a data relation but its type is not an id or a list of ids")]
    InvalidRelation { model: String, field: String },
    #[error("resource {resource}: relation target '{target}' is not a registered resource")]
    UnknownRelationTarget { resource: String, target: String },
    #[error("duplicate resource name: {0}")]
    DuplicateResource(String),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("resource {resource}: method {method} is not allowed here")]
    InvalidMethod { resource: String, method: String },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Raw backend failure. Handlers classify it with [`AppError::from_data`].
#[derive(Error, Debug)]
pub enum DataError {
    #[error("database: {0}")]
    Sql(#[from] sqlx::Error),
    #[cfg(feature = "mongo")]
    #[error("mongodb: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("bson: {0}")]
    Bson(String),
    #[error("duplicate value '{value}' for unique field '{field}'")]
    UniqueViolation { field: String, value: Value },
    #[error("memory store: {0}")]
    Memory(String),
    #[error("not connected: call connect() first")]
    NotConnected,
    #[error("connection: {0}")]
    Connection(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// A uniqueness violation recovered from a backend error.
#[derive(Clone, Debug, PartialEq)]
pub struct DuplicateKey {
    pub field: String,
    pub value: Value,
}

impl DataError {
    /// Field and value of a duplicate-key failure, whatever backend raised it.
    pub fn duplicate_key(&self) -> Option<DuplicateKey> {
        match self {
            DataError::UniqueViolation { field, value } => Some(DuplicateKey {
                field: field.clone(),
                value: value.clone(),
            }),
            DataError::Sql(sqlx::Error::Database(db)) if db.code().as_deref() == Some("23505") => {
                let detail = db
                    .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
                    .and_then(|e| e.detail())
                    .unwrap_or_else(|| db.message());
                parse_pg_duplicate(detail)
            }
            #[cfg(feature = "mongo")]
            DataError::Mongo(e) => parse_mongo_duplicate(&e.to_string()),
            _ => None,
        }
    }
}

fn pg_duplicate_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Key \((?P<field>[^)]+)\)=\((?P<value>.*)\) already exists").ok())
        .as_ref()
}

/// `Key (name)=(Curie) already exists.`
pub(crate) fn parse_pg_duplicate(detail: &str) -> Option<DuplicateKey> {
    let caps = pg_duplicate_re()?.captures(detail)?;
    Some(DuplicateKey {
        field: caps["field"].to_string(),
        value: Value::String(caps["value"].to_string()),
    })
}

#[cfg_attr(not(feature = "mongo"), allow(dead_code))]
fn mongo_duplicate_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"E11000 duplicate key error.*dup key: \{ ?(?P<field>[^:]+): (?P<value>.+?) ?\}"#).ok())
        .as_ref()
}

/// `E11000 duplicate key error collection: db.people index: name_1 dup key: { name: "Curie" }`
#[cfg_attr(not(feature = "mongo"), allow(dead_code))]
pub(crate) fn parse_mongo_duplicate(message: &str) -> Option<DuplicateKey> {
    let caps = mongo_duplicate_re()?.captures(message)?;
    let raw = caps["value"].trim();
    let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Some(DuplicateKey {
        field: caps["field"].trim().to_string(),
        value,
    })
}

/// One entry of a 422 body: where the problem is, what it is, and its machine type.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorDetail {
    pub loc: Vec<Value>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ErrorDetail {
    pub fn new(loc: Vec<Value>, msg: impl Into<String>, kind: impl Into<String>) -> Self {
        ErrorDetail {
            loc,
            msg: msg.into(),
            kind: kind.into(),
        }
    }

    /// Detail located under the request body: `["body", <field>]`.
    pub fn body(field: &str, msg: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::new(vec![json!("body"), json!(field)], msg, kind)
    }

    /// Detail located under a query parameter: `["query", <param>]`.
    pub fn query(param: &str, msg: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::new(vec![json!("query"), json!(param)], msg, kind)
    }

    /// Detail located under a path parameter: `["path", <param>]`.
    pub fn path(param: &str, msg: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::new(vec![json!("path"), json!(param)], msg, kind)
    }

    pub fn duplicate(dup: &DuplicateKey) -> Self {
        let shown = match &dup.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self::body(
            &dup.field,
            format!("value '{}' is not unique", shown),
            "value_error.duplicate",
        )
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("not found")]
    NotFound,
    #[error("validation failed")]
    Validation(Vec<ErrorDetail>),
    #[error(transparent)]
    Data(DataError),
    #[error("hook: {0}")]
    Hook(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Turns duplicate-key failures into a 422 naming the field; anything else stays a backend error.
    pub fn from_data(err: DataError) -> Self {
        match err.duplicate_key() {
            Some(dup) => AppError::Validation(vec![ErrorDetail::duplicate(&dup)]),
            None => AppError::Data(err),
        }
    }

    pub fn invalid(detail: ErrorDetail) -> Self {
        AppError::Validation(vec![detail])
    }
}

impl From<DataError> for AppError {
    fn from(err: DataError) -> Self {
        AppError::from_data(err)
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub detail: Value,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            AppError::NotFound => return StatusCode::NOT_FOUND.into_response(),
            AppError::Validation(details) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::to_value(details).unwrap_or(Value::Null),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, Value::String(msg.clone())),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, Value::String(msg.clone())),
            AppError::Config(e) => {
                tracing::error!(error = %e, "configuration error while serving");
                (StatusCode::INTERNAL_SERVER_ERROR, json!("Internal Server Error"))
            }
            AppError::Data(e) => {
                tracing::error!(error = %e, "data layer error");
                (StatusCode::INTERNAL_SERVER_ERROR, json!("Internal Server Error"))
            }
            AppError::Hook(msg) => {
                tracing::error!(error = %msg, "event callback failed");
                (StatusCode::INTERNAL_SERVER_ERROR, json!("Internal Server Error"))
            }
            AppError::Io(e) => {
                tracing::error!(error = %e, "io error");
                (StatusCode::INTERNAL_SERVER_ERROR, json!("Internal Server Error"))
            }
        };
        (status, Json(ErrorBody { detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_postgres_duplicate_detail() {
        let dup = parse_pg_duplicate("Key (name)=(Curie) already exists.").unwrap();
        assert_eq!(dup.field, "name");
        assert_eq!(dup.value, json!("Curie"));
    }

    #[test]
    fn parses_mongo_duplicate_message() {
        let msg = r#"E11000 duplicate key error collection: restgen.people index: name_1 dup key: { name: "Curie" }"#;
        let dup = parse_mongo_duplicate(msg).unwrap();
        assert_eq!(dup.field, "name");
        assert_eq!(dup.value, json!("Curie"));
    }

    #[test]
    fn unique_violation_classifies_as_validation() {
        let err = AppError::from_data(DataError::UniqueViolation {
            field: "name".into(),
            value: json!("Curie"),
        });
        match err {
            AppError::Validation(details) => {
                assert_eq!(details[0].loc, vec![json!("body"), json!("name")]);
                assert_eq!(details[0].kind, "value_error.duplicate");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn other_backend_errors_stay_data_errors() {
        let err = AppError::from_data(DataError::NotConnected);
        assert!(matches!(err, AppError::Data(DataError::NotConnected)));
    }
}
