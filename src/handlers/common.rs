//! Helpers shared by the method handlers: id resolution, timestamps, body extraction.

use crate::error::{AppError, ErrorDetail};
use crate::io::{DataLayer, Document, Query};
use crate::resource::{FieldType, RegisteredResource};
use axum::extract::rejection::JsonRejection;
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

/// Write timestamp shared by every document touched in one request.
pub(crate) fn now_stamp() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// How a path id addressed an item.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ItemKey {
    Primary(Value),
    Alternate { field: String, value: Value },
}

impl ItemKey {
    pub(crate) fn query(&self, resource: &RegisteredResource) -> Query {
        let mut q = Query::new();
        match self {
            ItemKey::Primary(id) => {
                q.insert(resource.id_field().to_string(), id.clone());
            }
            ItemKey::Alternate { field, value } => {
                q.insert(field.clone(), value.clone());
            }
        }
        q
    }

    /// Writes the key into a document created by an upsert.
    pub(crate) fn seed(&self, resource: &RegisteredResource, doc: &mut Document) {
        match self {
            ItemKey::Primary(id) => {
                doc.insert(resource.id_field().to_string(), id.clone());
            }
            ItemKey::Alternate { field, value } => {
                doc.insert(field.clone(), value.clone());
            }
        }
    }

    pub(crate) fn field<'a>(&'a self, resource: &'a RegisteredResource) -> &'a str {
        match self {
            ItemKey::Primary(_) => resource.id_field(),
            ItemKey::Alternate { field, .. } => field,
        }
    }
}

/// Primary key first; the alternate id only when `raw` is not valid key syntax.
pub(crate) fn resolve_item_key(
    data: &dyn DataLayer,
    resource: &RegisteredResource,
    raw: &str,
) -> Result<ItemKey, AppError> {
    if let Some(id) = data.parse_id(resource.model(), raw) {
        return Ok(ItemKey::Primary(id));
    }
    match resource.alt_id() {
        Some(field) => Ok(ItemKey::Alternate {
            field: field.to_string(),
            value: coerce_path_value(resource, field, raw),
        }),
        None => Err(invalid_id(resource)),
    }
}

pub(crate) fn invalid_id(resource: &RegisteredResource) -> AppError {
    AppError::invalid(ErrorDetail::path(
        &resource.item_param(),
        "value is not a valid id",
        "type_error.id",
    ))
}

/// Path segments are text; numeric and boolean fields compare against typed values.
pub(crate) fn coerce_path_value(resource: &RegisteredResource, field: &str, raw: &str) -> Value {
    let ty = resource.model().get(field).map(|f| &f.ty);
    match ty {
        Some(FieldType::Integer) => raw.parse::<i64>().map(Value::from).unwrap_or_else(|_| json!(raw)),
        Some(FieldType::Float) => raw.parse::<f64>().map(Value::from).unwrap_or_else(|_| json!(raw)),
        Some(FieldType::Boolean) => raw.parse::<bool>().map(Value::from).unwrap_or_else(|_| json!(raw)),
        _ => json!(raw),
    }
}

/// Malformed JSON bodies become a 422 located at `body`.
pub(crate) fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, AppError> {
    body.map(|Json(v)| v).map_err(|rejection| {
        AppError::invalid(ErrorDetail::new(
            vec![json!("body")],
            rejection.body_text(),
            "value_error.jsondecode",
        ))
    })
}
