//! Backend-neutral filters and aggregation stages.

use crate::io::Document;
use crate::resource::RegisteredResource;
use serde_json::Value;
use std::sync::Arc;

/// Equality filter. Keys may be dotted paths into embedded documents (`leader.name`).
pub type Query = Document;

/// One step of an aggregation pipeline.
#[derive(Clone, Debug)]
pub enum Stage {
    /// Keep documents whose fields equal the given values.
    Match(Query),
    /// Attach the documents of `from` whose `foreign_field` equals this document's
    /// `local_field` (or any element of it, when it is a list) as an array under `as_field`.
    Lookup {
        from: Arc<RegisteredResource>,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    /// One output document per element of the array at `field`; documents with an
    /// empty or missing array are dropped.
    Unwind(String),
    /// Set `field` to the value found at dotted `from_path`.
    AddField { field: String, from_path: String },
}

impl Stage {
    pub fn lookup(from: Arc<RegisteredResource>, local_field: &str, as_field: &str) -> Stage {
        Stage::Lookup {
            foreign_field: from.id_field().to_string(),
            from,
            local_field: local_field.to_string(),
            as_field: as_field.to_string(),
        }
    }
}

/// Reads a dotted path (`a.b.c`) out of a document.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Mongo-style equality: a scalar condition also matches an array containing it.
pub fn matches(doc: &Document, query: &Query) -> bool {
    query.iter().all(|(path, expected)| match get_path(doc, path) {
        Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
        Some(actual) => actual == expected,
        None => expected.is_null(),
    })
}
