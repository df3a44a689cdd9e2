//! In-process document store. Collections are vectors of JSON documents keyed by
//! object-id strings; unique fields are enforced on every write.

use crate::error::DataError;
use crate::io::query::{get_path, matches, Query, Stage};
use crate::io::{
    is_object_id, new_object_id, parse_object_id, DataLayer, Document, StoreKind, OBJECT_ID_FIELD,
};
use crate::resource::{Model, RegisteredResource};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Collections = HashMap<String, Vec<Document>>;

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Collections>, DataError> {
        self.collections
            .read()
            .map_err(|_| DataError::Memory("lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Collections>, DataError> {
        self.collections
            .write()
            .map_err(|_| DataError::Memory("lock poisoned".into()))
    }
}

fn unique_fields(resource: &RegisteredResource) -> Vec<&str> {
    std::iter::once(resource.id_field())
        .chain(
            resource
                .model()
                .fields
                .iter()
                .filter(|f| f.unique)
                .map(|f| f.name.as_str()),
        )
        .collect()
}

/// Fails if `candidate` repeats a unique value held by any document except `skip`.
fn check_unique(
    docs: &[Document],
    candidate: &Document,
    fields: &[&str],
    skip: Option<usize>,
) -> Result<(), DataError> {
    for field in fields {
        let Some(value) = candidate.get(*field).filter(|v| !v.is_null()) else {
            continue;
        };
        let taken = docs
            .iter()
            .enumerate()
            .any(|(i, d)| Some(i) != skip && d.get(*field) == Some(value));
        if taken {
            return Err(DataError::UniqueViolation {
                field: field.to_string(),
                value: value.clone(),
            });
        }
    }
    Ok(())
}

fn with_id(mut payload: Document, id_field: &str) -> Document {
    if payload.get(id_field).map_or(true, Value::is_null) {
        payload.insert(id_field.to_string(), new_object_id());
    }
    payload
}

fn page(docs: Vec<Document>, skip: u64, limit: u64) -> (Vec<Document>, u64) {
    let total = docs.len() as u64;
    let iter = docs.into_iter().skip(skip as usize);
    let items = if limit == 0 {
        iter.collect()
    } else {
        iter.take(limit as usize).collect()
    };
    (items, total)
}

fn lookup(
    docs: Vec<Document>,
    foreign: &[Document],
    local_field: &str,
    foreign_field: &str,
    as_field: &str,
) -> Vec<Document> {
    docs.into_iter()
        .map(|mut doc| {
            let local = get_path(&doc, local_field).cloned().unwrap_or(Value::Null);
            let joined: Vec<Value> = foreign
                .iter()
                .filter(|f| {
                    let Some(key) = f.get(foreign_field) else {
                        return false;
                    };
                    match &local {
                        Value::Array(ids) => ids.contains(key),
                        other => other == key,
                    }
                })
                .cloned()
                .map(Value::Object)
                .collect();
            doc.insert(as_field.to_string(), Value::Array(joined));
            doc
        })
        .collect()
}

fn unwind(docs: Vec<Document>, field: &str) -> Vec<Document> {
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        match doc.get(field) {
            Some(Value::Array(items)) => {
                for item in items.clone() {
                    let mut d = doc.clone();
                    d.insert(field.to_string(), item);
                    out.push(d);
                }
            }
            Some(Value::Null) | None => {}
            Some(_) => out.push(doc),
        }
    }
    out
}

fn add_field(docs: Vec<Document>, field: &str, from_path: &str) -> Vec<Document> {
    docs.into_iter()
        .map(|mut doc| {
            if let Some(v) = get_path(&doc, from_path).cloned() {
                doc.insert(field.to_string(), v);
            }
            doc
        })
        .collect()
}

#[async_trait]
impl DataLayer for MemoryStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Document
    }

    fn primary_key(&self, _model: &Model) -> String {
        OBJECT_ID_FIELD.to_string()
    }

    fn parse_id(&self, _model: &Model, raw: &str) -> Option<Value> {
        parse_object_id(raw)
    }

    fn is_valid_id(&self, value: &Value) -> bool {
        is_object_id(value)
    }

    async fn connect(&self, resources: &[Arc<RegisteredResource>]) -> Result<(), DataError> {
        let mut collections = self.write()?;
        for r in resources {
            collections.entry(r.name().to_string()).or_default();
        }
        tracing::info!(collections = collections.len(), "memory store ready");
        Ok(())
    }

    async fn close(&self) -> Result<(), DataError> {
        tracing::info!("memory store closed");
        Ok(())
    }

    async fn find(
        &self,
        resource: &RegisteredResource,
        query: &Query,
        skip: u64,
        limit: u64,
    ) -> Result<(Vec<Document>, u64), DataError> {
        let collections = self.read()?;
        let docs: Vec<Document> = collections
            .get(resource.name())
            .map(|docs| docs.iter().filter(|d| matches(d, query)).cloned().collect())
            .unwrap_or_default();
        Ok(page(docs, skip, limit))
    }

    async fn find_one(
        &self,
        resource: &RegisteredResource,
        query: &Query,
    ) -> Result<Option<Document>, DataError> {
        let collections = self.read()?;
        Ok(collections
            .get(resource.name())
            .and_then(|docs| docs.iter().find(|d| matches(d, query)).cloned()))
    }

    async fn aggregate(
        &self,
        resource: &RegisteredResource,
        pipeline: &[Stage],
        skip: u64,
        limit: u64,
    ) -> Result<(Vec<Document>, u64), DataError> {
        let collections = self.read()?;
        let empty = Vec::new();
        let mut docs: Vec<Document> = collections.get(resource.name()).unwrap_or(&empty).clone();
        for stage in pipeline {
            tracing::debug!(collection = %resource.name(), stage = stage_name(stage), "pipeline stage");
            docs = match stage {
                Stage::Match(query) => docs.into_iter().filter(|d| matches(d, query)).collect(),
                Stage::Lookup {
                    from,
                    local_field,
                    foreign_field,
                    as_field,
                } => {
                    let foreign = collections.get(from.name()).unwrap_or(&empty);
                    lookup(docs, foreign, local_field, foreign_field, as_field)
                }
                Stage::Unwind(field) => unwind(docs, field),
                Stage::AddField { field, from_path } => add_field(docs, field, from_path),
            };
        }
        Ok(page(docs, skip, limit))
    }

    async fn create(&self, resource: &RegisteredResource, payload: Document) -> Result<Document, DataError> {
        let doc = with_id(payload, resource.id_field());
        let mut collections = self.write()?;
        let docs = collections.entry(resource.name().to_string()).or_default();
        check_unique(docs, &doc, &unique_fields(resource), None)?;
        docs.push(doc.clone());
        Ok(doc)
    }

    async fn create_many(
        &self,
        resource: &RegisteredResource,
        payloads: Vec<Document>,
    ) -> Result<Vec<Document>, DataError> {
        let fields = unique_fields(resource);
        let mut collections = self.write()?;
        let docs = collections.entry(resource.name().to_string()).or_default();
        let mut batch: Vec<Document> = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let doc = with_id(payload, resource.id_field());
            check_unique(docs, &doc, &fields, None)?;
            check_unique(&batch, &doc, &fields, None)?;
            batch.push(doc);
        }
        docs.extend(batch.iter().cloned());
        Ok(batch)
    }

    async fn remove(&self, resource: &RegisteredResource) -> Result<(), DataError> {
        let mut collections = self.write()?;
        if let Some(docs) = collections.get_mut(resource.name()) {
            docs.clear();
        }
        Ok(())
    }

    async fn remove_item(&self, resource: &RegisteredResource, query: &Query) -> Result<(), DataError> {
        let mut collections = self.write()?;
        if let Some(docs) = collections.get_mut(resource.name()) {
            if let Some(i) = docs.iter().position(|d| matches(d, query)) {
                docs.remove(i);
            }
        }
        Ok(())
    }

    async fn replace_item(
        &self,
        resource: &RegisteredResource,
        query: &Query,
        mut payload: Document,
    ) -> Result<(), DataError> {
        let fields = unique_fields(resource);
        let mut collections = self.write()?;
        let Some(docs) = collections.get_mut(resource.name()) else {
            return Ok(());
        };
        let Some(i) = docs.iter().position(|d| matches(d, query)) else {
            return Ok(());
        };
        if let Some(id) = docs[i].get(resource.id_field()).cloned() {
            payload.insert(resource.id_field().to_string(), id);
        }
        check_unique(docs, &payload, &fields, Some(i))?;
        docs[i] = payload;
        Ok(())
    }

    async fn update_item(
        &self,
        resource: &RegisteredResource,
        query: &Query,
        payload: Document,
    ) -> Result<(), DataError> {
        let fields = unique_fields(resource);
        let mut collections = self.write()?;
        let Some(docs) = collections.get_mut(resource.name()) else {
            return Ok(());
        };
        let Some(i) = docs.iter().position(|d| matches(d, query)) else {
            return Ok(());
        };
        let mut merged = docs[i].clone();
        for (k, v) in payload {
            if k != resource.id_field() {
                merged.insert(k, v);
            }
        }
        check_unique(docs, &merged, &fields, Some(i))?;
        docs[i] = merged;
        Ok(())
    }
}

fn stage_name(stage: &Stage) -> &'static str {
    match stage {
        Stage::Match(_) => "$match",
        Stage::Lookup { .. } => "$lookup",
        Stage::Unwind(_) => "$unwind",
        Stage::AddField { .. } => "$addFields",
    }
}
