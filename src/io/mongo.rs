//! MongoDB data layer: one collection per resource, ObjectId keys.

use crate::error::DataError;
use crate::io::{new_object_id, is_object_id, parse_object_id, DataLayer, Document, Query, Stage, StoreKind, OBJECT_ID_FIELD};
use crate::resource::{FieldType, Model, RegisteredResource, CREATED, UPDATED};
use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::TryStreamExt;
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, IndexModel};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub struct MongoStore {
    uri: String,
    database: String,
    timeout: Duration,
    client: RwLock<Option<Client>>,
}

impl MongoStore {
    pub fn new(uri: impl Into<String>, database: impl Into<String>, timeout: Duration) -> Self {
        MongoStore {
            uri: uri.into(),
            database: database.into(),
            timeout,
            client: RwLock::new(None),
        }
    }

    fn client(&self) -> Result<Client, DataError> {
        self.client
            .read()
            .map_err(|_| DataError::NotConnected)?
            .clone()
            .ok_or(DataError::NotConnected)
    }

    fn collection(&self, resource: &RegisteredResource) -> Result<Collection<bson::Document>, DataError> {
        Ok(self
            .client()?
            .database(&self.database)
            .collection::<bson::Document>(resource.name()))
    }
}

/// Whether values under `key` are stored as ObjectIds or BSON dates.
#[derive(Clone, Copy, PartialEq)]
enum Storage {
    ObjectId,
    Date,
    Plain,
}

fn storage_of(model: &Model, key: &str) -> Storage {
    if key == OBJECT_ID_FIELD || key.ends_with("._id") {
        return Storage::ObjectId;
    }
    if key == CREATED || key == UPDATED {
        return Storage::Date;
    }
    match model.get(key).map(|f| &f.ty) {
        Some(FieldType::Id) => Storage::ObjectId,
        Some(FieldType::List(inner)) if **inner == FieldType::Id => Storage::ObjectId,
        Some(FieldType::Datetime) => Storage::Date,
        _ => Storage::Plain,
    }
}

fn value_to_bson(v: &Value, storage: Storage) -> Result<Bson, DataError> {
    match (storage, v) {
        (Storage::ObjectId, Value::String(s)) => match ObjectId::parse_str(s) {
            Ok(oid) => Ok(Bson::ObjectId(oid)),
            Err(_) => Ok(Bson::String(s.clone())),
        },
        (Storage::Date, Value::String(s)) => match DateTime::parse_from_rfc3339(s) {
            Ok(t) => Ok(Bson::DateTime(bson::DateTime::from_millis(t.timestamp_millis()))),
            Err(_) => Ok(Bson::String(s.clone())),
        },
        (_, Value::Array(items)) if storage != Storage::Plain => items
            .iter()
            .map(|item| value_to_bson(item, storage))
            .collect::<Result<Vec<_>, _>>()
            .map(Bson::Array),
        _ => bson::to_bson(v).map_err(|e| DataError::Bson(e.to_string())),
    }
}

fn to_bson_doc(model: &Model, doc: &Document) -> Result<bson::Document, DataError> {
    let mut out = bson::Document::new();
    for (key, value) in doc {
        out.insert(key.clone(), value_to_bson(value, storage_of(model, key))?);
    }
    Ok(out)
}

fn bson_to_value(b: Bson) -> Value {
    match b {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => DateTime::<Utc>::from_timestamp_millis(dt.timestamp_millis())
            .map(|t| Value::String(t.to_rfc3339_opts(SecondsFormat::Millis, true)))
            .unwrap_or(Value::Null),
        Bson::Document(d) => Value::Object(from_bson_doc(d)),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_value).collect()),
        Bson::String(s) => Value::String(s),
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(n) => Value::from(n),
        Bson::Int64(n) => Value::from(n),
        Bson::Double(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        Bson::Null | Bson::Undefined => Value::Null,
        other => other.into_relaxed_extjson(),
    }
}

fn from_bson_doc(d: bson::Document) -> Document {
    d.into_iter().map(|(k, v)| (k, bson_to_value(v))).collect()
}

fn stage_to_bson(model: &Model, stage: &Stage) -> Result<bson::Document, DataError> {
    Ok(match stage {
        Stage::Match(q) => doc! { "$match": to_bson_doc(model, q)? },
        Stage::Lookup {
            from,
            local_field,
            foreign_field,
            as_field,
        } => doc! {
            "$lookup": {
                "from": from.name(),
                "localField": local_field,
                "foreignField": foreign_field,
                "as": as_field,
            }
        },
        Stage::Unwind(field) => doc! { "$unwind": format!("${}", field) },
        Stage::AddField { field, from_path } => doc! {
            "$addFields": { field: format!("${}", from_path) }
        },
    })
}

#[async_trait]
impl DataLayer for MongoStore {
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
        let mut options = ClientOptions::parse(&self.uri)
            .await
            .map_err(|e| DataError::Connection(e.to_string()))?;
        options.server_selection_timeout = Some(self.timeout);
        options.connect_timeout = Some(self.timeout);
        let client = Client::with_options(options).map_err(|e| DataError::Connection(e.to_string()))?;
        let db = client.database(&self.database);
        for resource in resources {
            let coll = db.collection::<bson::Document>(resource.name());
            for field in resource.model().fields.iter().filter(|f| f.unique) {
                let index = IndexModel::builder()
                    .keys(doc! { field.name.as_str(): 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build();
                coll.create_index(index).await?;
            }
        }
        *self.client.write().map_err(|_| DataError::NotConnected)? = Some(client);
        tracing::info!(database = %self.database, collections = resources.len(), "mongodb connected");
        Ok(())
    }

    async fn close(&self) -> Result<(), DataError> {
        let client = self.client.write().map_err(|_| DataError::NotConnected)?.take();
        if let Some(client) = client {
            client.shutdown().await;
        }
        Ok(())
    }

    async fn find(
        &self,
        resource: &RegisteredResource,
        query: &Query,
        skip: u64,
        limit: u64,
    ) -> Result<(Vec<Document>, u64), DataError> {
        let coll = self.collection(resource)?;
        let filter = to_bson_doc(resource.model(), query)?;
        tracing::debug!(collection = %resource.name(), filter = %filter, skip, limit, "find");
        let total = coll.count_documents(filter.clone()).await?;
        let mut find = coll.find(filter).sort(doc! { OBJECT_ID_FIELD: 1 }).skip(skip);
        if limit > 0 {
            find = find.limit(limit as i64);
        }
        let docs: Vec<bson::Document> = find.await?.try_collect().await?;
        Ok((docs.into_iter().map(from_bson_doc).collect(), total))
    }

    async fn find_one(
        &self,
        resource: &RegisteredResource,
        query: &Query,
    ) -> Result<Option<Document>, DataError> {
        let filter = to_bson_doc(resource.model(), query)?;
        Ok(self.collection(resource)?.find_one(filter).await?.map(from_bson_doc))
    }

    async fn aggregate(
        &self,
        resource: &RegisteredResource,
        pipeline: &[Stage],
        skip: u64,
        limit: u64,
    ) -> Result<(Vec<Document>, u64), DataError> {
        let mut stages = pipeline
            .iter()
            .map(|s| stage_to_bson(resource.model(), s))
            .collect::<Result<Vec<_>, _>>()?;
        let mut page = vec![doc! { "$skip": skip as i64 }];
        if limit > 0 {
            page.push(doc! { "$limit": limit as i64 });
        }
        stages.push(doc! { "$sort": { OBJECT_ID_FIELD: 1 } });
        stages.push(doc! {
            "$facet": {
                "data": page,
                "count": [ { "$count": "total" } ],
            }
        });
        tracing::debug!(collection = %resource.name(), stages = stages.len(), "aggregate");

        let results: Vec<bson::Document> = self.collection(resource)?.aggregate(stages).await?.try_collect().await?;
        let Some(facet) = results.into_iter().next() else {
            return Ok((Vec::new(), 0));
        };
        let total = facet
            .get_array("count")
            .ok()
            .and_then(|c| c.first())
            .and_then(Bson::as_document)
            .and_then(|d| match d.get("total") {
                Some(Bson::Int32(n)) => Some(*n as u64),
                Some(Bson::Int64(n)) => Some(*n as u64),
                _ => None,
            })
            .unwrap_or(0);
        let docs = match facet.get("data") {
            Some(Bson::Array(items)) => items
                .iter()
                .filter_map(|b| b.as_document().cloned())
                .map(from_bson_doc)
                .collect(),
            _ => Vec::new(),
        };
        Ok((docs, total))
    }

    async fn create(&self, resource: &RegisteredResource, mut payload: Document) -> Result<Document, DataError> {
        if !payload.contains_key(OBJECT_ID_FIELD) {
            payload.insert(OBJECT_ID_FIELD.to_string(), new_object_id());
        }
        let doc = to_bson_doc(resource.model(), &payload)?;
        self.collection(resource)?.insert_one(doc).await?;
        Ok(payload)
    }

    async fn create_many(
        &self,
        resource: &RegisteredResource,
        mut payloads: Vec<Document>,
    ) -> Result<Vec<Document>, DataError> {
        let mut docs = Vec::with_capacity(payloads.len());
        for payload in &mut payloads {
            if !payload.contains_key(OBJECT_ID_FIELD) {
                payload.insert(OBJECT_ID_FIELD.to_string(), new_object_id());
            }
            docs.push(to_bson_doc(resource.model(), payload)?);
        }
        self.collection(resource)?.insert_many(docs).await?;
        Ok(payloads)
    }

    async fn remove(&self, resource: &RegisteredResource) -> Result<(), DataError> {
        self.collection(resource)?.delete_many(doc! {}).await?;
        Ok(())
    }

    async fn remove_item(&self, resource: &RegisteredResource, query: &Query) -> Result<(), DataError> {
        let filter = to_bson_doc(resource.model(), query)?;
        self.collection(resource)?.delete_one(filter).await?;
        Ok(())
    }

    async fn replace_item(
        &self,
        resource: &RegisteredResource,
        query: &Query,
        mut payload: Document,
    ) -> Result<(), DataError> {
        payload.remove(OBJECT_ID_FIELD);
        let filter = to_bson_doc(resource.model(), query)?;
        let replacement = to_bson_doc(resource.model(), &payload)?;
        self.collection(resource)?.replace_one(filter, replacement).await?;
        Ok(())
    }

    async fn update_item(
        &self,
        resource: &RegisteredResource,
        query: &Query,
        mut payload: Document,
    ) -> Result<(), DataError> {
        payload.remove(OBJECT_ID_FIELD);
        if payload.is_empty() {
            return Ok(());
        }
        let filter = to_bson_doc(resource.model(), query)?;
        let set = to_bson_doc(resource.model(), &payload)?;
        self.collection(resource)?.update_one(filter, doc! { "$set": set }).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Field;
    use serde_json::json;

    fn model() -> Model {
        Model::new("Cities")
            .field(Field::id("country_id"))
            .field(Field::datetime("founded"))
            .field(Field::string("name"))
    }

    #[test]
    fn ids_and_dates_round_trip_through_bson() {
        let oid = "5f1f7e4b9b1e8a3d4c2b1a09";
        let doc = json!({
            "_id": oid,
            "country_id": oid,
            "founded": "1541-02-12T00:00:00.000Z",
            "_created": "2024-05-01T10:00:00.250Z",
            "name": "Santiago",
        });
        let b = to_bson_doc(&model(), doc.as_object().unwrap()).unwrap();
        assert!(matches!(b.get("_id"), Some(Bson::ObjectId(_))));
        assert!(matches!(b.get("country_id"), Some(Bson::ObjectId(_))));
        assert!(matches!(b.get("_created"), Some(Bson::DateTime(_))));
        assert!(matches!(b.get("name"), Some(Bson::String(_))));
        assert_eq!(Value::Object(from_bson_doc(b)), doc);
    }

    #[test]
    fn pipeline_stages_render_as_mongo_operators() {
        let stage = Stage::AddField {
            field: "country_id".into(),
            from_path: "country_id._id".into(),
        };
        assert_eq!(
            stage_to_bson(&model(), &stage).unwrap(),
            doc! { "$addFields": { "country_id": "$country_id._id" } }
        );
        assert_eq!(
            stage_to_bson(&model(), &Stage::Unwind("country_id".into())).unwrap(),
            doc! { "$unwind": "$country_id" }
        );
    }
}
