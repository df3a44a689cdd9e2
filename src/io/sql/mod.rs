//! Postgres data layer: one table per resource, queries built by [`builder`].

pub mod builder;
pub mod params;
pub mod table;

use crate::error::DataError;
use crate::io::{DataLayer, Document, Query, Stage, StoreKind};
use crate::resource::{FieldType, Model, RegisteredResource};
use async_trait::async_trait;
use builder::{insert, sets_serial_pk, sync_serial, truncate, QueryBuf, Select};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use table::{ensure_database_exists, Table, IMPLICIT_PK};

pub use params::PgBindValue;

pub struct PgStore {
    uri: String,
    timeout: Duration,
    pool: RwLock<Option<PgPool>>,
}

impl PgStore {
    /// Store for `uri`; nothing connects until [`DataLayer::connect`].
    pub fn new(uri: impl Into<String>, timeout: Duration) -> Self {
        PgStore {
            uri: uri.into(),
            timeout,
            pool: RwLock::new(None),
        }
    }

    /// Store over an existing pool. `connect` still creates missing tables.
    pub fn with_pool(pool: PgPool) -> Self {
        PgStore {
            uri: String::new(),
            timeout: Duration::from_secs(10),
            pool: RwLock::new(Some(pool)),
        }
    }

    fn pool(&self) -> Result<PgPool, DataError> {
        self.pool
            .read()
            .map_err(|_| DataError::NotConnected)?
            .clone()
            .ok_or(DataError::NotConnected)
    }

    async fn fetch_page(&self, table: &Table, q: QueryBuf) -> Result<(Vec<Document>, u64), DataError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query_as::<_, (i64, Value)>(&q.sql);
        for p in q.params {
            query = query.bind(p);
        }
        let (total, data) = query.fetch_one(&self.pool()?).await?;
        let docs = match data {
            Value::Array(rows) => rows.into_iter().filter_map(|row| into_document(table, row)).collect(),
            _ => Vec::new(),
        };
        Ok((docs, total.max(0) as u64))
    }

    async fn fetch_optional(&self, table: &Table, q: QueryBuf) -> Result<Option<Document>, DataError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query_scalar::<_, Value>(&q.sql);
        for p in q.params {
            query = query.bind(p);
        }
        let row = query.fetch_optional(&self.pool()?).await?;
        Ok(row.and_then(|row| into_document(table, row)))
    }

    async fn execute(&self, q: QueryBuf) -> Result<u64, DataError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in q.params {
            query = query.bind(p);
        }
        Ok(query.execute(&self.pool()?).await?.rows_affected())
    }
}

/// Rows come back as JSON; timestamps are rewritten to UTC with millisecond precision.
fn into_document(table: &Table, row: Value) -> Option<Document> {
    let Value::Object(mut doc) = row else {
        return None;
    };
    for column in table.columns.iter().filter(|c| c.datetime) {
        if let Some(Value::String(s)) = doc.get(&column.name) {
            if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                let utc = t.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Millis, true);
                doc.insert(column.name.clone(), Value::String(utc));
            }
        }
    }
    Some(doc)
}

#[async_trait]
impl DataLayer for PgStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Relational
    }

    fn primary_key(&self, model: &Model) -> String {
        model
            .primary_key()
            .map(|f| f.name.clone())
            .unwrap_or_else(|| IMPLICIT_PK.to_string())
    }

    fn parse_id(&self, model: &Model, raw: &str) -> Option<Value> {
        match model.primary_key().map(|f| &f.ty) {
            None | Some(FieldType::Integer) => raw.parse::<i64>().ok().map(Value::from),
            Some(_) => Some(Value::String(raw.to_string())),
        }
    }

    fn is_valid_id(&self, value: &Value) -> bool {
        value.is_i64() || value.is_u64() || value.as_str().is_some_and(|s| !s.is_empty())
    }

    async fn connect(&self, resources: &[Arc<RegisteredResource>]) -> Result<(), DataError> {
        let pool = match self.pool() {
            Ok(pool) => pool,
            Err(_) => {
                if let Err(e) = ensure_database_exists(&self.uri).await {
                    tracing::warn!(error = %e, "could not ensure database exists");
                }
                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .acquire_timeout(self.timeout)
                    .connect(&self.uri)
                    .await
                    .map_err(|e| DataError::Connection(e.to_string()))?;
                *self.pool.write().map_err(|_| DataError::NotConnected)? = Some(pool.clone());
                pool
            }
        };
        for resource in resources {
            let ddl = Table::of(resource).create_ddl();
            tracing::debug!(sql = %ddl, "ensure table");
            sqlx::query(&ddl).execute(&pool).await?;
        }
        tracing::info!(tables = resources.len(), "postgres connected");
        Ok(())
    }

    async fn close(&self) -> Result<(), DataError> {
        let pool = self.pool.write().map_err(|_| DataError::NotConnected)?.take();
        if let Some(pool) = pool {
            pool.close().await;
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
        let table = Table::of(resource);
        let q = Select::new(&table).filter(query)?.page(skip, limit);
        self.fetch_page(&table, q).await
    }

    async fn find_one(
        &self,
        resource: &RegisteredResource,
        query: &Query,
    ) -> Result<Option<Document>, DataError> {
        let table = Table::of(resource);
        let q = Select::new(&table).filter(query)?.one();
        self.fetch_optional(&table, q).await
    }

    async fn aggregate(
        &self,
        resource: &RegisteredResource,
        pipeline: &[Stage],
        skip: u64,
        limit: u64,
    ) -> Result<(Vec<Document>, u64), DataError> {
        let table = Table::of(resource);
        let q = Select::new(&table).pipeline(pipeline)?.page(skip, limit);
        self.fetch_page(&table, q).await
    }

    async fn create(&self, resource: &RegisteredResource, payload: Document) -> Result<Document, DataError> {
        let table = Table::of(resource);
        if !sets_serial_pk(&table, &payload) {
            return self
                .fetch_optional(&table, insert(&table, &payload))
                .await?
                .ok_or_else(|| DataError::Unsupported("insert returned no row".into()));
        }
        self.create_many(resource, vec![payload])
            .await?
            .pop()
            .ok_or_else(|| DataError::Unsupported("insert returned no row".into()))
    }

    async fn create_many(
        &self,
        resource: &RegisteredResource,
        payloads: Vec<Document>,
    ) -> Result<Vec<Document>, DataError> {
        let table = Table::of(resource);
        let mut tx = self.pool()?.begin().await?;
        let mut out = Vec::with_capacity(payloads.len());
        for payload in &payloads {
            let q = insert(&table, payload);
            tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
            let mut query = sqlx::query_scalar::<_, Value>(&q.sql);
            for p in q.params {
                query = query.bind(p);
            }
            let row = query.fetch_one(&mut *tx).await?;
            if let Some(doc) = into_document(&table, row) {
                out.push(doc);
            }
        }
        if payloads.iter().any(|p| sets_serial_pk(&table, p)) {
            let q = sync_serial(&table);
            tracing::debug!(sql = %q.sql, "query (tx)");
            sqlx::query(&q.sql).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(out)
    }

    async fn remove(&self, resource: &RegisteredResource) -> Result<(), DataError> {
        self.execute(truncate(&Table::of(resource))).await?;
        Ok(())
    }

    async fn remove_item(&self, resource: &RegisteredResource, query: &Query) -> Result<(), DataError> {
        let table = Table::of(resource);
        self.execute(Select::new(&table).filter(query)?.delete()).await?;
        Ok(())
    }

    async fn replace_item(
        &self,
        resource: &RegisteredResource,
        query: &Query,
        payload: Document,
    ) -> Result<(), DataError> {
        let table = Table::of(resource);
        let q = Select::new(&table).filter(query)?.update(&payload, true);
        self.execute(q).await?;
        Ok(())
    }

    async fn update_item(
        &self,
        resource: &RegisteredResource,
        query: &Query,
        payload: Document,
    ) -> Result<(), DataError> {
        let table = Table::of(resource);
        let q = Select::new(&table).filter(query)?.update(&payload, false);
        self.execute(q).await?;
        Ok(())
    }
}
