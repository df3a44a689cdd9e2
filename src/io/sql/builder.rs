//! Builds parameterized SQL from queries and pipelines: identifiers from resource
//! declarations only, values as parameters with explicit casts.

use crate::error::DataError;
use crate::io::sql::params::PgBindValue;
use crate::io::sql::table::{quoted, Column, Table};
use crate::io::{Document, Query, Stage};
use crate::resource::RegisteredResource;
use serde_json::{json, Value};
use std::sync::Arc;

/// Alias of the queried table in every statement.
const MAIN: &str = "main";

static NULL: Value = Value::Null;

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Registers a parameter and returns its cast placeholder.
    fn push_param(&mut self, v: &Value, column: &Column) -> String {
        self.params.push(PgBindValue::for_column(v, column));
        format!("${}::{}", self.params.len(), column.cast)
    }
}

/// A related table joined by a lookup stage.
struct Join {
    as_field: String,
    local: String,
    foreign: String,
    target: Table,
    many: bool,
    /// Cleared when a later stage writes the foreign key back.
    embedded: bool,
}

impl Join {
    /// Predicate tying a row `j` of the target to the current main row.
    fn on(&self, j: &str) -> String {
        let foreign = format!("{}.{}::text", j, quoted(&self.foreign));
        let local = format!("{}.{}", MAIN, quoted(&self.local));
        if self.many {
            format!("{} IN (SELECT jsonb_array_elements_text({}))", foreign, local)
        } else {
            format!("{} = {}::text", foreign, local)
        }
    }

    fn subquery(&self) -> String {
        let from = format!("{} j WHERE {}", quoted(&self.target.name), self.on("j"));
        if self.many {
            format!("(SELECT COALESCE(json_agg(row_to_json(j)), '[]'::json) FROM {})", from)
        } else {
            format!("(SELECT row_to_json(j) FROM {} LIMIT 1)", from)
        }
    }
}

/// A SELECT over one table, narrowed and joined stage by stage.
pub struct Select<'a> {
    table: &'a Table,
    q: QueryBuf,
    conditions: Vec<String>,
    joins: Vec<Join>,
}

impl<'a> Select<'a> {
    pub fn new(table: &'a Table) -> Self {
        Select {
            table,
            q: QueryBuf::new(),
            conditions: Vec::new(),
            joins: Vec::new(),
        }
    }

    pub fn filter(mut self, query: &Query) -> Result<Self, DataError> {
        self.push_match(query)?;
        Ok(self)
    }

    pub fn pipeline(mut self, pipeline: &[Stage]) -> Result<Self, DataError> {
        for stage in pipeline {
            self.push_stage(stage)?;
        }
        Ok(self)
    }

    fn push_stage(&mut self, stage: &Stage) -> Result<(), DataError> {
        match stage {
            Stage::Match(q) => self.push_match(q),
            Stage::Lookup {
                from,
                local_field,
                foreign_field,
                as_field,
            } => self.push_lookup(from, local_field, foreign_field, as_field),
            Stage::Unwind(field) => {
                let join = self.join(field)?;
                if join.many {
                    return Err(DataError::Unsupported(format!("unwinding list relation '{}'", field)));
                }
                let cond = format!(
                    "EXISTS (SELECT 1 FROM {} j WHERE {})",
                    quoted(&join.target.name),
                    join.on("j")
                );
                self.conditions.push(cond);
                Ok(())
            }
            Stage::AddField { field, from_path } => {
                let join = self
                    .joins
                    .iter_mut()
                    .find(|j| &j.as_field == field)
                    .ok_or_else(|| DataError::Unsupported(format!("computed field '{}'", field)))?;
                if *from_path != format!("{}.{}", join.as_field, join.foreign) || join.local != *field {
                    return Err(DataError::Unsupported(format!("computed field '{}'", field)));
                }
                join.embedded = false;
                Ok(())
            }
        }
    }

    fn push_lookup(
        &mut self,
        from: &Arc<RegisteredResource>,
        local: &str,
        foreign: &str,
        as_field: &str,
    ) -> Result<(), DataError> {
        let column = self
            .table
            .column(local)
            .ok_or_else(|| DataError::Unsupported(format!("lookup on unknown column '{}'", local)))?;
        self.joins.retain(|j| j.as_field != as_field);
        self.joins.push(Join {
            as_field: as_field.to_string(),
            local: local.to_string(),
            foreign: foreign.to_string(),
            target: Table::of(from),
            many: column.list,
            embedded: true,
        });
        Ok(())
    }

    fn join(&self, as_field: &str) -> Result<&Join, DataError> {
        self.joins
            .iter()
            .find(|j| j.as_field == as_field)
            .ok_or_else(|| DataError::Unsupported(format!("'{}' is not a joined relation", as_field)))
    }

    fn push_match(&mut self, query: &Query) -> Result<(), DataError> {
        for (key, value) in query {
            let cond = match key.split_once('.') {
                None => {
                    let column = self
                        .table
                        .column(key)
                        .ok_or_else(|| DataError::Unsupported(format!("filter on unknown column '{}'", key)))?;
                    compare(&mut self.q, MAIN, column, value)
                }
                Some((relation, field)) => {
                    let join = self.join(relation)?;
                    let column = join.target.column(field).ok_or_else(|| {
                        DataError::Unsupported(format!("filter on unknown column '{}'", key))
                    })?;
                    let on = join.on("j");
                    let target = quoted(&join.target.name);
                    let column = column.clone();
                    let test = compare(&mut self.q, "j", &column, value);
                    format!("EXISTS (SELECT 1 FROM {} j WHERE {} AND {})", target, on, test)
                }
            };
            self.conditions.push(cond);
        }
        Ok(())
    }

    fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    /// Output columns; embedded relations replace their foreign-key column.
    fn output_columns(&self) -> String {
        let mut out: Vec<String> = self
            .table
            .columns
            .iter()
            .map(|c| {
                match self.joins.iter().find(|j| j.embedded && j.as_field == c.name) {
                    Some(join) => format!("{} AS {}", join.subquery(), quoted(&c.name)),
                    None => format!("{}.{}", MAIN, quoted(&c.name)),
                }
            })
            .collect();
        for join in self.joins.iter().filter(|j| j.embedded) {
            if self.table.column(&join.as_field).is_none() {
                out.push(format!("{} AS {}", join.subquery(), quoted(&join.as_field)));
            }
        }
        out.join(", ")
    }

    /// One page in key order plus the total match count, as `(total, json array)`.
    pub fn page(self, skip: u64, limit: u64) -> QueryBuf {
        let pk = quoted(&self.table.pk);
        let limit_clause = if limit > 0 {
            format!(" LIMIT {}", limit)
        } else {
            String::new()
        };
        let offset_clause = if skip > 0 {
            format!(" OFFSET {}", skip)
        } else {
            String::new()
        };
        let sql = format!(
            "WITH matched AS (SELECT * FROM {table} {MAIN}{where_clause}) \
             SELECT (SELECT COUNT(*) FROM matched) AS total, \
             (SELECT COALESCE(json_agg(page ORDER BY page.{pk}), '[]'::json) FROM \
             (SELECT {cols} FROM matched {MAIN} ORDER BY {MAIN}.{pk}{limit_clause}{offset_clause}) page) AS data",
            table = quoted(&self.table.name),
            where_clause = self.where_clause(),
            cols = self.output_columns(),
        );
        QueryBuf {
            sql,
            params: self.q.params,
        }
    }

    /// First match as one JSON object.
    pub fn one(self) -> QueryBuf {
        QueryBuf {
            sql: format!(
                "SELECT row_to_json({MAIN}) FROM {} {MAIN}{} LIMIT 1",
                quoted(&self.table.name),
                self.where_clause()
            ),
            params: self.q.params,
        }
    }

    pub fn delete(self) -> QueryBuf {
        QueryBuf {
            sql: format!(
                "DELETE FROM {} AS {MAIN}{}",
                quoted(&self.table.name),
                self.where_clause()
            ),
            params: self.q.params,
        }
    }

    /// UPDATE of the matched rows. `replace` nulls every column `doc` leaves out.
    pub fn update(mut self, doc: &Document, replace: bool) -> QueryBuf {
        let mut sets = Vec::new();
        for column in self.table.columns.iter().filter(|c| c.name != self.table.pk) {
            let value = match doc.get(&column.name) {
                Some(v) => v,
                None if replace => &NULL,
                None => continue,
            };
            let ph = self.q.push_param(value, column);
            sets.push(format!("{} = {}", quoted(&column.name), ph));
        }
        if sets.is_empty() {
            return QueryBuf {
                sql: format!("SELECT 1 FROM {} AS {MAIN}{}", quoted(&self.table.name), self.where_clause()),
                params: self.q.params,
            };
        }
        QueryBuf {
            sql: format!(
                "UPDATE {} AS {MAIN} SET {}{}",
                quoted(&self.table.name),
                sets.join(", "),
                self.where_clause()
            ),
            params: self.q.params,
        }
    }
}

/// Equality between a column and a value, following document-store matching: null
/// matches NULL, and a scalar matches any element of a list column.
fn compare(q: &mut QueryBuf, alias: &str, column: &Column, value: &Value) -> String {
    let col = format!("{}.{}", alias, quoted(&column.name));
    match value {
        Value::Null => format!("{} IS NULL", col),
        v if column.list && !v.is_array() => {
            let ph = q.push_param(&json!([v]), column);
            format!("{} @> {}", col, ph)
        }
        v => {
            let ph = q.push_param(v, column);
            format!("{} = {}", col, ph)
        }
    }
}

/// INSERT of one document, returning the stored row as JSON.
pub fn insert(table: &Table, doc: &Document) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for column in &table.columns {
        let Some(value) = doc.get(&column.name) else {
            continue;
        };
        if column.name == table.pk && table.serial_pk && value.is_null() {
            continue;
        }
        placeholders.push(q.push_param(value, column));
        cols.push(quoted(&column.name));
    }
    let target = quoted(&table.name);
    q.sql = if cols.is_empty() {
        format!(
            "WITH ins AS (INSERT INTO {} DEFAULT VALUES RETURNING *) SELECT row_to_json(ins) FROM ins",
            target
        )
    } else {
        format!(
            "WITH ins AS (INSERT INTO {} ({}) VALUES ({}) RETURNING *) SELECT row_to_json(ins) FROM ins",
            target,
            cols.join(", "),
            placeholders.join(", ")
        )
    };
    q
}

/// Whether `doc` supplies its own value for a serial primary key.
pub fn sets_serial_pk(table: &Table, doc: &Document) -> bool {
    table.serial_pk && doc.get(&table.pk).is_some_and(|v| !v.is_null())
}

/// Moves the serial primary key's sequence past the largest stored key, so rows inserted
/// with an explicit key do not collide with later generated ones.
pub fn sync_serial(table: &Table) -> QueryBuf {
    QueryBuf {
        sql: format!(
            "SELECT setval(pg_get_serial_sequence('{}', '{}'), GREATEST((SELECT MAX({}) FROM {}), 1))",
            quoted(&table.name).replace('\'', "''"),
            table.pk.replace('\'', "''"),
            quoted(&table.pk),
            quoted(&table.name)
        ),
        params: Vec::new(),
    }
}

/// DELETE of every row.
pub fn truncate(table: &Table) -> QueryBuf {
    QueryBuf {
        sql: format!("DELETE FROM {}", quoted(&table.name)),
        params: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::sql::PgStore;
    use crate::resource::{Field, FieldType, Model, Registry, Resource, SubResource};
    use std::time::Duration;

    fn registry() -> Registry {
        let countries = Resource::builder(
            Model::new("Countries")
                .field(Field::string("name").required().unique())
                .field(Field::new("tags", FieldType::list_of(FieldType::String))),
        )
        .alt_id("name")
        .sub_resource(SubResource::new("cities", "country_id"))
        .build()
        .unwrap();
        let cities = Resource::builder(
            Model::new("Cities")
                .field(Field::string("name"))
                .field(Field::id("country_id").relation("countries")),
        )
        .build()
        .unwrap();
        let store = PgStore::new("postgres://localhost/test", Duration::from_secs(1));
        Registry::build(vec![countries, cities], &store).unwrap()
    }

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn explicit_serial_keys_resync_the_sequence() {
        let table = Table::for_model("people", &Model::new("People").field(Field::string("name")));
        assert!(sets_serial_pk(&table, &doc(json!({"id": 5, "name": "a"}))));
        assert!(!sets_serial_pk(&table, &doc(json!({"name": "a"}))));
        assert!(!sets_serial_pk(&table, &doc(json!({"id": null, "name": "a"}))));
        assert_eq!(
            sync_serial(&table).sql,
            "SELECT setval(pg_get_serial_sequence('\"people\"', 'id'), GREATEST((SELECT MAX(\"id\") FROM \"people\"), 1))"
        );
    }

    #[test]
    fn filters_become_cast_parameters() {
        let reg = registry();
        let table = Table::of(reg.get("countries").unwrap());
        let q = Select::new(&table)
            .filter(&doc(json!({"name": "Chile", "tags": "andes"})))
            .unwrap()
            .page(10, 5);
        assert!(q.sql.starts_with(
            "WITH matched AS (SELECT * FROM \"countries\" main WHERE main.\"name\" = $1::text \
             AND main.\"tags\" @> $2::jsonb)"
        ));
        assert!(q.sql.contains("ORDER BY main.\"id\" LIMIT 5 OFFSET 10"));
        assert_eq!(
            q.params,
            vec![PgBindValue::String("Chile".into()), PgBindValue::Json(json!(["andes"]))]
        );
    }

    #[test]
    fn zero_limit_pages_everything() {
        let reg = registry();
        let table = Table::of(reg.get("countries").unwrap());
        let q = Select::new(&table).page(0, 0);
        assert!(!q.sql.contains("LIMIT"));
        assert!(!q.sql.contains("OFFSET"));
    }

    #[test]
    fn alt_id_pipeline_becomes_exists_without_embedding() {
        let reg = registry();
        let countries = reg.get("countries").unwrap().clone();
        let table = Table::of(reg.get("cities").unwrap());
        let pipeline = vec![
            Stage::lookup(countries, "country_id", "country_id"),
            Stage::Unwind("country_id".into()),
            Stage::Match(doc(json!({"country_id.name": "Chile"}))),
            Stage::AddField {
                field: "country_id".into(),
                from_path: "country_id.id".into(),
            },
        ];
        let q = Select::new(&table).pipeline(&pipeline).unwrap().page(0, 25);
        assert!(q.sql.contains(
            "EXISTS (SELECT 1 FROM \"countries\" j WHERE j.\"id\"::text = main.\"country_id\"::text AND j.\"name\" = $1::text)"
        ));
        assert!(q.sql.contains("main.\"country_id\", "));
        assert!(!q.sql.contains("row_to_json(j)"));
    }

    #[test]
    fn lookup_embeds_related_row() {
        let reg = registry();
        let countries = reg.get("countries").unwrap().clone();
        let table = Table::of(reg.get("cities").unwrap());
        let q = Select::new(&table)
            .pipeline(&[Stage::lookup(countries, "country_id", "country_id")])
            .unwrap()
            .page(0, 25);
        assert!(q.sql.contains(
            "(SELECT row_to_json(j) FROM \"countries\" j WHERE j.\"id\"::text = main.\"country_id\"::text LIMIT 1) AS \"country_id\""
        ));
    }

    #[test]
    fn unsupported_stages_are_reported() {
        let reg = registry();
        let table = Table::of(reg.get("cities").unwrap());
        let err = Select::new(&table)
            .pipeline(&[Stage::Unwind("country_id".into())])
            .err()
            .unwrap();
        assert!(matches!(err, DataError::Unsupported(_)));
    }

    #[test]
    fn insert_skips_serial_key_and_returns_row() {
        let reg = registry();
        let table = Table::of(reg.get("countries").unwrap());
        let q = insert(&table, &doc(json!({"name": "Chile", "_created": "2024-01-01T00:00:00.000Z"})));
        assert_eq!(
            q.sql,
            "WITH ins AS (INSERT INTO \"countries\" (\"name\", \"_created\") VALUES ($1::text, $2::timestamptz) \
             RETURNING *) SELECT row_to_json(ins) FROM ins"
        );
    }

    #[test]
    fn update_sets_after_condition_params() {
        let reg = registry();
        let table = Table::of(reg.get("countries").unwrap());
        let q = Select::new(&table)
            .filter(&doc(json!({"id": 3})))
            .unwrap()
            .update(&doc(json!({"name": "Peru"})), false);
        assert_eq!(
            q.sql,
            "UPDATE \"countries\" AS main SET \"name\" = $2::text WHERE main.\"id\" = $1::bigint"
        );
        assert_eq!(q.params, vec![PgBindValue::I64(3), PgBindValue::String("Peru".into())]);
    }
}
