//! Table layout derived from a resource model, its DDL, and database bootstrap.

use crate::error::DataError;
use crate::resource::{FieldType, Model, RegisteredResource, CREATED, UPDATED};
use sqlx::ConnectOptions;
use std::str::FromStr;

/// Primary key used when the model declares none.
pub const IMPLICIT_PK: &str = "id";

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    /// Column type in DDL.
    pub sql_type: &'static str,
    /// Type placeholders are cast to.
    pub cast: &'static str,
    pub json: bool,
    pub list: bool,
    pub datetime: bool,
    pub required: bool,
    pub unique: bool,
}

impl Column {
    fn for_type(name: &str, ty: &FieldType) -> Self {
        let (sql_type, cast) = match ty {
            FieldType::String | FieldType::Id => ("TEXT", "text"),
            FieldType::Integer => ("BIGINT", "bigint"),
            FieldType::Float => ("DOUBLE PRECISION", "double precision"),
            FieldType::Boolean => ("BOOLEAN", "boolean"),
            FieldType::Datetime => ("TIMESTAMPTZ", "timestamptz"),
            FieldType::Object | FieldType::Any | FieldType::List(_) => ("JSONB", "jsonb"),
        };
        Column {
            name: name.to_string(),
            sql_type,
            cast,
            json: cast == "jsonb",
            list: ty.is_list(),
            datetime: matches!(ty, FieldType::Datetime),
            required: false,
            unique: false,
        }
    }

    fn timestamp(name: &str) -> Self {
        Column::for_type(name, &FieldType::Datetime)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    pub name: String,
    pub pk: String,
    /// Whether the database assigns keys.
    pub serial_pk: bool,
    /// Primary key first, declared fields, then the write timestamps.
    pub columns: Vec<Column>,
}

impl Table {
    pub fn of(resource: &RegisteredResource) -> Self {
        Self::for_model(resource.name(), resource.model())
    }

    pub fn for_model(name: &str, model: &Model) -> Self {
        let mut columns = Vec::new();
        let (pk, serial_pk) = match model.primary_key() {
            Some(f) => {
                let mut col = Column::for_type(&f.name, &f.ty);
                col.sql_type = if matches!(f.ty, FieldType::Integer) { "BIGSERIAL" } else { col.sql_type };
                columns.push(col);
                (f.name.clone(), matches!(f.ty, FieldType::Integer))
            }
            None => {
                let mut col = Column::for_type(IMPLICIT_PK, &FieldType::Integer);
                col.sql_type = "BIGSERIAL";
                columns.push(col);
                (IMPLICIT_PK.to_string(), true)
            }
        };
        for f in model.fields.iter().filter(|f| f.name != pk) {
            let mut col = Column::for_type(&f.name, &f.ty);
            col.required = f.required;
            col.unique = f.unique;
            columns.push(col);
        }
        columns.push(Column::timestamp(CREATED));
        columns.push(Column::timestamp(UPDATED));
        Table {
            name: name.to_string(),
            pk,
            serial_pk,
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn pk_column(&self) -> Option<&Column> {
        self.column(&self.pk)
    }

    pub fn create_ddl(&self) -> String {
        let defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", quoted(&c.name), c.sql_type);
                if c.name == self.pk {
                    def.push_str(" PRIMARY KEY");
                } else {
                    if c.required {
                        def.push_str(" NOT NULL");
                    }
                    if c.unique {
                        def.push_str(" UNIQUE");
                    }
                }
                def
            })
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quoted(&self.name),
            defs.join(", ")
        )
    }
}

/// Quote identifier for PostgreSQL (safe: only from resource declarations).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Create the target database if it does not exist (connects to the `postgres` db on
/// the same server).
pub async fn ensure_database_exists(database_url: &str) -> Result<(), DataError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| DataError::Connection(format!("invalid database url: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", quoted(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), DataError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| DataError::Connection("database url has no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Field;

    #[test]
    fn implicit_serial_key_and_timestamps() {
        let model = Model::new("People")
            .field(Field::string("name").required().unique())
            .field(Field::new("tags", FieldType::list_of(FieldType::String)));
        let table = Table::for_model("people", &model);
        assert_eq!(table.pk, "id");
        assert!(table.serial_pk);
        assert_eq!(
            table.create_ddl(),
            "CREATE TABLE IF NOT EXISTS \"people\" (\"id\" BIGSERIAL PRIMARY KEY, \
             \"name\" TEXT NOT NULL UNIQUE, \"tags\" JSONB, \
             \"_created\" TIMESTAMPTZ, \"_updated\" TIMESTAMPTZ)"
        );
        assert!(table.column("tags").unwrap().list);
    }

    #[test]
    fn declared_text_key_is_not_serial() {
        let model = Model::new("Codes").field(Field::string("code").primary_key());
        let table = Table::for_model("codes", &model);
        assert_eq!(table.pk, "code");
        assert!(!table.serial_pk);
        assert_eq!(table.columns[0].sql_type, "TEXT");
    }

    #[test]
    fn admin_url_targets_postgres_db() {
        let (admin, db) = parse_db_name_from_url("postgres://u:p@localhost:5432/api?sslmode=disable").unwrap();
        assert_eq!(admin, "postgres://u:p@localhost:5432/postgres");
        assert_eq!(db, "api");
    }
}
