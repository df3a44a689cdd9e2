//! Runtime settings from environment variables (optionally loaded from `.env`).

use crate::error::ConfigError;
use crate::io::Backend;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Settings {
    pub data_key: String,
    pub meta_key: String,
    pub links_key: String,
    pub hateoas: bool,
    pub pagination: bool,
    pub pagination_default: u64,
    pub pagination_limit: u64,
    pub backend: Backend,
    pub mongodb_uri: String,
    pub mongodb_database: String,
    pub sql_uri: String,
    /// `None` disables CORS; `["*"]` allows any origin.
    pub cors_origins: Option<Vec<String>>,
    pub connection_timeout: Duration,
    pub query_page: String,
    pub query_max_results: String,
    pub query_embedded: String,
    pub query_where: String,
    pub body_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_key: "_data".into(),
            meta_key: "_meta".into(),
            links_key: "_links".into(),
            hateoas: true,
            pagination: true,
            pagination_default: 25,
            pagination_limit: 1000,
            backend: Backend::Memory,
            mongodb_uri: "mongodb://localhost:27017".into(),
            mongodb_database: "restgen".into(),
            sql_uri: "postgres://localhost/restgen".into(),
            cors_origins: None,
            connection_timeout: Duration::from_millis(10_000),
            query_page: "page".into(),
            query_max_results: "max_results".into(),
            query_embedded: "embedded".into(),
            query_where: "where".into(),
            body_limit: 2 * 1024 * 1024,
        }
    }
}

impl Settings {
    /// Reads `.env` if present, then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Settings::default();
        let text = |key: &str, default: String| lookup(key).filter(|v| !v.is_empty()).unwrap_or(default);
        Ok(Settings {
            data_key: text("DATA", d.data_key),
            meta_key: text("META", d.meta_key),
            links_key: text("LINKS", d.links_key),
            hateoas: parse_bool(&lookup, "HATEOAS", d.hateoas)?,
            pagination: parse_bool(&lookup, "PAGINATION", d.pagination)?,
            pagination_default: parse(&lookup, "PAGINATION_DEFAULT", d.pagination_default)?,
            pagination_limit: parse(&lookup, "PAGINATION_LIMIT", d.pagination_limit)?,
            backend: parse(&lookup, "BACKEND", d.backend)?,
            mongodb_uri: text("MONGODB_URI", d.mongodb_uri),
            mongodb_database: text("MONGODB_DATABASE", d.mongodb_database),
            sql_uri: lookup("SQL_URI")
                .or_else(|| lookup("DATABASE_URL"))
                .unwrap_or(d.sql_uri),
            cors_origins: lookup("CORS_ORIGINS").map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            }),
            connection_timeout: Duration::from_millis(parse(
                &lookup,
                "CONNECTION_TIMEOUT",
                d.connection_timeout.as_millis() as u64,
            )?),
            query_page: text("QUERY_PAGE", d.query_page),
            query_max_results: text("QUERY_MAX_RESULTS", d.query_max_results),
            query_embedded: text("QUERY_EMBEDDED", d.query_embedded),
            query_where: text("QUERY_WHERE", d.query_where),
            body_limit: parse(&lookup, "BODY_LIMIT", d.body_limit)?,
        })
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::Load(format!("{}: invalid value '{}'", key, v))),
        _ => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Load(format!("{}: expected a boolean, got '{}'", key, v))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.data_key, "_data");
        assert_eq!(s.pagination_default, 25);
        assert_eq!(s.pagination_limit, 1000);
        assert!(s.hateoas);
        assert_eq!(s.backend, Backend::Memory);
        assert!(s.cors_origins.is_none());
    }

    #[test]
    fn reads_overrides() {
        let s = settings(&[
            ("DATA", "items"),
            ("HATEOAS", "false"),
            ("PAGINATION_DEFAULT", "10"),
            ("BACKEND", "postgres"),
            ("DATABASE_URL", "postgres://db/app"),
            ("CORS_ORIGINS", "http://a.test, http://b.test"),
            ("CONNECTION_TIMEOUT", "2500"),
        ])
        .unwrap();
        assert_eq!(s.data_key, "items");
        assert!(!s.hateoas);
        assert_eq!(s.pagination_default, 10);
        assert_eq!(s.backend, Backend::Postgres);
        assert_eq!(s.sql_uri, "postgres://db/app");
        assert_eq!(
            s.cors_origins.unwrap(),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
        assert_eq!(s.connection_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn rejects_malformed_numbers() {
        assert!(matches!(settings(&[("PAGINATION_LIMIT", "lots")]), Err(ConfigError::Load(_))));
        assert!(matches!(settings(&[("HATEOAS", "maybe")]), Err(ConfigError::Load(_))));
    }
}
