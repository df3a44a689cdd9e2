//! Collection query parameters: pagination, embedding and `where` filters.

use crate::config::Settings;
use crate::error::{AppError, ErrorDetail};
use crate::io::Query;
use crate::resource::RegisteredResource;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ListParams {
    pub page: u64,
    pub max_results: u64,
    /// Relation fields to expand, in request order.
    pub embedded: Vec<String>,
    pub filter: Query,
}

impl ListParams {
    pub fn parse(
        settings: &Settings,
        resource: &RegisteredResource,
        raw: &HashMap<String, String>,
    ) -> Result<Self, AppError> {
        let mut errors = Vec::new();

        let page = match raw.get(&settings.query_page) {
            None => 1,
            Some(v) => match v.trim().parse::<i64>() {
                Ok(p) if p > 1 => p as u64,
                Ok(_) => 1,
                Err(_) => {
                    errors.push(not_an_integer(&settings.query_page));
                    1
                }
            },
        };

        let max_results = match raw.get(&settings.query_max_results) {
            None => settings.pagination_default,
            Some(v) => match v.trim().parse::<i64>() {
                Ok(m) if m > 0 => (m as u64).min(settings.pagination_limit),
                Ok(_) => {
                    errors.push(ErrorDetail::query(
                        &settings.query_max_results,
                        "ensure this value is greater than 0",
                        "value_error.number.not_gt",
                    ));
                    settings.pagination_default
                }
                Err(_) => {
                    errors.push(not_an_integer(&settings.query_max_results));
                    settings.pagination_default
                }
            },
        };

        if settings.pagination && skip_for(page, max_results).is_none() {
            errors.push(ErrorDetail::query(
                &settings.query_page,
                "ensure the page offset fits in a signed 64-bit integer",
                "value_error.number.too_large",
            ));
        }

        let mut embedded = Vec::new();
        if resource.descriptor().embedding() {
            if let Some(v) = raw.get(&settings.query_embedded) {
                match parse_object(v) {
                    None => errors.push(not_a_dict(&settings.query_embedded)),
                    Some(map) => {
                        for (field, flag) in map {
                            if !truthy(&flag) {
                                continue;
                            }
                            match resource.response().embed_target(&field, &settings.query_embedded) {
                                Ok(_) => embedded.push(field),
                                Err(e) => errors.push(e),
                            }
                        }
                    }
                }
            }
        }

        let mut filter = Query::new();
        if resource.descriptor().allowed_filters() {
            if let Some(v) = raw.get(&settings.query_where) {
                match parse_object(v) {
                    None => errors.push(not_a_dict(&settings.query_where)),
                    Some(map) => {
                        for (field, value) in map {
                            if resource.filterable(&field) {
                                filter.insert(field, value);
                            } else {
                                errors.push(ErrorDetail::query(
                                    &settings.query_where,
                                    format!("field '{}' is not valid", field),
                                    "value_error.not_valid",
                                ));
                            }
                        }
                    }
                }
            }
        }

        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }
        Ok(ListParams {
            page,
            max_results,
            embedded,
            filter,
        })
    }

    /// `(skip, limit)` for the data layer; a limit of 0 returns everything.
    pub fn window(&self, settings: &Settings) -> (u64, u64) {
        if !settings.pagination {
            return (0, 0);
        }
        let skip = skip_for(self.page, self.max_results).unwrap_or(i64::MAX as u64);
        (skip, self.max_results)
    }
}

/// Documents before `page`; `None` when the offset does not fit a backend's signed offset.
fn skip_for(page: u64, max_results: u64) -> Option<u64> {
    page.saturating_sub(1)
        .checked_mul(max_results)
        .filter(|skip| *skip <= i64::MAX as u64)
}

fn parse_object(raw: &str) -> Option<serde_json::Map<String, Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn not_a_dict(param: &str) -> ErrorDetail {
    ErrorDetail::query(param, "value is not a valid dict", "type_error.dict")
}

fn not_an_integer(param: &str) -> ErrorDetail {
    ErrorDetail::query(param, "value is not a valid integer", "type_error.integer")
}
