//! Request validation against a resource model: types, required fields and field rules.

use crate::error::ErrorDetail;
use crate::io::{DataLayer, Document};
use crate::resource::{Field, FieldType, Model, ValidationRule};
use serde_json::{json, Value};

pub struct RequestValidator;

impl RequestValidator {
    /// Validate a full body (POST, PUT). All required fields must be present.
    /// Returns the body restricted to declared fields.
    pub fn validate(
        body: Value,
        model: &Model,
        data: &dyn DataLayer,
        loc: &[Value],
    ) -> Result<Document, Vec<ErrorDetail>> {
        check(body, model, data, loc, true)
    }

    /// Validate only the fields present in body (PATCH). Missing fields are fine.
    pub fn validate_partial(
        body: Value,
        model: &Model,
        data: &dyn DataLayer,
        loc: &[Value],
    ) -> Result<Document, Vec<ErrorDetail>> {
        check(body, model, data, loc, false)
    }
}

fn check(
    body: Value,
    model: &Model,
    data: &dyn DataLayer,
    loc: &[Value],
    full: bool,
) -> Result<Document, Vec<ErrorDetail>> {
    let Value::Object(mut body) = body else {
        return Err(vec![ErrorDetail::new(
            loc.to_vec(),
            "value is not a valid dict",
            "type_error.dict",
        )]);
    };
    let mut errors = Vec::new();
    let mut out = Document::new();
    for field in &model.fields {
        let at = field_loc(loc, &field.name);
        match body.remove(&field.name) {
            None if full && field.required => {
                errors.push(ErrorDetail::new(at, "field required", "value_error.missing"));
            }
            None => {}
            Some(Value::Null) if field.required => {
                errors.push(ErrorDetail::new(
                    at,
                    "none is not an allowed value",
                    "type_error.none.not_allowed",
                ));
            }
            Some(Value::Null) => {
                out.insert(field.name.clone(), Value::Null);
            }
            Some(v) => {
                let before = errors.len();
                check_type(&v, &field.ty, data, &at, &mut errors);
                if errors.len() == before {
                    if let Some(e) = validate_field(field, &v, &at) {
                        errors.push(e);
                    }
                }
                out.insert(field.name.clone(), v);
            }
        }
    }
    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

fn field_loc(loc: &[Value], field: &str) -> Vec<Value> {
    let mut at = loc.to_vec();
    at.push(json!(field));
    at
}

fn check_type(v: &Value, ty: &FieldType, data: &dyn DataLayer, at: &[Value], errors: &mut Vec<ErrorDetail>) {
    let fail = |msg: &str, kind: &str| ErrorDetail::new(at.to_vec(), msg, kind);
    match ty {
        FieldType::String if !v.is_string() => errors.push(fail("str type expected", "type_error.str")),
        FieldType::Integer if !(v.is_i64() || v.is_u64()) => {
            errors.push(fail("value is not a valid integer", "type_error.integer"))
        }
        FieldType::Float if !v.is_number() => errors.push(fail("value is not a valid float", "type_error.float")),
        FieldType::Boolean if !v.is_boolean() => {
            errors.push(fail("value could not be parsed to a boolean", "type_error.bool"))
        }
        FieldType::Datetime => {
            let ok = v
                .as_str()
                .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
                .unwrap_or(false);
            if !ok {
                errors.push(fail("invalid datetime format", "value_error.datetime"));
            }
        }
        FieldType::Id if !data.is_valid_id(v) => errors.push(fail("value is not a valid id", "type_error.id")),
        FieldType::Object if !v.is_object() => errors.push(fail("value is not a valid dict", "type_error.dict")),
        FieldType::List(inner) => match v.as_array() {
            None => errors.push(fail("value is not a valid list", "type_error.list")),
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    let mut item_at = at.to_vec();
                    item_at.push(json!(i));
                    check_type(item, inner, data, &item_at, errors);
                }
            }
        },
        _ => {}
    }
}

fn validate_field(field: &Field, v: &Value, at: &[Value]) -> Option<ErrorDetail> {
    let rule: &ValidationRule = &field.rules;
    let fail = |msg: String, kind: &str| Some(ErrorDetail::new(at.to_vec(), msg, kind));
    if let Some(format) = &rule.format {
        if let Some(e) = validate_format(v, format, at) {
            return Some(e);
        }
    }
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if let Some(max) = rule.max_length {
            if len > max as usize {
                return fail(
                    format!("ensure this value has at most {} characters", max),
                    "value_error.any_str.max_length",
                );
            }
        }
        if let Some(min) = rule.min_length {
            if len < min as usize {
                return fail(
                    format!("ensure this value has at least {} characters", min),
                    "value_error.any_str.min_length",
                );
            }
        }
        if let Some(pattern) = &rule.pattern {
            let matched = pattern.regex().is_some_and(|re| re.is_match(s));
            if !matched {
                return fail(
                    format!("string does not match regex \"{}\"", pattern.as_str()),
                    "value_error.str.regex",
                );
            }
        }
    }
    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            let shown: Vec<String> = allowed.iter().take(5).map(|a| a.to_string()).collect();
            return fail(
                format!("unexpected value; permitted: {}", shown.join(", ")),
                "value_error.const",
            );
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = rule.minimum {
            if n < min {
                return fail(
                    format!("ensure this value is greater than or equal to {}", min),
                    "value_error.number.not_ge",
                );
            }
        }
        if let Some(max) = rule.maximum {
            if n > max {
                return fail(
                    format!("ensure this value is less than or equal to {}", max),
                    "value_error.number.not_le",
                );
            }
        }
    }
    None
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn validate_format(v: &Value, format: &str, at: &[Value]) -> Option<ErrorDetail> {
    let s = v.as_str()?;
    match format.to_lowercase().as_str() {
        "email" => {
            let valid = match s.split_once('@') {
                Some((user, domain)) => !user.is_empty() && domain.contains('.') && !domain.ends_with('.'),
                None => false,
            };
            (!valid).then(|| {
                ErrorDetail::new(at.to_vec(), "value is not a valid email address", "value_error.email")
            })
        }
        "uuid" => uuid::Uuid::parse_str(s)
            .is_err()
            .then(|| ErrorDetail::new(at.to_vec(), "value is not a valid uuid", "type_error.uuid")),
        _ => None,
    }
}
