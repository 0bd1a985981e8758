//! Declarative payload schemas and the validator that checks them.
//!
//! Every request shape is declared once in [`registry`]; handlers receive
//! typed values through the extractors in [`extract`] and never re-check
//! constraints themselves.

pub mod extract;
pub mod registry;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

const ROOT: &str = "$";
const MAX_EMAIL_LEN: usize = 254;

#[derive(Debug, Clone, Copy)]
pub enum FieldType {
    /// Trimmed text; length bounds are in characters.
    String { min: usize, max: usize },
    /// Text compared byte-for-byte, never trimmed (passwords, tokens).
    Secret { min: usize, max: usize },
    /// Trimmed and lowercased before the syntax check.
    Email,
    Boolean,
    Integer { min: i64, max: i64 },
    Uuid,
    OneOf(&'static [&'static str]),
    List {
        item: &'static Schema,
        min: usize,
        max: usize,
    },
}

#[derive(Debug, Clone, Copy)]
pub enum DefaultValue {
    Bool(bool),
    Int(i64),
    Str(&'static str),
}

impl DefaultValue {
    fn to_value(self) -> Value {
        match self {
            DefaultValue::Bool(b) => Value::Bool(b),
            DefaultValue::Int(i) => Value::from(i),
            DefaultValue::Str(s) => Value::String(s.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub default: Option<DefaultValue>,
    /// An explicit `null` is kept (and counts as provided) instead of
    /// reading as absent.
    pub nullable: bool,
}

impl Field {
    pub const fn required(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: true,
            default: None,
            nullable: false,
        }
    }

    pub const fn optional(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: false,
            default: None,
            nullable: false,
        }
    }

    pub const fn with_default(self, default: DefaultValue) -> Self {
        Self {
            default: Some(default),
            ..self
        }
    }

    pub const fn nullable(self) -> Self {
        Self {
            nullable: true,
            ..self
        }
    }
}

#[derive(Debug)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [Field],
    /// Rejects payloads that set none of the fields (partial updates).
    pub require_any: bool,
}

impl Schema {
    pub const fn new(name: &'static str, fields: &'static [Field]) -> Self {
        Self {
            name,
            fields,
            require_any: false,
        }
    }

    pub const fn require_any(self) -> Self {
        Self {
            require_any: true,
            ..self
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A DTO whose shape is declared in the registry.
pub trait Validated: DeserializeOwned {
    fn schema() -> &'static Schema;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

/// Every field that violated a constraint, in the order they were checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
pub struct ValidationError {
    issues: Vec<FieldIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<&str> = self.issues.iter().map(|i| i.field.as_str()).collect();
        write!(f, "invalid fields: {}", fields.join(", "))
    }
}

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::default();
        err.push(field, message);
        err
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(FieldIssue {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issues(&self) -> &[FieldIssue] {
        &self.issues
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.issues.iter().any(|i| i.field == field)
    }

    /// First message per field, keyed by field path.
    pub fn field_errors(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for issue in &self.issues {
            out.entry(issue.field.clone())
                .or_insert_with(|| issue.message.clone());
        }
        out
    }

    fn extend(&mut self, other: ValidationError) {
        self.issues.extend(other.issues);
    }
}

/// Checks `payload` against `schema` and returns the normalized object:
/// strings trimmed, emails lowercased, defaults substituted for absent fields.
pub fn validate(schema: &Schema, payload: &Value) -> Result<Map<String, Value>, ValidationError> {
    let mut errors = ValidationError::default();
    let out = check_object(schema, payload, "", &mut errors);
    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

/// Validates and then deserializes into the DTO bound to the schema.
pub fn parse<T: Validated>(payload: &Value) -> Result<T, ValidationError> {
    let normalized = validate(T::schema(), payload)?;
    serde_json::from_value(Value::Object(normalized))
        .map_err(|e| ValidationError::single(ROOT, e.to_string()))
}

/// Path segments and query strings arrive untyped. Each value is converted
/// explicitly according to its declared field type before validation.
pub fn validate_params(
    schema: &Schema,
    params: &HashMap<String, String>,
) -> Result<Map<String, Value>, ValidationError> {
    let mut conversion = ValidationError::default();
    let mut object = Map::new();

    for (key, raw) in params {
        let converted = match schema.field(key).map(|f| f.ty) {
            Some(FieldType::Boolean) => match raw.as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => {
                    conversion.push(key.clone(), "must be true or false");
                    None
                }
            },
            Some(FieldType::Integer { .. }) => match raw.trim().parse::<i64>() {
                Ok(n) => Some(Value::from(n)),
                Err(_) => {
                    conversion.push(key.clone(), "must be an integer");
                    None
                }
            },
            _ => Some(Value::String(raw.clone())),
        };
        if let Some(value) = converted {
            object.insert(key.clone(), value);
        }
    }

    match validate(schema, &Value::Object(object)) {
        Ok(normalized) if conversion.is_empty() => Ok(normalized),
        Ok(_) => Err(conversion),
        Err(errors) => {
            // A field that failed conversion was dropped, so the validator
            // may report it again as missing.
            let mut merged = conversion.clone();
            merged.extend(ValidationError {
                issues: errors
                    .issues
                    .into_iter()
                    .filter(|i| !conversion.has_field(&i.field))
                    .collect(),
            });
            Err(merged)
        }
    }
}

pub fn parse_params<T: Validated>(params: &HashMap<String, String>) -> Result<T, ValidationError> {
    let normalized = validate_params(T::schema(), params)?;
    serde_json::from_value(Value::Object(normalized))
        .map_err(|e| ValidationError::single(ROOT, e.to_string()))
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn check_object(
    schema: &Schema,
    payload: &Value,
    prefix: &str,
    errors: &mut ValidationError,
) -> Map<String, Value> {
    let mut out = Map::new();
    let Some(object) = payload.as_object() else {
        let at = if prefix.is_empty() { ROOT } else { prefix };
        errors.push(at, "must be a JSON object");
        return out;
    };

    for key in object.keys() {
        if schema.field(key).is_none() {
            errors.push(join(prefix, key), "unknown field");
        }
    }

    let mut provided = 0usize;
    for field in schema.fields {
        let path = join(prefix, field.name);
        match object.get(field.name) {
            Some(Value::Null) if field.nullable => {
                provided += 1;
                out.insert(field.name.to_string(), Value::Null);
            }
            None | Some(Value::Null) => {
                if let Some(default) = field.default {
                    out.insert(field.name.to_string(), default.to_value());
                } else if field.required {
                    errors.push(path, "is required");
                }
            }
            Some(value) => {
                provided += 1;
                if let Some(checked) = check_value(&field.ty, value, &path, errors) {
                    out.insert(field.name.to_string(), checked);
                }
            }
        }
    }

    if schema.require_any && provided == 0 && !schema.fields.is_empty() {
        let names: Vec<&str> = schema.fields.iter().map(|f| f.name).collect();
        let at = if prefix.is_empty() { ROOT } else { prefix };
        errors.push(at, format!("at least one of {} must be provided", names.join(", ")));
    }

    out
}

fn check_length(
    text: &str,
    min: usize,
    max: usize,
    path: &str,
    errors: &mut ValidationError,
) -> bool {
    let len = text.chars().count();
    if len < min {
        if min == 1 {
            errors.push(path, "must not be empty");
        } else {
            errors.push(path, format!("must be at least {min} characters"));
        }
        return false;
    }
    if len > max {
        errors.push(path, format!("must be at most {max} characters"));
        return false;
    }
    true
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn check_value(
    ty: &FieldType,
    value: &Value,
    path: &str,
    errors: &mut ValidationError,
) -> Option<Value> {
    match *ty {
        FieldType::String { min, max } => {
            let Some(s) = value.as_str() else {
                errors.push(path, "must be a string");
                return None;
            };
            let trimmed = s.trim();
            check_length(trimmed, min, max, path, errors).then(|| Value::String(trimmed.into()))
        }
        FieldType::Secret { min, max } => {
            let Some(s) = value.as_str() else {
                errors.push(path, "must be a string");
                return None;
            };
            check_length(s, min, max, path, errors).then(|| Value::String(s.into()))
        }
        FieldType::Email => {
            let Some(s) = value.as_str() else {
                errors.push(path, "must be a string");
                return None;
            };
            let email = s.trim().to_lowercase();
            if email.len() > MAX_EMAIL_LEN || !is_valid_email(&email) {
                errors.push(path, "must be a valid email address");
                return None;
            }
            Some(Value::String(email))
        }
        FieldType::Boolean => match value.as_bool() {
            Some(b) => Some(Value::Bool(b)),
            None => {
                errors.push(path, "must be a boolean");
                None
            }
        },
        FieldType::Integer { min, max } => {
            let Some(n) = value.as_i64() else {
                errors.push(path, "must be an integer");
                return None;
            };
            if n < min || n > max {
                errors.push(path, format!("must be between {min} and {max}"));
                return None;
            }
            Some(Value::from(n))
        }
        FieldType::Uuid => {
            let parsed = value.as_str().and_then(|s| Uuid::parse_str(s.trim()).ok());
            match parsed {
                Some(id) => Some(Value::String(id.to_string())),
                None => {
                    errors.push(path, "must be a valid UUID");
                    None
                }
            }
        }
        FieldType::OneOf(allowed) => match value.as_str() {
            Some(s) if allowed.contains(&s) => Some(Value::String(s.into())),
            _ => {
                errors.push(path, format!("must be one of: {}", allowed.join(", ")));
                None
            }
        },
        FieldType::List { item, min, max } => {
            let Some(items) = value.as_array() else {
                errors.push(path, "must be an array");
                return None;
            };
            if items.len() < min || items.len() > max {
                errors.push(path, format!("must contain between {min} and {max} items"));
                return None;
            }
            let before = errors.issues.len();
            let checked: Vec<Value> = items
                .iter()
                .enumerate()
                .map(|(i, el)| Value::Object(check_object(item, el, &format!("{path}[{i}]"), errors)))
                .collect();
            (errors.issues.len() == before).then_some(Value::Array(checked))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    static ITEM: Schema = Schema::new(
        "item",
        &[Field::required("label", FieldType::String { min: 1, max: 5 })],
    );

    static SAMPLE: Schema = Schema::new(
        "sample",
        &[
            Field::required("title", FieldType::String { min: 1, max: 10 }),
            Field::required("email", FieldType::Email),
            Field::optional("done", FieldType::Boolean).with_default(DefaultValue::Bool(false)),
            Field::optional("kind", FieldType::OneOf(&["a", "b"])),
            Field::optional("count", FieldType::Integer { min: 0, max: 3 }),
            Field::optional("items", FieldType::List { item: &ITEM, min: 0, max: 3 }),
        ],
    );

    #[test]
    fn reports_every_invalid_field_not_just_the_first() {
        let err = validate(&SAMPLE, &json!({ "title": "", "kind": "c", "count": 9 })).unwrap_err();
        assert!(err.has_field("title"));
        assert!(err.has_field("email"));
        assert!(err.has_field("kind"));
        assert!(err.has_field("count"));
        assert_eq!(err.issues().len(), 4);
    }

    #[test]
    fn normalizes_and_fills_defaults() {
        let out = validate(
            &SAMPLE,
            &json!({ "title": "  hi  ", "email": " Bob@Example.COM " }),
        )
        .unwrap();
        assert_eq!(out["title"], "hi");
        assert_eq!(out["email"], "bob@example.com");
        assert_eq!(out["done"], false);
        assert!(!out.contains_key("kind"));
    }

    #[test]
    fn whitespace_only_string_is_empty() {
        let err = validate(&SAMPLE, &json!({ "title": "   ", "email": "a@b.co" })).unwrap_err();
        assert_eq!(err.field_errors()["title"], "must not be empty");
    }

    #[test]
    fn unknown_fields_and_non_objects_are_rejected() {
        let err = validate(&SAMPLE, &json!({ "title": "x", "email": "a@b.co", "admin": true }))
            .unwrap_err();
        assert!(err.has_field("admin"));

        let err = validate(&SAMPLE, &json!([1, 2])).unwrap_err();
        assert!(err.has_field("$"));
    }

    #[test]
    fn list_items_are_reported_with_their_index() {
        let err = validate(
            &SAMPLE,
            &json!({ "title": "x", "email": "a@b.co", "items": [{ "label": "ok" }, { "label": "" }, {}] }),
        )
        .unwrap_err();
        assert!(err.has_field("items[1].label"));
        assert!(err.has_field("items[2].label"));
        assert!(!err.has_field("items[0].label"));
    }

    #[test]
    fn require_any_rejects_empty_patch() {
        static PATCH: Schema = Schema::new(
            "patch",
            &[Field::optional("done", FieldType::Boolean)],
        )
        .require_any();
        assert!(validate(&PATCH, &json!({})).unwrap_err().has_field("$"));
        assert!(validate(&PATCH, &json!({ "done": true })).is_ok());
    }

    #[test]
    fn params_are_converted_explicitly() {
        static QUERY: Schema = Schema::new(
            "query",
            &[
                Field::optional("limit", FieldType::Integer { min: 1, max: 10 })
                    .with_default(DefaultValue::Int(5)),
                Field::optional("done", FieldType::Boolean),
            ],
        );
        let mut params = HashMap::new();
        params.insert("done".to_string(), "yes".to_string());
        params.insert("limit".to_string(), "ten".to_string());
        let err = validate_params(&QUERY, &params).unwrap_err();
        assert_eq!(err.issues().len(), 2);

        let mut params = HashMap::new();
        params.insert("done".to_string(), "true".to_string());
        let out = validate_params(&QUERY, &params).unwrap();
        assert_eq!(out["done"], true);
        assert_eq!(out["limit"], 5);
    }

    #[test]
    fn explicit_null_clears_only_nullable_fields() {
        static PATCH: Schema = Schema::new(
            "patch",
            &[
                Field::optional("note", FieldType::String { min: 0, max: 10 }).nullable(),
                Field::optional("done", FieldType::Boolean),
            ],
        )
        .require_any();

        let out = validate(&PATCH, &json!({ "note": null })).unwrap();
        assert_eq!(out.get("note"), Some(&Value::Null));

        let err = validate(&PATCH, &json!({ "done": null })).unwrap_err();
        assert!(err.has_field("$"));
    }
}
