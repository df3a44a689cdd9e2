//! Model declarations: named, typed fields with constraints and data relations.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Field value type. `Id` is the backend's primary-key type (object id for document
/// stores, the key column for relational stores).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Datetime,
    Id,
    Object,
    Any,
    List(Box<FieldType>),
}

impl FieldType {
    pub fn list_of(inner: FieldType) -> Self {
        FieldType::List(Box::new(inner))
    }

    /// `Id` or `List(Id)`: the only types a data relation may carry.
    pub fn is_relation_type(&self) -> bool {
        match self {
            FieldType::Id => true,
            FieldType::List(inner) => **inner == FieldType::Id,
            _ => false,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, FieldType::List(_))
    }
}

/// A `pattern` rule, compiled when it is declared. An invalid source is kept so
/// registration can report it.
#[derive(Clone, Debug)]
pub struct Pattern {
    source: String,
    compiled: Option<Regex>,
}

impl Pattern {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let compiled = Regex::new(&source).ok();
        Pattern { source, compiled }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// `None` when the source failed to compile.
    pub fn regex(&self) -> Option<&Regex> {
        self.compiled.as_ref()
    }

    /// The compile error, if any.
    pub fn error(&self) -> Option<String> {
        match self.compiled {
            Some(_) => None,
            None => Regex::new(&self.source).err().map(|e| e.to_string()),
        }
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Pattern::new)
    }
}

/// Per-field checks applied to request bodies.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Pattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
}

/// Marks a field as a foreign key into another resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataRelation {
    pub resource: String,
    #[serde(default = "default_true")]
    pub embeddable: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_relation: Option<DataRelation>,
    #[serde(flatten)]
    pub rules: ValidationRule,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Field {
            name: name.into(),
            ty,
            required: false,
            primary_key: false,
            unique: false,
            data_relation: None,
            rules: ValidationRule::default(),
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Datetime)
    }

    pub fn id(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Id)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Declares this field a foreign key into `resource`.
    pub fn relation(mut self, resource: impl Into<String>) -> Self {
        self.data_relation = Some(DataRelation {
            resource: resource.into(),
            embeddable: true,
        });
        self
    }

    pub fn rules(mut self, rules: ValidationRule) -> Self {
        self.rules = rules;
        self
    }

    pub fn max_length(mut self, n: u32) -> Self {
        self.rules.max_length = Some(n);
        self
    }

    pub fn min_length(mut self, n: u32) -> Self {
        self.rules.min_length = Some(n);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.rules.pattern = Some(Pattern::new(pattern));
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.rules.format = Some(format.into());
        self
    }
}

/// A named set of fields. Resources carry one base model and optional
/// create/update/response variants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Model {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn primary_key(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.primary_key)
    }

    pub fn relations(&self) -> impl Iterator<Item = (&Field, &DataRelation)> {
        self.fields
            .iter()
            .filter_map(|f| f.data_relation.as_ref().map(|r| (f, r)))
    }

    /// Same fields, none required. Used for partial updates.
    pub fn optional(&self) -> Model {
        Model {
            name: self.name.clone(),
            fields: self
                .fields
                .iter()
                .cloned()
                .map(|mut f| {
                    f.required = false;
                    f
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relation_types_are_ids_or_id_lists() {
        assert!(FieldType::Id.is_relation_type());
        assert!(FieldType::list_of(FieldType::Id).is_relation_type());
        assert!(!FieldType::String.is_relation_type());
        assert!(!FieldType::list_of(FieldType::String).is_relation_type());
    }

    #[test]
    fn deserializes_field_with_flattened_rules() {
        let field: Field = serde_json::from_value(json!({
            "name": "leader",
            "type": "id",
            "data_relation": { "resource": "leaders" },
            "max_length": 24
        }))
        .unwrap();
        assert_eq!(field.ty, FieldType::Id);
        assert_eq!(field.rules.max_length, Some(24));
        let rel = field.data_relation.unwrap();
        assert_eq!(rel.resource, "leaders");
        assert!(rel.embeddable);
    }

    #[test]
    fn deserializes_list_types() {
        let ty: FieldType = serde_json::from_value(json!({ "list": "id" })).unwrap();
        assert_eq!(ty, FieldType::list_of(FieldType::Id));
    }

    #[test]
    fn optional_model_clears_required() {
        let model = Model::new("People").field(Field::string("name").required());
        assert!(!model.optional().fields[0].required);
    }
}
