//! BQL Query Language Specification
//!
//! This module defines the field/operator specification that drives parsing,
//! validation and compilation of Boolean Query Language (BQL) expressions.
//! The same specification is echoed to editor UIs, so every type here is
//! serde-friendly and uses the camelCase wire names editors expect.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

// ============================================================================
// Operators
// ============================================================================

/// Comparison operators understood by BQL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "!contains")]
    NotContains,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "!like")]
    NotLike,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "!in")]
    NotIn,
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = "!exists")]
    NotExists,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
}

impl Operator {
    /// Every operator, in canonical order
    pub const ALL: [Operator; 14] = [
        Operator::Eq,
        Operator::NotEq,
        Operator::Contains,
        Operator::NotContains,
        Operator::Like,
        Operator::NotLike,
        Operator::In,
        Operator::NotIn,
        Operator::Exists,
        Operator::NotExists,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
    ];

    /// Canonical token as written in BQL text
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Contains => "contains",
            Operator::NotContains => "!contains",
            Operator::Like => "like",
            Operator::NotLike => "!like",
            Operator::In => "in",
            Operator::NotIn => "!in",
            Operator::Exists => "exists",
            Operator::NotExists => "!exists",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
        }
    }

    /// Map a token to an operator. Word operators match case-insensitively.
    pub fn from_token(token: &str) -> Option<Operator> {
        let lowered = token.to_ascii_lowercase();
        Operator::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == lowered)
    }

    /// Complementary operator, if the operator family has one.
    ///
    /// Range operators return `None`: `!(x > 1)` also matches documents
    /// where `x` is missing, which `x <= 1` does not.
    pub fn negated(&self) -> Option<Operator> {
        match self {
            Operator::Eq => Some(Operator::NotEq),
            Operator::NotEq => Some(Operator::Eq),
            Operator::Contains => Some(Operator::NotContains),
            Operator::NotContains => Some(Operator::Contains),
            Operator::Like => Some(Operator::NotLike),
            Operator::NotLike => Some(Operator::Like),
            Operator::In => Some(Operator::NotIn),
            Operator::NotIn => Some(Operator::In),
            Operator::Exists => Some(Operator::NotExists),
            Operator::NotExists => Some(Operator::Exists),
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => None,
        }
    }

    /// Whether this is the `!` member of its family
    pub fn is_negative(&self) -> bool {
        matches!(
            self,
            Operator::NotEq
                | Operator::NotContains
                | Operator::NotLike
                | Operator::NotIn
                | Operator::NotExists
        )
    }

    /// Positive member of the operator's family (`!=` -> `=`)
    pub fn positive(&self) -> Operator {
        if self.is_negative() {
            self.negated().unwrap_or(*self)
        } else {
            *self
        }
    }

    /// Whether a right-hand value is mandatory
    pub fn requires_value(&self) -> bool {
        !matches!(self, Operator::Exists | Operator::NotExists)
    }

    /// Whether the operator expects a list value
    pub fn is_membership(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }

    /// Whether the operator is a range comparison
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte
        )
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Field types
// ============================================================================

/// Value type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Date,
}

impl ValueType {
    /// Operators offered for this type when nothing more specific is configured
    pub fn default_operators(&self) -> &'static [Operator] {
        use Operator::*;
        match self {
            ValueType::String => &[
                Eq,
                NotEq,
                Contains,
                NotContains,
                Like,
                NotLike,
                In,
                NotIn,
                Exists,
                NotExists,
            ],
            ValueType::Number => &[Eq, NotEq, Gt, Gte, Lt, Lte, In, NotIn, Exists, NotExists],
            ValueType::Date => &[Eq, NotEq, Gt, Gte, Lt, Lte, Exists, NotExists],
            ValueType::Boolean => &[Eq, NotEq, Exists, NotExists],
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueType::String => write!(f, "string"),
            ValueType::Number => write!(f, "number"),
            ValueType::Boolean => write!(f, "boolean"),
            ValueType::Date => write!(f, "date"),
        }
    }
}

/// Where an editor gets the selectable values of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueOptions<'a> {
    /// Free input
    None,
    /// Fixed list shipped with the field definition
    Static(&'a [String]),
    /// Named source the editor queries at runtime
    Dynamic(&'a str),
}

/// Field specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    /// Field name as written in BQL (filled from the map key when loading)
    #[serde(default)]
    pub name: String,
    /// Human readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Value type
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Allowed operators; empty means "use the operator map"
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operators: Vec<Operator>,
    /// Operator picked by editors and by free-text shorthand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_operator: Option<Operator>,
    /// Whether the field may be absent on a document
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Static value options
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// Dynamic value option source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_source: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl FieldSpec {
    /// Create a nullable field with no operator overrides
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            value_type,
            operators: Vec::new(),
            default_operator: None,
            nullable: true,
            options: Vec::new(),
            dynamic_source: None,
        }
    }

    /// Set the display name
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Restrict the allowed operators
    pub fn with_operators(mut self, operators: Vec<Operator>) -> Self {
        self.operators = operators;
        self
    }

    /// Set the default operator
    pub fn with_default_operator(mut self, operator: Operator) -> Self {
        self.default_operator = Some(operator);
        self
    }

    /// Set nullability
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set static value options
    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    /// Set a dynamic value option source
    pub fn with_dynamic_source(mut self, source: impl Into<String>) -> Self {
        self.dynamic_source = Some(source.into());
        self
    }

    /// Value option source for editors
    pub fn value_options(&self) -> ValueOptions<'_> {
        if let Some(source) = &self.dynamic_source {
            ValueOptions::Dynamic(source)
        } else if !self.options.is_empty() {
            ValueOptions::Static(&self.options)
        } else {
            ValueOptions::None
        }
    }
}

/// Search entity (one index) with the fields a "document" query fans out to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySpec {
    /// Entity name used to scope named queries
    pub name: String,
    /// Backing index name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    /// Concrete fields behind the virtual document field
    #[serde(default)]
    pub document_fields: Vec<String>,
}

impl EntitySpec {
    /// Create an entity spec
    pub fn new(name: impl Into<String>, document_fields: Vec<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
            document_fields,
        }
    }

    /// Set the backing index
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }
}

// ============================================================================
// Query Language Spec
// ============================================================================

/// Complete query language specification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryLanguageSpec {
    /// Field name to specification
    #[serde(default)]
    pub fields: AHashMap<String, FieldSpec>,
    /// Per-type operator fallback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_map: Option<AHashMap<ValueType, Vec<Operator>>>,
    /// Searchable entities
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<EntitySpec>,
    /// Field used by free-text shorthand queries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_field: Option<String>,
    /// Virtual field that fans out over an entity's document fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_field: Option<String>,
}

impl QueryLanguageSpec {
    /// Create an empty specification
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field
    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    /// Add an entity
    pub fn with_entity(mut self, entity: EntitySpec) -> Self {
        self.entities.push(entity);
        self
    }

    /// Set the shorthand default field
    pub fn with_default_field(mut self, field: impl Into<String>) -> Self {
        self.default_field = Some(field.into());
        self
    }

    /// Set the virtual document field
    pub fn with_document_field(mut self, field: impl Into<String>) -> Self {
        self.document_field = Some(field.into());
        self
    }

    /// Override the operators offered for a value type
    pub fn with_type_operators(mut self, value_type: ValueType, operators: Vec<Operator>) -> Self {
        self.operator_map
            .get_or_insert_with(AHashMap::new)
            .insert(value_type, operators);
        self
    }

    /// Parse a JSON specification
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        let spec: Self =
            serde_json::from_str(json).map_err(|e| SchemaError::Parse(e.to_string()))?;
        spec.normalized()
    }

    /// Parse a YAML specification
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SchemaError> {
        let spec: Self =
            serde_yaml::from_str(yaml).map_err(|e| SchemaError::Parse(e.to_string()))?;
        spec.normalized()
    }

    /// Load a specification file, choosing the format by extension
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SchemaError::Io(path.display().to_string(), e))?;

        debug!(path = %path.display(), "Loading query language spec");

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Err(SchemaError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Fill field names from map keys and check cross references
    fn normalized(mut self) -> Result<Self, SchemaError> {
        for (name, field) in self.fields.iter_mut() {
            if field.name.is_empty() {
                field.name = name.clone();
            } else if field.name != *name {
                return Err(SchemaError::FieldNameMismatch {
                    key: name.clone(),
                    name: field.name.clone(),
                });
            }
        }

        for referenced in [&self.default_field, &self.document_field]
            .into_iter()
            .flatten()
        {
            if !self.fields.contains_key(referenced) {
                return Err(SchemaError::UnknownField(referenced.clone()));
            }
        }

        Ok(self)
    }

    /// Look up a field
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    /// Whether a field exists
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Look up an entity by name
    pub fn entity(&self, name: &str) -> Option<&EntitySpec> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Whether `name` is the virtual document field
    pub fn is_document_field(&self, name: &str) -> bool {
        self.document_field.as_deref() == Some(name)
    }

    /// Field used by free-text shorthand
    pub fn default_field(&self) -> Option<&FieldSpec> {
        self.default_field.as_deref().and_then(|name| self.field(name))
    }

    /// Operators allowed on a field.
    ///
    /// Field overrides win, then the language-wide operator map, then the type
    /// defaults. Fallback lists drop `exists`/`!exists` on non-nullable fields.
    pub fn operators_for(&self, field: &FieldSpec) -> Vec<Operator> {
        if !field.operators.is_empty() {
            return field.operators.clone();
        }

        let fallback: Vec<Operator> = self
            .operator_map
            .as_ref()
            .and_then(|map| map.get(&field.value_type))
            .cloned()
            .unwrap_or_else(|| field.value_type.default_operators().to_vec());

        if field.nullable {
            fallback
        } else {
            fallback
                .into_iter()
                .filter(|op| op.requires_value())
                .collect()
        }
    }

    /// Default operator of a field
    pub fn default_operator_for(&self, field: &FieldSpec) -> Option<Operator> {
        field
            .default_operator
            .or_else(|| self.operators_for(field).first().copied())
    }
}

/// Schema errors
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("IO error reading {0}: {1}")]
    Io(String, std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported spec format: {0}")]
    UnsupportedFormat(String),

    #[error("Unknown field referenced by spec: {0}")]
    UnknownField(String),

    #[error("Field key '{key}' does not match field name '{name}'")]
    FieldNameMismatch { key: String, name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people_spec() -> QueryLanguageSpec {
        QueryLanguageSpec::new()
            .with_field(FieldSpec::new("fname", ValueType::String))
            .with_field(FieldSpec::new("age", ValueType::Number).with_nullable(false))
            .with_field(
                FieldSpec::new("sign", ValueType::String)
                    .with_operators(vec![Operator::Eq, Operator::In]),
            )
    }

    #[test]
    fn test_operator_tokens() {
        assert_eq!(Operator::from_token("CONTAINS"), Some(Operator::Contains));
        assert_eq!(Operator::from_token("!Contains"), Some(Operator::NotContains));
        assert_eq!(Operator::from_token(">="), Some(Operator::Gte));
        assert_eq!(Operator::from_token("between"), None);
        for op in Operator::ALL {
            assert_eq!(Operator::from_token(op.as_str()), Some(op));
        }
    }

    #[test]
    fn test_operator_negation() {
        assert_eq!(Operator::Eq.negated(), Some(Operator::NotEq));
        assert_eq!(Operator::NotIn.negated(), Some(Operator::In));
        assert_eq!(Operator::Gt.negated(), None);
        assert_eq!(Operator::NotLike.positive(), Operator::Like);
        assert_eq!(Operator::Lte.positive(), Operator::Lte);
        assert!(!Operator::Exists.requires_value());
    }

    #[test]
    fn test_operators_for_fallbacks() {
        let spec = people_spec();
        let fname = spec.field("fname").unwrap();
        assert!(spec.operators_for(fname).contains(&Operator::Contains));

        let age = spec.field("age").unwrap();
        let ops = spec.operators_for(age);
        assert!(ops.contains(&Operator::Gt));
        assert!(!ops.contains(&Operator::Exists));

        let sign = spec.field("sign").unwrap();
        assert_eq!(spec.operators_for(sign), vec![Operator::Eq, Operator::In]);
    }

    #[test]
    fn test_operator_map_override() {
        let spec = people_spec().with_type_operators(ValueType::String, vec![Operator::Eq]);
        let fname = spec.field("fname").unwrap();
        assert_eq!(spec.operators_for(fname), vec![Operator::Eq]);
        assert_eq!(spec.default_operator_for(fname), Some(Operator::Eq));
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "fields": {
                "fname": { "displayName": "First name", "type": "string", "defaultOperator": "contains" },
                "dob": { "type": "date" },
                "sign": { "type": "string", "options": ["Aries", "Leo"] }
            },
            "operatorMap": { "number": ["=", ">"] },
            "entities": [{ "name": "people", "documentFields": ["fname", "sign"] }],
            "defaultField": "fname"
        }"#;

        let spec = QueryLanguageSpec::from_json_str(json).unwrap();
        let fname = spec.field("fname").unwrap();
        assert_eq!(fname.name, "fname");
        assert_eq!(fname.default_operator, Some(Operator::Contains));
        assert_eq!(spec.default_field().unwrap().name, "fname");
        assert_eq!(
            spec.field("sign").unwrap().value_options(),
            ValueOptions::Static(&["Aries".to_string(), "Leo".to_string()])
        );
        assert_eq!(spec.entity("people").unwrap().document_fields.len(), 2);
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
fields:
  lname:
    type: string
  document:
    type: string
documentField: document
"#;
        let spec = QueryLanguageSpec::from_yaml_str(yaml).unwrap();
        assert!(spec.is_document_field("document"));
        assert!(!spec.is_document_field("lname"));
    }

    #[test]
    fn test_unknown_default_field() {
        let json = r#"{ "fields": {}, "defaultField": "missing" }"#;
        let result = QueryLanguageSpec::from_json_str(json);
        assert!(matches!(result, Err(SchemaError::UnknownField(f)) if f == "missing"));
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spec.yml");
        std::fs::write(&path, "fields:\n  id:\n    type: number\n").unwrap();

        let spec = QueryLanguageSpec::from_path(&path).unwrap();
        assert_eq!(spec.field("id").unwrap().value_type, ValueType::Number);

        let bad = dir.path().join("spec.toml");
        std::fs::write(&bad, "").unwrap();
        assert!(matches!(
            QueryLanguageSpec::from_path(&bad),
            Err(SchemaError::UnsupportedFormat(_))
        ));
    }
}
