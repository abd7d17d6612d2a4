//! Semantic validation of BQL trees
//!
//! Checks every rule against the [`QueryLanguageSpec`]: field existence,
//! allowed operators, value presence, and value/type compatibility. All
//! problems are collected rather than stopping at the first one.

use crate::ast::*;
use crate::dialect;
use bql_schema::{FieldSpec, Operator, QueryLanguageSpec, ValueOptions, ValueType};
use thiserror::Error;

/// A single validation failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SemanticError {
    #[error("Unknown field: {field}")]
    UnknownField { field: String },

    #[error("Operator '{operator}' is not allowed for field {field}")]
    OperatorNotAllowed { field: String, operator: Operator },

    #[error("Operator '{operator}' on field {field} requires a value")]
    MissingValue { field: String, operator: Operator },

    #[error("Operator '{operator}' on field {field} takes no {found} value")]
    UnexpectedValue {
        field: String,
        operator: Operator,
        found: &'static str,
    },

    #[error("Type mismatch on field {field}: expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: &'static str,
    },

    #[error("Operator '{operator}' on field {field} requires a list value")]
    ListRequired { field: String, operator: Operator },

    #[error("Value '{value}' is not an option of field {field}")]
    ValueNotInOptions { field: String, value: String },

    #[error("Invalid regex on field {field}: {message}")]
    InvalidRegex { field: String, message: String },

    #[error("Cyclic reference to named query {name}")]
    CyclicReference { name: String },
}

/// Validate a tree against the field definitions.
///
/// `ancestors` are the named queries currently being expanded; a named
/// subtree carrying one of those names is a cycle.
pub fn validate(
    node: &Node,
    spec: &QueryLanguageSpec,
    ancestors: &[String],
) -> std::result::Result<(), Vec<SemanticError>> {
    let mut validator = Validator {
        spec,
        ancestors,
        errors: Vec::new(),
    };
    validator.visit(node);

    if validator.errors.is_empty() {
        Ok(())
    } else {
        Err(validator.errors)
    }
}

struct Validator<'a> {
    spec: &'a QueryLanguageSpec,
    ancestors: &'a [String],
    errors: Vec<SemanticError>,
}

impl<'a> Validator<'a> {
    fn visit(&mut self, node: &Node) {
        if let Some(named) = node.named() {
            if self.ancestors.iter().any(|a| a == &named.name) {
                self.errors.push(SemanticError::CyclicReference {
                    name: named.name.clone(),
                });
            }
        }

        match node {
            Node::Rule(rule) => self.rule(rule),
            Node::Ruleset(set) => {
                for child in &set.children {
                    self.visit(child);
                }
            }
            Node::Reference(_) => {}
        }
    }

    fn rule(&mut self, rule: &Rule) {
        let Some(field) = self.spec.field(&rule.field) else {
            self.errors.push(SemanticError::UnknownField {
                field: rule.field.clone(),
            });
            return;
        };

        if !self.spec.operators_for(field).contains(&rule.operator) {
            self.errors.push(SemanticError::OperatorNotAllowed {
                field: rule.field.clone(),
                operator: rule.operator,
            });
        }

        match (rule.operator.positive(), &rule.value) {
            (Operator::Exists, None) | (Operator::Exists, Some(Value::Bool(_))) => {}
            (Operator::Exists, Some(other)) => {
                self.errors.push(SemanticError::UnexpectedValue {
                    field: rule.field.clone(),
                    operator: rule.operator,
                    found: other.kind(),
                });
            }
            (_, None) => {
                self.errors.push(SemanticError::MissingValue {
                    field: rule.field.clone(),
                    operator: rule.operator,
                });
            }
            (Operator::In, Some(Value::List(items))) => {
                for item in items {
                    self.check_value(field, rule.operator, item);
                }
            }
            (Operator::In, Some(_)) => {
                self.errors.push(SemanticError::ListRequired {
                    field: rule.field.clone(),
                    operator: rule.operator,
                });
            }
            (_, Some(value)) => self.check_value(field, rule.operator, value),
        }
    }

    /// Check a single scalar (or regex) value against the field type
    fn check_value(&mut self, field: &FieldSpec, operator: Operator, value: &Value) {
        let accepted = match (field.value_type, value) {
            (ValueType::String, Value::String(_)) => true,
            (ValueType::String, Value::Regex { .. }) => accepts_regex(operator),
            (ValueType::Number, Value::Number(_)) => true,
            (ValueType::Date, Value::String(_) | Value::Number(_)) => true,
            (ValueType::Boolean, Value::Bool(_)) => true,
            _ => false,
        };

        if !accepted {
            self.errors.push(SemanticError::TypeMismatch {
                field: field.name.clone(),
                expected: expected_kind(field.value_type, operator),
                found: value.kind(),
            });
            return;
        }

        if let Value::Regex {
            pattern,
            case_insensitive,
        } = value
        {
            if let Err(err) = dialect::translate(pattern, *case_insensitive) {
                self.errors.push(SemanticError::InvalidRegex {
                    field: field.name.clone(),
                    message: err.to_string(),
                });
            }
        }

        if let (ValueOptions::Static(options), Value::String(s)) = (field.value_options(), value) {
            let restricted = matches!(operator.positive(), Operator::Eq | Operator::In);
            if restricted && !options.iter().any(|o| o.to_lowercase() == s.to_lowercase()) {
                self.errors.push(SemanticError::ValueNotInOptions {
                    field: field.name.clone(),
                    value: s.clone(),
                });
            }
        }
    }
}

fn accepts_regex(operator: Operator) -> bool {
    matches!(operator.positive(), Operator::Contains | Operator::Like)
}

fn expected_kind(value_type: ValueType, operator: Operator) -> String {
    match value_type {
        ValueType::String if accepts_regex(operator) => "string or regex".to_string(),
        ValueType::String => "string".to_string(),
        ValueType::Number => "number".to_string(),
        ValueType::Date => "date string or number".to_string(),
        ValueType::Boolean => "bool".to_string(),
    }
}
