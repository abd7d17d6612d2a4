//! Error types for the BQL front end

use crate::semantic::SemanticError;
use thiserror::Error;

/// BQL parse / validation error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BqlError {
    /// Malformed BQL text
    #[error("Syntax error at position {position}: expected {expected}")]
    SyntaxError { position: usize, expected: String },

    /// Comparison on an undefined field
    #[error("Unknown field: {field}")]
    UnknownField { field: String },

    /// Operator token that is not part of the language
    #[error("Unknown operator '{operator}' for field {field}")]
    UnknownOperator { field: String, operator: String },

    /// Value token with an invalid shape
    #[error("Malformed value: {token}")]
    MalformedValue { token: String },

    /// Parenthesis without a partner
    #[error("Unmatched parenthesis at position {position}")]
    UnmatchedParen { position: usize },

    /// Regex the target dialect cannot represent
    #[error("Cannot translate regex /{pattern}/: {message}")]
    RegexTranslation { pattern: String, message: String },

    /// Parsed fine but failed field validation
    #[error("Validation failed: {}", summarize(.errors))]
    Validation { errors: Vec<SemanticError> },
}

fn summarize(errors: &[SemanticError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for BQL operations
pub type Result<T> = std::result::Result<T, BqlError>;

impl BqlError {
    pub fn syntax(position: usize, expected: impl Into<String>) -> Self {
        BqlError::SyntaxError {
            position,
            expected: expected.into(),
        }
    }

    pub fn unknown_field(field: impl Into<String>) -> Self {
        BqlError::UnknownField {
            field: field.into(),
        }
    }

    pub fn unknown_operator(field: impl Into<String>, operator: impl Into<String>) -> Self {
        BqlError::UnknownOperator {
            field: field.into(),
            operator: operator.into(),
        }
    }

    pub fn malformed(token: impl Into<String>) -> Self {
        BqlError::MalformedValue {
            token: token.into(),
        }
    }

    pub fn regex(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        BqlError::RegexTranslation {
            pattern: pattern.into(),
            message: message.into(),
        }
    }
}

impl From<Vec<SemanticError>> for BqlError {
    fn from(errors: Vec<SemanticError>) -> Self {
        BqlError::Validation { errors }
    }
}
