//! BQL language front end
//!
//! Parses Boolean Query Language text into a canonical AST, serializes it
//! back, validates it against a [`bql_schema::QueryLanguageSpec`] and
//! translates regex literals into the search engine's dialect.

pub mod ast;
pub mod dialect;
pub mod error;
pub mod parser;
pub mod semantic;
pub mod serializer;

// Re-exports
pub use ast::{Condition, NamedRef, Node, Rule, Ruleset, Value};
pub use error::{BqlError, Result};
pub use parser::{is_reference_name, parse};
pub use semantic::{validate, SemanticError};
pub use serializer::{serialize, RenderMode};
