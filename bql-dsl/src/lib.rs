//! BQL Query DSL Compiler
//!
//! Compiles validated BQL trees into search-engine query documents
//! (`bool`/`term`/`terms`/`range`/`regexp`/`exists`/`query_string`).

pub mod clause;
pub mod compiler;
pub mod lookup;

// Re-exports
pub use clause::{QueryClause, RangeOp, Scalar};
pub use compiler::{compile, CompileError, DslCompiler, DslCompilerConfig, Result};
pub use lookup::{CacheConfig, CachedLookup, DistinctValuesLookup, LookupError};
