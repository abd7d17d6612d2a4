//! BQL Named Queries
//!
//! Saved queries that other BQL text refers to by bare name, the store
//! abstraction that persists them, and the resolver that expands and
//! collapses name references.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub mod resolver;
pub mod store;

pub use resolver::{Resolver, ResolverConfig};
pub use store::{DirectoryStore, DirectoryStoreConfig, InMemoryStore, LoadStats};

/// A saved, named BQL query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedQuery {
    /// Unique identifier (assigned by the store when empty)
    #[serde(default)]
    pub id: String,

    /// Name used to reference the query from BQL text
    pub name: String,

    /// BQL text of the query
    pub text: String,

    /// Owning user; `None` for shared queries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Entity (search domain) the query applies to
    #[serde(default)]
    pub entity: String,

    /// Shipped with the system rather than created by a user
    #[serde(default)]
    pub is_system: bool,
}

impl NamedQuery {
    /// Create a shared query for `entity`
    pub fn new(
        name: impl Into<String>,
        text: impl Into<String>,
        entity: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            text: text.into(),
            owner: None,
            entity: entity.into(),
            is_system: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_system(mut self, is_system: bool) -> Self {
        self.is_system = is_system;
        self
    }

    /// Whether a lookup in `scope` may see this query
    pub fn visible_in(&self, scope: &QueryScope) -> bool {
        if self.entity != scope.entity {
            return false;
        }
        match &self.owner {
            None => true,
            Some(owner) => self.is_system || scope.owner.as_ref() == Some(owner),
        }
    }

    /// Lower ranks win when several visible queries share a name
    pub fn rank_in(&self, scope: &QueryScope) -> u8 {
        match (&self.owner, &scope.owner) {
            (Some(owner), Some(user)) if owner == user => 0,
            _ if self.is_system => 1,
            _ => 2,
        }
    }
}

/// Who is looking up a name, and in which entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct QueryScope {
    pub entity: String,
    #[serde(default)]
    pub owner: Option<String>,
}

impl QueryScope {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            owner: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// Persistence collaborator for named queries
#[async_trait::async_trait]
pub trait NamedQueryStore: Send + Sync {
    /// Find the query `name` visible in `scope`
    async fn find(
        &self,
        name: &str,
        scope: &QueryScope,
    ) -> std::result::Result<Option<NamedQuery>, StoreError>;

    /// Insert or replace a query, returning it with its id
    async fn save(&self, query: NamedQuery) -> std::result::Result<NamedQuery, StoreError>;

    /// Delete by id, returning whether anything was removed
    async fn delete(&self, id: &str) -> std::result::Result<bool, StoreError>;
}

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error accessing {0:?}: {1}")]
    IoError(PathBuf, std::io::Error),

    #[error("Invalid named query format: {0:?}")]
    InvalidFormat(PathBuf),

    #[error("Parse error in {0:?}: {1}")]
    ParseError(PathBuf, String),

    #[error("Serialization error for named query {0}: {1}")]
    SerializeError(String, String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Resolution errors
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Unknown named query: {name}")]
    UnknownNamedQuery { name: String },

    #[error("Cyclic named query reference: {name}")]
    CyclicNamedQuery { name: String },

    #[error("Named query nesting exceeds {max_depth} levels")]
    DepthExceeded { max_depth: usize },

    #[error("Named query {name} does not parse: {source}")]
    InvalidQueryText {
        name: String,
        #[source]
        source: bql_lang::BqlError,
    },

    #[error("Invalid named query name: {name}")]
    InvalidName { name: String },

    #[error("No node at path {path:?}")]
    InvalidPath { path: Vec<usize> },

    #[error("Named query lookup failed: {0}")]
    LookupFailure(#[from] StoreError),

    #[error(transparent)]
    Parse(#[from] bql_lang::BqlError),
}

/// Result type for resolver operations
pub type Result<T> = std::result::Result<T, ResolveError>;
