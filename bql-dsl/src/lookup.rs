//! Distinct keyword value lookups

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

/// Lookup errors
#[derive(Debug, Clone, Error)]
pub enum LookupError {
    #[error("Distinct value lookup for {field} failed: {message}")]
    Failed { field: String, message: String },

    #[error("Search engine unavailable: {0}")]
    Unavailable(String),
}

impl LookupError {
    pub fn failed(field: impl Into<String>, message: impl Into<String>) -> Self {
        LookupError::Failed {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Source of the distinct stored values of a keyword field
#[async_trait::async_trait]
pub trait DistinctValuesLookup: Send + Sync {
    /// All distinct values stored in `field`
    async fn distinct_values(&self, field: &str) -> Result<Vec<String>, LookupError>;
}

#[async_trait::async_trait]
impl<T: DistinctValuesLookup + ?Sized> DistinctValuesLookup for Arc<T> {
    async fn distinct_values(&self, field: &str) -> Result<Vec<String>, LookupError> {
        (**self).distinct_values(field).await
    }
}

/// Cross-call cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a fetched value set stays fresh
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
        }
    }
}

/// TTL cache in front of another lookup
pub struct CachedLookup<L> {
    inner: L,
    config: CacheConfig,
    entries: DashMap<String, (Instant, Arc<Vec<String>>)>,
}

impl<L: DistinctValuesLookup> CachedLookup<L> {
    pub fn new(inner: L) -> Self {
        Self::with_config(inner, CacheConfig::default())
    }

    pub fn with_config(inner: L, config: CacheConfig) -> Self {
        Self {
            inner,
            config,
            entries: DashMap::new(),
        }
    }

    /// Drop every cached value set
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn fresh(&self, field: &str) -> Option<Arc<Vec<String>>> {
        let entry = self.entries.get(field)?;
        let (fetched_at, values) = entry.value();
        if fetched_at.elapsed() < self.config.ttl {
            Some(values.clone())
        } else {
            None
        }
    }
}

#[async_trait::async_trait]
impl<L: DistinctValuesLookup> DistinctValuesLookup for CachedLookup<L> {
    async fn distinct_values(&self, field: &str) -> Result<Vec<String>, LookupError> {
        if let Some(values) = self.fresh(field) {
            trace!(field = %field, "Distinct value cache hit");
            return Ok(values.as_ref().clone());
        }

        let values = self.inner.distinct_values(field).await?;
        debug!(field = %field, count = values.len(), "Cached distinct values");
        self.entries
            .insert(field.to_string(), (Instant::now(), Arc::new(values.clone())));
        Ok(values)
    }
}
