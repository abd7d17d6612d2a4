//! Named query stores
//!
//! [`InMemoryStore`] keeps queries in a map; [`DirectoryStore`] loads them
//! from a directory of `.json`, `.yaml`/`.yml` and `.bql` files and writes
//! saved queries back as `<id>.json`.

use crate::{NamedQuery, NamedQueryStore, QueryScope, StoreError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Pick the best visible query named `name`
fn select<'a>(
    queries: impl Iterator<Item = &'a NamedQuery>,
    name: &str,
    scope: &QueryScope,
) -> Option<NamedQuery> {
    queries
        .filter(|q| q.name == name && q.visible_in(scope))
        .min_by_key(|q| q.rank_in(scope))
        .cloned()
}

fn assign_id(query: &mut NamedQuery) {
    if query.id.is_empty() {
        query.id = uuid::Uuid::new_v4().to_string();
    }
}

/// Whether two records occupy the same name slot (name, entity, owner)
fn same_slot(a: &NamedQuery, b: &NamedQuery) -> bool {
    a.name == b.name && a.entity == b.entity && a.owner == b.owner
}

/// Map-backed store
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    queries: Arc<RwLock<HashMap<String, NamedQuery>>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `queries`
    pub fn with_queries(queries: impl IntoIterator<Item = NamedQuery>) -> Self {
        let map = queries
            .into_iter()
            .map(|mut q| {
                assign_id(&mut q);
                (q.id.clone(), q)
            })
            .collect();
        Self {
            queries: Arc::new(RwLock::new(map)),
        }
    }

    /// Get a query by id
    pub async fn get(&self, id: &str) -> Option<NamedQuery> {
        self.queries.read().await.get(id).cloned()
    }

    /// Number of stored queries
    pub async fn len(&self) -> usize {
        self.queries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queries.read().await.is_empty()
    }

    async fn insert(&self, query: NamedQuery) {
        self.queries.write().await.insert(query.id.clone(), query);
    }

    /// Insert or replace `query`.
    ///
    /// Without an id the record takes over the id of the query already
    /// holding its name slot, so a name stays unique per entity and owner.
    /// Returns the stored record and the id of any other record it evicted.
    async fn upsert(&self, mut query: NamedQuery) -> (NamedQuery, Option<String>) {
        let mut queries = self.queries.write().await;

        if query.id.is_empty() {
            if let Some(existing) = queries.values().find(|q| same_slot(q, &query)) {
                query.id = existing.id.clone();
            }
        }
        assign_id(&mut query);

        let evicted = queries
            .values()
            .find(|q| q.id != query.id && same_slot(q, &query))
            .map(|q| q.id.clone());
        if let Some(id) = &evicted {
            queries.remove(id);
        }

        queries.insert(query.id.clone(), query.clone());
        (query, evicted)
    }
}

#[async_trait::async_trait]
impl NamedQueryStore for InMemoryStore {
    async fn find(&self, name: &str, scope: &QueryScope) -> Result<Option<NamedQuery>, StoreError> {
        let queries = self.queries.read().await;
        Ok(select(queries.values(), name, scope))
    }

    async fn save(&self, query: NamedQuery) -> Result<NamedQuery, StoreError> {
        let (query, evicted) = self.upsert(query).await;
        debug!(id = %query.id, name = %query.name, replaced = ?evicted, "Saved named query");
        Ok(query)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.queries.write().await.remove(id).is_some())
    }
}

/// Directory store configuration
#[derive(Debug, Clone)]
pub struct DirectoryStoreConfig {
    /// Directory to load queries from and save them to
    pub dir: PathBuf,

    /// Entity assigned to bare `.bql` files
    pub default_entity: String,
}

impl Default for DirectoryStoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./named-queries"),
            default_entity: "default".to_string(),
        }
    }
}

/// Query loading statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadStats {
    pub loaded: usize,
    pub failed: usize,
}

/// Directory-backed store
pub struct DirectoryStore {
    config: DirectoryStoreConfig,
    queries: InMemoryStore,
    /// Backing file per query id
    files: RwLock<HashMap<String, PathBuf>>,
}

impl DirectoryStore {
    /// Create a new directory store (nothing is read until `load_all`)
    pub fn new(config: DirectoryStoreConfig) -> Self {
        Self {
            config,
            queries: InMemoryStore::new(),
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Load all queries from the configured directory
    pub async fn load_all(&self) -> Result<LoadStats, StoreError> {
        info!(dir = %self.config.dir.display(), "Loading named queries");

        let mut stats = LoadStats::default();

        if !self.config.dir.exists() {
            warn!(dir = %self.config.dir.display(), "Named query directory does not exist");
            return Ok(stats);
        }

        let mut entries = tokio::fs::read_dir(&self.config.dir)
            .await
            .map_err(|e| StoreError::IoError(self.config.dir.clone(), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::IoError(self.config.dir.clone(), e))?
        {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }

            match self.load_file(&path).await {
                Ok(query) => {
                    stats.loaded += 1;
                    debug!(path = %path.display(), name = %query.name, "Loaded named query");
                    self.files.write().await.insert(query.id.clone(), path);
                    self.queries.insert(query).await;
                }
                Err(e) => {
                    stats.failed += 1;
                    error!(path = %path.display(), error = %e, "Failed to load named query");
                }
            }
        }

        info!(
            loaded = stats.loaded,
            failed = stats.failed,
            "Named query loading complete"
        );

        Ok(stats)
    }

    /// Parse a single query file
    async fn load_file(&self, path: &Path) -> Result<NamedQuery, StoreError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| StoreError::InvalidFormat(path.to_path_buf()))?;

        let content = match extension {
            "json" | "yaml" | "yml" | "bql" => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| StoreError::IoError(path.to_path_buf(), e))?,
            _ => return Err(StoreError::InvalidFormat(path.to_path_buf())),
        };

        let mut query = match extension {
            "json" => serde_json::from_str::<NamedQuery>(&content)
                .map_err(|e| StoreError::ParseError(path.to_path_buf(), e.to_string()))?,
            "yaml" | "yml" => serde_yaml::from_str::<NamedQuery>(&content)
                .map_err(|e| StoreError::ParseError(path.to_path_buf(), e.to_string()))?,
            _ => {
                // Bare BQL text: the file stem is both id and name
                let name = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .ok_or_else(|| StoreError::InvalidFormat(path.to_path_buf()))?;
                NamedQuery::new(name, content.trim(), self.config.default_entity.clone())
                    .with_id(name)
                    .with_system(true)
            }
        };

        if query.entity.is_empty() {
            query.entity = self.config.default_entity.clone();
        }
        assign_id(&mut query);
        Ok(query)
    }

    /// Number of loaded queries
    pub async fn len(&self) -> usize {
        self.queries.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.queries.is_empty().await
    }

    /// Directory the store reads and writes
    pub fn dir(&self) -> &Path {
        &self.config.dir
    }
}

#[async_trait::async_trait]
impl NamedQueryStore for DirectoryStore {
    async fn find(&self, name: &str, scope: &QueryScope) -> Result<Option<NamedQuery>, StoreError> {
        self.queries.find(name, scope).await
    }

    async fn save(&self, query: NamedQuery) -> Result<NamedQuery, StoreError> {
        let (query, evicted) = self.queries.upsert(query).await;

        let content = serde_json::to_string_pretty(&query)
            .map_err(|e| StoreError::SerializeError(query.name.clone(), e.to_string()))?;

        tokio::fs::create_dir_all(&self.config.dir)
            .await
            .map_err(|e| StoreError::IoError(self.config.dir.clone(), e))?;

        let mut files = self.files.write().await;

        // JSON records keep their file; anything else is rewritten as `<id>.json`
        let previous = files.get(&query.id).cloned();
        let path = match &previous {
            Some(path) if path.extension().and_then(|e| e.to_str()) == Some("json") => {
                path.clone()
            }
            _ => self.config.dir.join(format!("{}.json", query.id)),
        };

        tokio::fs::write(&path, content)
            .await
            .map_err(|e| StoreError::IoError(path.clone(), e))?;

        let mut stale: Vec<PathBuf> = previous.into_iter().filter(|p| *p != path).collect();
        if let Some(id) = evicted {
            stale.extend(files.remove(&id).filter(|p| *p != path));
        }
        for old in &stale {
            remove_file(old).await?;
        }

        info!(id = %query.id, name = %query.name, path = %path.display(), "Saved named query");
        files.insert(query.id.clone(), path);
        Ok(query)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        if let Some(path) = self.files.write().await.remove(id) {
            remove_file(&path).await?;
        }
        self.queries.delete(id).await
    }
}

async fn remove_file(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "Named query file already removed");
            Ok(())
        }
        Err(e) => Err(StoreError::IoError(path.to_path_buf(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_scope_preference() {
        let store = InMemoryStore::with_queries(vec![
            NamedQuery::new("JOHNS", "fname = shared", "people"),
            NamedQuery::new("JOHNS", "fname = mine", "people").with_owner("alice"),
            NamedQuery::new("JOHNS", "fname = theirs", "people").with_owner("bob"),
        ]);

        let alice = QueryScope::new("people").with_owner("alice");
        let found = store.find("JOHNS", &alice).await.unwrap().unwrap();
        assert_eq!(found.text, "fname = mine");

        let carol = QueryScope::new("people").with_owner("carol");
        let found = store.find("JOHNS", &carol).await.unwrap().unwrap();
        assert_eq!(found.text, "fname = shared");

        let other = QueryScope::new("places");
        assert!(store.find("JOHNS", &other).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_save_assigns_id() {
        let store = InMemoryStore::new();
        let saved = store
            .save(NamedQuery::new("A", "x = 1", "people"))
            .await
            .unwrap();
        assert!(!saved.id.is_empty());
        assert_eq!(store.get(&saved.id).await, Some(saved.clone()));

        assert!(store.delete(&saved.id).await.unwrap());
        assert!(!store.delete(&saved.id).await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_directory_load_formats() {
        let temp_dir = tempfile::tempdir().unwrap();

        std::fs::write(
            temp_dir.path().join("johns.json"),
            r#"{"id": "q-1", "name": "JOHNS", "text": "fname = \"john\"", "entity": "people"}"#,
        )
        .unwrap();
        std::fs::write(
            temp_dir.path().join("smiths.yaml"),
            "name: SMITHS\ntext: lname = smith\nentity: people\nowner: alice\n",
        )
        .unwrap();
        std::fs::write(temp_dir.path().join("ADULTS.bql"), "age >= 18\n").unwrap();
        std::fs::write(temp_dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();

        let store = DirectoryStore::new(DirectoryStoreConfig {
            dir: temp_dir.path().to_path_buf(),
            default_entity: "people".to_string(),
        });
        let stats = store.load_all().await.unwrap();

        assert_eq!(stats, LoadStats { loaded: 3, failed: 2 });

        let scope = QueryScope::new("people").with_owner("alice");
        let adults = store.find("ADULTS", &scope).await.unwrap().unwrap();
        assert_eq!(adults.text, "age >= 18");
        assert_eq!(adults.id, "ADULTS");

        let smiths = store.find("SMITHS", &scope).await.unwrap().unwrap();
        assert!(!smiths.id.is_empty());
    }

    #[tokio::test]
    async fn test_directory_save_and_delete() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = DirectoryStoreConfig {
            dir: temp_dir.path().join("queries"),
            ..Default::default()
        };

        let store = DirectoryStore::new(config.clone());
        let saved = store
            .save(NamedQuery::new("JOHNS", "fname = john", "default"))
            .await
            .unwrap();
        let path = config.dir.join(format!("{}.json", saved.id));
        assert!(path.exists());

        // A fresh store sees the saved file
        let reloaded = DirectoryStore::new(config);
        assert_eq!(reloaded.load_all().await.unwrap().loaded, 1);
        let found = reloaded
            .find("JOHNS", &QueryScope::new("default"))
            .await
            .unwrap();
        assert_eq!(found, Some(saved.clone()));

        assert!(reloaded.delete(&saved.id).await.unwrap());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_in_memory_resave_replaces_same_slot() {
        let store = InMemoryStore::new();
        let first = store
            .save(NamedQuery::new("AB", "fname = a", "people"))
            .await
            .unwrap();
        let second = store
            .save(NamedQuery::new("AB", "fname = b", "people"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.len().await, 1);

        // Another owner or entity gets its own record
        store
            .save(NamedQuery::new("AB", "fname = c", "people").with_owner("alice"))
            .await
            .unwrap();
        store
            .save(NamedQuery::new("AB", "fname = d", "places"))
            .await
            .unwrap();
        assert_eq!(store.len().await, 3);

        let found = store
            .find("AB", &QueryScope::new("people"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.text, "fname = b");
    }

    #[tokio::test]
    async fn test_directory_keeps_same_name_in_other_scopes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = DirectoryStoreConfig {
            dir: temp_dir.path().to_path_buf(),
            default_entity: "people".to_string(),
        };

        let store = DirectoryStore::new(config.clone());
        let shared = store
            .save(NamedQuery::new("JOHNS", "fname = shared", "people"))
            .await
            .unwrap();
        let mine = store
            .save(NamedQuery::new("JOHNS", "fname = mine", "people").with_owner("alice"))
            .await
            .unwrap();
        store
            .save(NamedQuery::new("JOHNS", "fname = newer", "people"))
            .await
            .unwrap();

        let reloaded = DirectoryStore::new(config.clone());
        assert_eq!(reloaded.load_all().await.unwrap(), LoadStats { loaded: 2, failed: 0 });

        let found = reloaded
            .find("JOHNS", &QueryScope::new("people"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, shared.id);
        assert_eq!(found.text, "fname = newer");

        let alice = QueryScope::new("people").with_owner("alice");
        let found = reloaded.find("JOHNS", &alice).await.unwrap().unwrap();
        assert_eq!(found.text, "fname = mine");

        // Deleting one record leaves the other's file alone
        assert!(reloaded.delete(&mine.id).await.unwrap());
        assert!(config.dir.join(format!("{}.json", shared.id)).exists());
        assert!(!config.dir.join(format!("{}.json", mine.id)).exists());
    }

    #[tokio::test]
    async fn test_directory_resave_of_bql_file_moves_to_json() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("ADULTS.bql"), "age >= 18\n").unwrap();
        let config = DirectoryStoreConfig {
            dir: temp_dir.path().to_path_buf(),
            default_entity: "people".to_string(),
        };

        let store = DirectoryStore::new(config.clone());
        store.load_all().await.unwrap();
        let mut adults = store
            .find("ADULTS", &QueryScope::new("people"))
            .await
            .unwrap()
            .unwrap();
        adults.text = "age >= 21".to_string();
        store.save(adults).await.unwrap();

        assert!(!temp_dir.path().join("ADULTS.bql").exists());
        assert!(temp_dir.path().join("ADULTS.json").exists());

        let reloaded = DirectoryStore::new(config);
        assert_eq!(reloaded.load_all().await.unwrap().loaded, 1);
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let store = DirectoryStore::new(DirectoryStoreConfig {
            dir: PathBuf::from("/nonexistent/named-queries"),
            ..Default::default()
        });
        assert_eq!(store.load_all().await.unwrap(), LoadStats::default());
        assert_eq!(store.len().await, 0);
    }
}
