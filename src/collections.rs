//! Collection registry.
//!
//! Holds every loaded [`Collection`] ordered by name, and answers the
//! cross-collection question "is this URI being edited somewhere else?".
//! Collections are shared as `Arc<Collection>` so a publish attempt can keep
//! working on one after it has been evicted from the registry.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::collection::Collection;
use crate::config::Config;
use crate::content::ContentStore;
use crate::error::CollectionError;
use crate::traits::Permissions;
use publish_harness_core::models::{CollectionDescription, CollectionType};
use publish_harness_core::uri;

pub struct Collections {
    collections_dir: PathBuf,
    published: ContentStore,
    permissions: Arc<dyn Permissions>,
    entries: RwLock<Vec<Arc<Collection>>>,
}

impl Collections {
    /// Load every valid collection under the configured store root.
    ///
    /// Invalid collection directories are logged and skipped.
    pub fn load(config: &Config, permissions: Arc<dyn Permissions>) -> Result<Self> {
        let collections_dir = config.store.collections_dir();
        let master_dir = config.store.master_dir();
        for dir in [&collections_dir, &master_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let published = ContentStore::with_excludes(&master_dir, &config.store.exclude_globs)?;
        let registry = Self {
            collections_dir,
            published,
            permissions,
            entries: RwLock::new(Vec::new()),
        };

        let mut loaded = Vec::new();
        for id in registry.ids_on_disk()? {
            match registry.open(&id) {
                Ok(collection) => loaded.push(Arc::new(collection)),
                Err(e) => warn!(collection = %id, error = %e, "Skipping invalid collection"),
            }
        }
        info!(count = loaded.len(), dir = %registry.collections_dir.display(), "Loaded collections");

        *registry.write_entries() = loaded;
        registry.sort();
        Ok(registry)
    }

    fn ids_on_disk(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.collections_dir)
            .with_context(|| format!("Failed to read {}", self.collections_dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn open(&self, id: &str) -> Result<Collection, CollectionError> {
        Collection::load(
            &self.collections_dir,
            id,
            &self.published,
            self.permissions.clone(),
        )
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, Vec<Arc<Collection>>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, Vec<Arc<Collection>>> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sort(&self) {
        self.write_entries()
            .sort_by_key(|c| c.name().to_lowercase());
    }

    pub fn collections_dir(&self) -> &Path {
        &self.collections_dir
    }

    /// The published master store shared by every collection.
    pub fn published(&self) -> &ContentStore {
        &self.published
    }

    pub fn permissions(&self) -> &Arc<dyn Permissions> {
        &self.permissions
    }

    // ═══════════════════════════════════════════════════════════════════
    // Lookup
    // ═══════════════════════════════════════════════════════════════════

    /// All loaded collections, ordered by name.
    pub fn list(&self) -> Vec<Arc<Collection>> {
        self.read_entries().clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Collection>> {
        self.read_entries().iter().find(|c| c.id() == id).cloned()
    }

    /// Case-insensitive lookup by display name.
    pub fn get_by_name(&self, name: &str) -> Option<Arc<Collection>> {
        let name = name.trim();
        self.read_entries()
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Resolve a CLI-style reference: id first, then name.
    pub fn resolve(&self, id_or_name: &str) -> Option<Arc<Collection>> {
        self.get(id_or_name)
            .or_else(|| self.get_by_name(id_or_name))
    }

    /// Load one collection straight from disk, replacing any cached entry.
    pub fn load_by_id(&self, id: &str) -> Result<Arc<Collection>, CollectionError> {
        let collection = Arc::new(self.open(id)?);
        {
            let mut entries = self.write_entries();
            entries.retain(|c| c.id() != id);
            entries.push(collection.clone());
        }
        self.sort();
        Ok(collection)
    }

    /// Pick up collections created on disk by other processes and drop those
    /// removed. Returns the number newly loaded.
    pub fn refresh(&self) -> Result<usize> {
        let on_disk = self.ids_on_disk()?;
        let known: Vec<String> = self.read_entries().iter().map(|c| c.id().to_string()).collect();

        let mut added = 0;
        for id in on_disk.iter().filter(|id| !known.contains(*id)) {
            match self.open(id) {
                Ok(collection) => {
                    self.write_entries().push(Arc::new(collection));
                    added += 1;
                }
                Err(e) => debug!(collection = %id, error = %e, "Not loading collection"),
            }
        }
        for id in known.iter().filter(|id| !on_disk.contains(*id)) {
            self.evict(id);
        }
        if added > 0 {
            self.sort();
        }
        Ok(added)
    }

    /// The collection, other than `except`, currently holding `content_uri`
    /// in any staging store.
    pub fn editing_collection(&self, content_uri: &str, except: Option<&str>) -> Option<Arc<Collection>> {
        self.read_entries()
            .iter()
            .filter(|c| Some(c.id()) != except)
            .find(|c| c.is_in_collection(content_uri))
            .cloned()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Mutation
    // ═══════════════════════════════════════════════════════════════════

    pub fn create_collection(
        &self,
        actor: &str,
        name: &str,
        collection_type: CollectionType,
        publish_date: Option<DateTime<Utc>>,
        teams: Vec<String>,
    ) -> Result<Arc<Collection>, CollectionError> {
        if !self.permissions.can_edit(actor) {
            return Err(CollectionError::PermissionDenied(actor.to_string()));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(CollectionError::EmptyName);
        }
        if self.get_by_name(name).is_some() {
            return Err(CollectionError::NameConflict(name.to_string()));
        }
        if collection_type == CollectionType::Scheduled && publish_date.is_none() {
            return Err(CollectionError::MissingPublishDate(name.to_string()));
        }

        let mut description = CollectionDescription::new(
            uri::collection_id(name),
            name.to_string(),
            collection_type,
            publish_date,
        );
        description.teams = teams;

        let collection = Arc::new(Collection::create_on_disk(
            &self.collections_dir,
            description,
            &self.published,
            self.permissions.clone(),
        )?);
        self.write_entries().push(collection.clone());
        self.sort();

        info!(collection = %collection.id(), name, actor, "Collection created");
        Ok(collection)
    }

    /// Delete an empty collection from disk and the registry.
    pub fn delete_collection(&self, actor: &str, id: &str) -> Result<(), CollectionError> {
        if !self.permissions.can_edit(actor) {
            return Err(CollectionError::PermissionDenied(actor.to_string()));
        }
        let collection = self
            .get(id)
            .ok_or_else(|| CollectionError::NotFound(id.to_string()))?;
        let count = collection.uri_count()?;
        if count > 0 {
            return Err(CollectionError::NotEmpty {
                id: id.to_string(),
                count,
            });
        }

        collection.remove_from_disk()?;
        self.evict(id);
        info!(collection = %id, actor, "Collection deleted");
        Ok(())
    }

    /// Drop a collection from the in-memory registry.
    pub fn evict(&self, id: &str) -> Option<Arc<Collection>> {
        let mut entries = self.write_entries();
        let idx = entries.iter().position(|c| c.id() == id)?;
        debug!(collection = %id, "Evicted collection");
        Some(entries.remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PermissionsConfig;
    use crate::permissions::ConfigPermissions;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Config, Arc<dyn Permissions>) {
        let tmp = TempDir::new().unwrap();
        let config = Config::minimal(tmp.path());
        let permissions: Arc<dyn Permissions> = Arc::new(ConfigPermissions::new(&PermissionsConfig {
            editors: vec!["alice".to_string()],
            teams: Default::default(),
        }));
        (tmp, config, permissions)
    }

    #[test]
    fn create_validates_names_and_dates() {
        let (_tmp, config, permissions) = setup();
        let reg = Collections::load(&config, permissions).unwrap();

        assert!(matches!(
            reg.create_collection("alice", "  ", CollectionType::Manual, None, vec![]),
            Err(CollectionError::EmptyName)
        ));
        assert!(matches!(
            reg.create_collection("alice", "Weekly", CollectionType::Scheduled, None, vec![]),
            Err(CollectionError::MissingPublishDate(_))
        ));
        assert!(matches!(
            reg.create_collection("mallory", "Weekly", CollectionType::Manual, None, vec![]),
            Err(CollectionError::PermissionDenied(_))
        ));

        reg.create_collection("alice", "Weekly", CollectionType::Manual, None, vec![])
            .unwrap();
        assert!(matches!(
            reg.create_collection("alice", "WEEKLY", CollectionType::Manual, None, vec![]),
            Err(CollectionError::NameConflict(_))
        ));
    }

    #[test]
    fn list_is_ordered_by_name_and_survives_reload() {
        let (_tmp, config, permissions) = setup();
        let reg = Collections::load(&config, permissions.clone()).unwrap();
        reg.create_collection("alice", "zeta", CollectionType::Manual, None, vec![])
            .unwrap();
        let alpha = reg
            .create_collection("alice", "Alpha", CollectionType::Manual, None, vec![])
            .unwrap();

        let names: Vec<String> = reg.list().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["Alpha", "zeta"]);

        let reloaded = Collections::load(&config, permissions).unwrap();
        assert_eq!(reloaded.list().len(), 2);
        assert!(reloaded.get(alpha.id()).is_some());
        assert!(reloaded.get_by_name("ALPHA").is_some());
        assert!(reloaded.resolve(alpha.id()).is_some());
    }

    #[test]
    fn invalid_collections_are_skipped_on_load() {
        let (_tmp, config, permissions) = setup();
        let reg = Collections::load(&config, permissions.clone()).unwrap();
        let c = reg
            .create_collection("alice", "broken", CollectionType::Manual, None, vec![])
            .unwrap();
        fs::remove_dir_all(c.complete().root()).unwrap();

        let reloaded = Collections::load(&config, permissions).unwrap();
        assert!(reloaded.list().is_empty());
        assert!(matches!(
            reloaded.load_by_id(c.id()),
            Err(CollectionError::Invalid { .. })
        ));
    }

    #[test]
    fn delete_only_when_empty() {
        let (_tmp, config, permissions) = setup();
        let reg = Collections::load(&config, permissions).unwrap();
        let c = reg
            .create_collection("alice", "tmp", CollectionType::Manual, None, vec![])
            .unwrap();
        c.create("alice", "/a/data.json", &reg).unwrap();

        assert!(matches!(
            reg.delete_collection("alice", c.id()),
            Err(CollectionError::NotEmpty { count: 1, .. })
        ));

        c.delete_content("alice", "/a/data.json").unwrap();
        reg.delete_collection("alice", c.id()).unwrap();
        assert!(reg.get(c.id()).is_none());
        assert!(!c.dir().exists());
        assert!(!c.description_path().exists());
    }

    #[test]
    fn refresh_tracks_other_processes() {
        let (_tmp, config, permissions) = setup();
        let reg = Collections::load(&config, permissions.clone()).unwrap();
        let other = Collections::load(&config, permissions).unwrap();

        let c = other
            .create_collection("alice", "elsewhere", CollectionType::Manual, None, vec![])
            .unwrap();
        assert!(reg.get(c.id()).is_none());
        assert_eq!(reg.refresh().unwrap(), 1);
        assert!(reg.get(c.id()).is_some());

        other.delete_collection("alice", c.id()).unwrap();
        assert_eq!(reg.refresh().unwrap(), 0);
        assert!(reg.get(c.id()).is_none());
    }

    #[test]
    fn editing_collection_honours_exception() {
        let (_tmp, config, permissions) = setup();
        let reg = Collections::load(&config, permissions).unwrap();
        let c = reg
            .create_collection("alice", "one", CollectionType::Manual, None, vec![])
            .unwrap();
        c.create("alice", "/a/data.json", &reg).unwrap();

        assert_eq!(
            reg.editing_collection("/a/data.json", None).map(|c| c.id().to_string()),
            Some(c.id().to_string())
        );
        assert!(reg.editing_collection("/a/data.json", Some(c.id())).is_none());
        assert!(reg.evict(c.id()).is_some());
        assert!(reg.editing_collection("/a/data.json", None).is_none());
    }
}
