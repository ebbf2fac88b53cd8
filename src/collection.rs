//! Collection staging state machine.
//!
//! A [`Collection`] owns three staging stores and a persisted description:
//!
//! ```text
//! collections/<id>/inprogress/…   drafts being edited
//! collections/<id>/complete/…     finished, awaiting review
//! collections/<id>/reviewed/…     reviewed, ready to publish
//! collections/<id>/manifest.json  written at approval
//! collections/<id>.json           description + event ledger
//! collections/<id>.lock           cross-process publish lock
//! ```
//!
//! A content URI lives in at most one staging store. Content only ever
//! *moves* between stages; the one copy is from the published master store
//! into `inprogress` when already-published content is edited.
//!
//! ```text
//!            create              complete               review
//! Absent ──────────▶ InProgress ──────────▶ Complete ──────────▶ Reviewed
//!    ▲                  ▲   ▲                   │                    │
//!    │   edit (copy)    │   └──── edit (move) ──┴────────────────────┘
//! Published ────────────┘
//! ```
//!
//! When a URI is somehow present in more than one store the precedence is
//! `inprogress` > `complete` > `reviewed`.
//!
//! Every operation returns `Ok(false)` when its precondition does not hold
//! (no edit permission, wrong state, URI held elsewhere, collection
//! approved). `Err` is reserved
//! for I/O faults and for reviewing content with no completion on record.
//! Successful transitions append to the event ledger and persist the
//! description before returning.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bundle;
use crate::collections::Collections;
use crate::content::{ContentStore, LookupChain};
use crate::error::CollectionError;
use crate::traits::Permissions;
use publish_harness_core::manifest::Manifest;
use publish_harness_core::models::{
    ApprovalStatus, CollectionDescription, Event, EventType, PendingDelete,
};
use publish_harness_core::uri;

const IN_PROGRESS_DIR: &str = "inprogress";
const COMPLETE_DIR: &str = "complete";
const REVIEWED_DIR: &str = "reviewed";
const MANIFEST_FILE: &str = "manifest.json";

pub struct Collection {
    id: String,
    name: String,
    dir: PathBuf,
    description_path: PathBuf,
    lock_path: PathBuf,
    description: Mutex<CollectionDescription>,
    in_progress: ContentStore,
    complete: ContentStore,
    reviewed: ContentStore,
    published: ContentStore,
    permissions: Arc<dyn Permissions>,
    publish_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("dir", &self.dir)
            .finish()
    }
}

impl Collection {
    // ═══════════════════════════════════════════════════════════════════
    // Construction and persistence
    // ═══════════════════════════════════════════════════════════════════

    fn assemble(
        collections_dir: &Path,
        description: CollectionDescription,
        published: &ContentStore,
        permissions: Arc<dyn Permissions>,
    ) -> Self {
        let dir = collections_dir.join(&description.id);
        Self {
            id: description.id.clone(),
            name: description.name.clone(),
            description_path: collections_dir.join(format!("{}.json", description.id)),
            lock_path: collections_dir.join(format!("{}.lock", description.id)),
            in_progress: published.with_root(dir.join(IN_PROGRESS_DIR)),
            complete: published.with_root(dir.join(COMPLETE_DIR)),
            reviewed: published.with_root(dir.join(REVIEWED_DIR)),
            published: published.clone(),
            dir,
            description: Mutex::new(description),
            permissions,
            publish_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Lay out a brand-new collection on disk and persist its description.
    pub(crate) fn create_on_disk(
        collections_dir: &Path,
        description: CollectionDescription,
        published: &ContentStore,
        permissions: Arc<dyn Permissions>,
    ) -> Result<Self, CollectionError> {
        let collection = Self::assemble(collections_dir, description, published, permissions);
        for store in [
            &collection.in_progress,
            &collection.complete,
            &collection.reviewed,
        ] {
            fs::create_dir_all(store.root()).map_err(|e| CollectionError::io(store.root(), e))?;
        }
        collection.save()?;
        Ok(collection)
    }

    /// Load the collection described by `collections/<id>.json`.
    ///
    /// Fails with [`CollectionError::Invalid`] when any staging directory is
    /// missing.
    pub(crate) fn load(
        collections_dir: &Path,
        id: &str,
        published: &ContentStore,
        permissions: Arc<dyn Permissions>,
    ) -> Result<Self, CollectionError> {
        let description_path = collections_dir.join(format!("{}.json", id));
        if !description_path.is_file() {
            return Err(CollectionError::Invalid {
                path: collections_dir.join(id),
                missing: format!("{}.json", id),
            });
        }

        let dir = collections_dir.join(id);
        for sub in [IN_PROGRESS_DIR, COMPLETE_DIR, REVIEWED_DIR] {
            if !dir.join(sub).is_dir() {
                return Err(CollectionError::Invalid {
                    path: dir.clone(),
                    missing: format!("{}/", sub),
                });
            }
        }

        let content = fs::read_to_string(&description_path)
            .map_err(|e| CollectionError::io(&description_path, e))?;
        let description: CollectionDescription =
            serde_json::from_str(&content).map_err(|e| CollectionError::Json {
                path: description_path.clone(),
                source: e,
            })?;

        Ok(Self::assemble(
            collections_dir,
            description,
            published,
            permissions,
        ))
    }

    fn lock_description(&self) -> MutexGuard<'_, CollectionDescription> {
        self.description
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write the description atomically (temp file + rename).
    fn persist(&self, description: &CollectionDescription) -> Result<(), CollectionError> {
        let json = serde_json::to_vec_pretty(description).map_err(|e| CollectionError::Json {
            path: self.description_path.clone(),
            source: e,
        })?;
        let tmp = self
            .description_path
            .with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, json).map_err(|e| CollectionError::io(&tmp, e))?;
        fs::rename(&tmp, &self.description_path)
            .map_err(|e| CollectionError::io(&self.description_path, e))
    }

    /// Persist the current description.
    pub fn save(&self) -> Result<(), CollectionError> {
        let description = self.lock_description();
        self.persist(&description)
    }

    /// Mutate the description and persist it before returning.
    pub fn update<F>(&self, f: F) -> Result<(), CollectionError>
    where
        F: FnOnce(&mut CollectionDescription),
    {
        let mut description = self.lock_description();
        f(&mut description);
        self.persist(&description)
    }

    fn record(&self, content_uri: &str, event_type: EventType, actor: &str) -> Result<(), CollectionError> {
        self.update(|d| d.add_event_for_uri(content_uri, Event::now(event_type, actor)))
    }

    /// Remove the collection's directory, description and lock file.
    pub(crate) fn remove_from_disk(&self) -> Result<(), CollectionError> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir).map_err(|e| CollectionError::io(&self.dir, e))?;
        }
        for file in [&self.description_path, &self.lock_path] {
            match fs::remove_file(file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CollectionError::io(file, e)),
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn description_path(&self) -> &Path {
        &self.description_path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// Snapshot of the description.
    pub fn description(&self) -> CollectionDescription {
        self.lock_description().clone()
    }

    pub fn in_progress(&self) -> &ContentStore {
        &self.in_progress
    }

    pub fn complete(&self) -> &ContentStore {
        &self.complete
    }

    pub fn reviewed(&self) -> &ContentStore {
        &self.reviewed
    }

    pub fn published(&self) -> &ContentStore {
        &self.published
    }

    /// The manifest written at approval, or one built from the reviewed tree
    /// when none is on disk.
    pub fn manifest(&self) -> Result<Manifest, CollectionError> {
        let path = self.manifest_path();
        if path.is_file() {
            let content = fs::read_to_string(&path).map_err(|e| CollectionError::io(&path, e))?;
            return serde_json::from_str(&content).map_err(|e| CollectionError::Json { path, source: e });
        }
        let reviewed = self.reviewed.list()?;
        let pending = self.lock_description().pending_deletes.clone();
        Ok(Manifest::build(reviewed.iter().map(|u| u.as_str()), &pending))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════

    pub fn is_in_progress(&self, content_uri: &str) -> bool {
        self.in_progress.exists(content_uri)
    }

    pub fn is_complete(&self, content_uri: &str) -> bool {
        !self.is_in_progress(content_uri) && self.complete.exists(content_uri)
    }

    pub fn is_reviewed(&self, content_uri: &str) -> bool {
        !self.is_in_progress(content_uri)
            && !self.complete.exists(content_uri)
            && self.reviewed.exists(content_uri)
    }

    pub fn is_in_collection(&self, content_uri: &str) -> bool {
        self.in_progress.exists(content_uri)
            || self.complete.exists(content_uri)
            || self.reviewed.exists(content_uri)
    }

    /// Number of files across the three staging stores.
    pub fn uri_count(&self) -> Result<usize, CollectionError> {
        Ok(self.in_progress.count()? + self.complete.count()? + self.reviewed.count()?)
    }

    /// `true` from approval until [`unlock`](Self::unlock) or publish. The
    /// staged content is frozen while this holds.
    pub fn is_approved(&self) -> bool {
        let description = self.lock_description();
        description.publish_complete
            || matches!(
                description.approval_status,
                ApprovalStatus::InProgress | ApprovalStatus::Complete
            )
    }

    /// `true` while a publish attempt holds the in-process lock.
    pub fn is_publishing(&self) -> bool {
        self.publish_lock.try_lock().is_err()
    }

    /// Take the in-process publish lock, waiting for any attempt in flight.
    pub(crate) async fn lock_for_publish(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.publish_lock.lock().await
    }

    /// Edit permission on a collection that is not approved.
    fn editable_by(&self, actor: &str) -> bool {
        if self.is_approved() {
            debug!(collection = %self.id, actor, "Rejected: collection is approved");
            return false;
        }
        self.permissions.can_edit(actor)
    }

    /// Staging store currently holding the URI, by precedence.
    fn holder(&self, content_uri: &str) -> Option<&ContentStore> {
        [&self.in_progress, &self.complete, &self.reviewed]
            .into_iter()
            .find(|s| s.exists(content_uri))
    }

    /// Resolve a URI for `actor`.
    ///
    /// Actors who may view the collection see its staged content first;
    /// everyone falls back to the published master store.
    pub fn find(&self, actor: &str, content_uri: &str) -> Option<PathBuf> {
        let can_view = {
            let description = self.lock_description();
            self.permissions.can_view(actor, &description)
        };
        let chain = if can_view {
            LookupChain::new(vec![
                &self.in_progress,
                &self.complete,
                &self.reviewed,
                &self.published,
            ])
        } else {
            LookupChain::new(vec![&self.published])
        };
        chain.find(content_uri)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Per-URI transitions
    // ═══════════════════════════════════════════════════════════════════

    /// Start new content: an empty draft in `inprogress`.
    ///
    /// Rejected when the URI is already published, held by this collection,
    /// or being edited in any other collection.
    pub fn create(
        &self,
        actor: &str,
        content_uri: &str,
        registry: &Collections,
    ) -> Result<bool, CollectionError> {
        let content_uri = uri::normalize(content_uri);
        if !uri::is_safe(&content_uri) || !self.editable_by(actor) {
            return Ok(false);
        }
        if self.published.exists(&content_uri)
            || self.is_in_collection(&content_uri)
            || registry.editing_collection(&content_uri, None).is_some()
        {
            debug!(collection = %self.id, uri = %content_uri, "Create rejected: uri already exists");
            return Ok(false);
        }

        self.in_progress.create_empty(&content_uri)?;
        self.record(&content_uri, EventType::Created, actor)?;
        info!(collection = %self.id, uri = %content_uri, actor, "Content created");
        Ok(true)
    }

    /// Bring content back into `inprogress` for editing.
    ///
    /// Staged content moves; published content is copied from the master
    /// store. Already in-progress content is left as is.
    pub fn edit(
        &self,
        actor: &str,
        content_uri: &str,
        registry: &Collections,
    ) -> Result<bool, CollectionError> {
        let content_uri = uri::normalize(content_uri);
        if !uri::is_safe(&content_uri) || !self.editable_by(actor) {
            return Ok(false);
        }
        if let Some(other) = registry.editing_collection(&content_uri, Some(&self.id)) {
            debug!(
                collection = %self.id,
                uri = %content_uri,
                other = %other.id(),
                "Edit rejected: uri held by another collection"
            );
            return Ok(false);
        }

        if self.in_progress.exists(&content_uri) {
            return Ok(true);
        }

        if self.complete.exists(&content_uri) {
            self.complete.move_to(&content_uri, &self.in_progress)?;
        } else if self.reviewed.exists(&content_uri) {
            self.reviewed.move_to(&content_uri, &self.in_progress)?;
        } else if self.published.exists(&content_uri) {
            self.published.copy_to(&content_uri, &self.in_progress)?;
        } else {
            return Ok(false);
        }

        self.record(&content_uri, EventType::Edited, actor)?;
        info!(collection = %self.id, uri = %content_uri, actor, "Content edited");
        Ok(true)
    }

    /// Move a draft from `inprogress` to `complete`.
    pub fn complete_content(&self, actor: &str, content_uri: &str) -> Result<bool, CollectionError> {
        let content_uri = uri::normalize(content_uri);
        if !self.editable_by(actor) || !self.is_in_progress(&content_uri) {
            return Ok(false);
        }

        self.in_progress.move_to(&content_uri, &self.complete)?;
        self.record(&content_uri, EventType::Completed, actor)?;
        info!(collection = %self.id, uri = %content_uri, actor, "Content completed");
        Ok(true)
    }

    /// Move completed content to `reviewed`.
    ///
    /// The reviewer must not be whoever most recently completed it. Content
    /// in `complete` with no completion on record is a
    /// [`CollectionError::MissingCompletion`].
    pub fn review(&self, actor: &str, content_uri: &str) -> Result<bool, CollectionError> {
        let content_uri = uri::normalize(content_uri);
        if !self.editable_by(actor) || !self.is_complete(&content_uri) {
            return Ok(false);
        }

        let completed_by = {
            let description = self.lock_description();
            description
                .last_event_of(&content_uri, EventType::Completed)
                .map(|e| e.email.clone())
        };
        let Some(completed_by) = completed_by else {
            return Err(CollectionError::MissingCompletion {
                collection: self.id.clone(),
                uri: content_uri,
            });
        };
        if completed_by.eq_ignore_ascii_case(actor) {
            debug!(collection = %self.id, uri = %content_uri, actor, "Review rejected: self-review");
            return Ok(false);
        }

        self.complete.move_to(&content_uri, &self.reviewed)?;
        self.record(&content_uri, EventType::Reviewed, actor)?;
        info!(collection = %self.id, uri = %content_uri, actor, "Content reviewed");
        Ok(true)
    }

    /// Delete staged content from whichever store holds it.
    pub fn delete_content(&self, actor: &str, content_uri: &str) -> Result<bool, CollectionError> {
        let content_uri = uri::normalize(content_uri);
        if !self.editable_by(actor) {
            return Ok(false);
        }
        let Some(store) = self.holder(&content_uri) else {
            return Ok(false);
        };

        store.delete(&content_uri)?;
        self.record(&content_uri, EventType::Deleted, actor)?;
        info!(collection = %self.id, uri = %content_uri, actor, "Content deleted");
        Ok(true)
    }

    /// Declare published content (a file or a whole directory) for removal
    /// when this collection publishes. Repeat declarations are accepted once.
    pub fn mark_for_deletion(&self, actor: &str, content_uri: &str) -> Result<bool, CollectionError> {
        let content_uri = uri::normalize(content_uri);
        if !self.editable_by(actor) || !self.published.exists_any(&content_uri) {
            return Ok(false);
        }

        self.update(|d| {
            if !d.pending_deletes.iter().any(|p| p.uri == content_uri) {
                d.pending_deletes.push(PendingDelete {
                    uri: content_uri.clone(),
                    user: actor.to_string(),
                });
                d.add_event_for_uri(&content_uri, Event::now(EventType::Deleted, actor));
            }
        })?;
        info!(collection = %self.id, uri = %content_uri, actor, "Marked for deletion");
        Ok(true)
    }

    /// Snapshot published content as the next `previous/vN` version.
    ///
    /// Returns the versioned URI, or `None` when the actor may not edit or
    /// nothing is published at the URI.
    pub fn version(&self, actor: &str, content_uri: &str) -> Result<Option<String>, CollectionError> {
        let content_uri = uri::normalize(content_uri);
        if !self.editable_by(actor)
            || uri::is_versioned(&content_uri)
            || !self.published.exists(&content_uri)
        {
            return Ok(None);
        }

        let next = self.latest_version(&content_uri) + 1;
        let versioned = uri::versioned(&content_uri, next);
        let src = self.published.resolve(&content_uri);
        crate::content::copy_file(&src, &self.reviewed.resolve(&versioned))?;

        self.record(&versioned, EventType::Created, actor)?;
        info!(collection = %self.id, uri = %versioned, actor, "Version created");
        Ok(Some(versioned))
    }

    /// Highest `vN` already used next to the URI, published or staged.
    fn latest_version(&self, content_uri: &str) -> u32 {
        let dir = uri::parent(content_uri);
        let previous = format!("{}/{}", dir.trim_end_matches('/'), uri::VERSION_SEGMENT);
        [&self.published, &self.reviewed]
            .into_iter()
            .filter_map(|store| fs::read_dir(store.resolve(&previous)).ok())
            .flat_map(|entries| entries.filter_map(|e| e.ok()))
            .filter_map(|entry| uri::parse_version(&entry.file_name().to_string_lossy()))
            .max()
            .unwrap_or(0)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Collection-level transitions
    // ═══════════════════════════════════════════════════════════════════

    /// Approve the collection for publishing.
    ///
    /// Requires every item to be reviewed. Bundles timeseries directories,
    /// writes the manifest, and marks the collection `COMPLETE`. A failure
    /// while preparing leaves the collection in `ERROR`.
    pub fn approve(&self, actor: &str) -> Result<bool, CollectionError> {
        if !self.permissions.can_edit(actor) || self.lock_description().publish_complete {
            return Ok(false);
        }
        if self.in_progress.count()? > 0 || self.complete.count()? > 0 {
            debug!(collection = %self.id, "Approve rejected: unreviewed content");
            return Ok(false);
        }

        self.update(|d| d.approval_status = ApprovalStatus::InProgress)?;

        match self.prepare_for_publish() {
            Ok(manifest) => {
                self.update(|d| {
                    d.approval_status = ApprovalStatus::Complete;
                    d.add_event(Event::now(EventType::Approved, actor));
                })?;
                info!(
                    collection = %self.id,
                    actor,
                    copies = manifest.files_to_copy.len(),
                    deletes = manifest.uris_to_delete.len(),
                    "Collection approved"
                );
                Ok(true)
            }
            Err(e) => {
                warn!(collection = %self.id, error = %e, "Approval failed");
                if let Err(save_err) = self.update(|d| d.approval_status = ApprovalStatus::Error) {
                    warn!(collection = %self.id, error = %save_err, "Failed to record approval error");
                }
                Err(e)
            }
        }
    }

    fn prepare_for_publish(&self) -> Result<Manifest, CollectionError> {
        bundle::bundle_timeseries(&self.reviewed)?;

        let reviewed = self.reviewed.list()?;
        let pending = self.lock_description().pending_deletes.clone();
        let manifest = Manifest::build(reviewed.iter().map(|u| u.as_str()), &pending);

        let path = self.manifest_path();
        let json = serde_json::to_vec_pretty(&manifest).map_err(|e| CollectionError::Json {
            path: path.clone(),
            source: e,
        })?;
        fs::write(&path, json).map_err(|e| CollectionError::io(&path, e))?;
        Ok(manifest)
    }

    /// Return an unpublished collection to `NOT_STARTED` so it can be edited
    /// and approved again.
    pub fn unlock(&self, actor: &str) -> Result<bool, CollectionError> {
        if !self.permissions.can_edit(actor) || self.lock_description().publish_complete {
            return Ok(false);
        }
        self.update(|d| {
            d.approval_status = ApprovalStatus::NotStarted;
            d.add_event(Event::now(EventType::Unlocked, actor));
        })?;
        info!(collection = %self.id, actor, "Collection unlocked");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PermissionsConfig};
    use crate::permissions::ConfigPermissions;
    use publish_harness_core::models::CollectionType;
    use tempfile::TempDir;

    fn registry(tmp: &TempDir) -> Collections {
        let config = Config::minimal(tmp.path());
        let permissions = Arc::new(ConfigPermissions::new(&PermissionsConfig {
            editors: vec!["alice".to_string(), "bob".to_string()],
            teams: Default::default(),
        }));
        Collections::load(&config, permissions).unwrap()
    }

    fn manual(registry: &Collections, name: &str) -> Arc<Collection> {
        registry
            .create_collection("alice", name, CollectionType::Manual, None, Vec::new())
            .unwrap()
    }

    #[test]
    fn create_rejects_non_editor_and_duplicates() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let c = manual(&reg, "one");

        assert!(!c.create("mallory", "/a/data.json", &reg).unwrap());
        assert!(c.create("alice", "/a/data.json", &reg).unwrap());
        assert!(!c.create("alice", "/a/data.json", &reg).unwrap());
        assert!(c.is_in_progress("/a/data.json"));
    }

    #[test]
    fn create_rejects_content_held_by_another_collection() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let one = manual(&reg, "one");
        let two = manual(&reg, "two");

        assert!(one.create("alice", "/a/data.json", &reg).unwrap());
        assert!(!two.create("alice", "/a/data.json", &reg).unwrap());
        assert!(!two.edit("alice", "/a/data.json", &reg).unwrap());
    }

    #[test]
    fn create_rejects_published_content() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let c = manual(&reg, "one");
        c.published().create_empty("/a/data.json").unwrap();

        assert!(!c.create("alice", "/a/data.json", &reg).unwrap());
    }

    #[test]
    fn stages_are_mutually_exclusive() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let c = manual(&reg, "one");
        let u = "/a/data.json";

        c.create("alice", u, &reg).unwrap();
        let count = |c: &Collection| {
            [c.in_progress(), c.complete(), c.reviewed()]
                .iter()
                .filter(|s| s.exists(u))
                .count()
        };
        assert_eq!(count(&c), 1);

        assert!(c.complete_content("alice", u).unwrap());
        assert_eq!(count(&c), 1);
        assert!(c.is_complete(u));

        assert!(c.review("bob", u).unwrap());
        assert_eq!(count(&c), 1);
        assert!(c.is_reviewed(u));

        assert!(c.edit("alice", u, &reg).unwrap());
        assert_eq!(count(&c), 1);
        assert!(c.is_in_progress(u));
    }

    #[test]
    fn self_review_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let c = manual(&reg, "one");
        let u = "/a/data.json";

        c.create("alice", u, &reg).unwrap();
        c.complete_content("alice", u).unwrap();

        assert!(!c.review("alice", u).unwrap());
        assert!(!c.review("ALICE", u).unwrap());
        assert!(c.is_complete(u));
        assert!(c.review("bob", u).unwrap());
    }

    #[test]
    fn review_without_completion_record_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let c = manual(&reg, "one");
        c.complete().create_empty("/a/data.json").unwrap();

        assert!(matches!(
            c.review("bob", "/a/data.json"),
            Err(CollectionError::MissingCompletion { .. })
        ));
    }

    #[test]
    fn edit_copies_published_and_moves_staged() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let c = manual(&reg, "one");

        c.published().create_empty("/pub/data.json").unwrap();
        assert!(c.edit("alice", "/pub/data.json", &reg).unwrap());
        assert!(c.is_in_progress("/pub/data.json"));
        assert!(c.published().exists("/pub/data.json"));

        c.create("alice", "/new/data.json", &reg).unwrap();
        c.complete_content("alice", "/new/data.json").unwrap();
        assert!(c.edit("bob", "/new/data.json", &reg).unwrap());
        assert!(c.is_in_progress("/new/data.json"));
        assert!(!c.complete().exists("/new/data.json"));

        assert!(!c.edit("alice", "/missing/data.json", &reg).unwrap());
    }

    #[test]
    fn create_then_delete_leaves_no_directories() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let c = manual(&reg, "one");

        c.create("alice", "/deep/nested/path/data.json", &reg).unwrap();
        assert!(c.delete_content("alice", "/deep/nested/path/data.json").unwrap());
        assert!(!c.delete_content("alice", "/deep/nested/path/data.json").unwrap());

        assert!(c.in_progress().root().exists());
        assert_eq!(fs::read_dir(c.in_progress().root()).unwrap().count(), 0);
        assert_eq!(c.uri_count().unwrap(), 0);
    }

    #[test]
    fn events_are_persisted() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let c = manual(&reg, "one");
        c.create("alice", "/a/data.json", &reg).unwrap();

        let on_disk: CollectionDescription =
            serde_json::from_str(&fs::read_to_string(c.description_path()).unwrap()).unwrap();
        let events = on_disk.events_for("/a/data.json");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Created);
        assert_eq!(events[0].email, "alice");
    }

    #[test]
    fn find_respects_view_permission() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let c = manual(&reg, "one");
        c.create("alice", "/draft/data.json", &reg).unwrap();
        c.published().create_empty("/live/data.json").unwrap();

        assert!(c.find("alice", "/draft/data.json").is_some());
        assert!(c.find("stranger", "/draft/data.json").is_none());
        assert!(c.find("stranger", "/live/data.json").is_some());
        assert!(c.find("alice", "/nowhere.json").is_none());
    }

    #[test]
    fn approve_requires_everything_reviewed() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let c = manual(&reg, "one");
        c.create("alice", "/a/data.json", &reg).unwrap();

        assert!(!c.approve("alice").unwrap());
        c.complete_content("alice", "/a/data.json").unwrap();
        assert!(!c.approve("alice").unwrap());
        c.review("bob", "/a/data.json").unwrap();

        assert!(c.approve("alice").unwrap());
        let d = c.description();
        assert_eq!(d.approval_status, ApprovalStatus::Complete);
        assert_eq!(d.events.last().unwrap().event_type, EventType::Approved);
        assert!(c.manifest_path().is_file());

        assert!(c.unlock("bob").unwrap());
        assert_eq!(c.description().approval_status, ApprovalStatus::NotStarted);
    }

    #[test]
    fn approved_collection_is_frozen_until_unlocked() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let c = manual(&reg, "one");
        let u = "/a/data.json";
        c.published().create_empty("/live/data.json").unwrap();
        c.create("alice", u, &reg).unwrap();
        c.complete_content("alice", u).unwrap();
        c.review("bob", u).unwrap();
        assert!(c.approve("alice").unwrap());
        assert!(c.is_approved());

        assert!(!c.create("alice", "/draft/data.json", &reg).unwrap());
        assert!(!c.edit("alice", u, &reg).unwrap());
        assert!(!c.delete_content("alice", u).unwrap());
        assert!(!c.mark_for_deletion("alice", "/live").unwrap());
        assert!(c.version("alice", "/live/data.json").unwrap().is_none());
        assert!(c.is_reviewed(u));
        assert!(!c.in_progress().exists("/draft/data.json"));

        assert!(c.unlock("bob").unwrap());
        assert!(!c.is_approved());
        assert!(c.create("alice", "/draft/data.json", &reg).unwrap());
        assert!(c.edit("alice", u, &reg).unwrap());
        assert!(c.complete_content("alice", u).unwrap());
    }

    #[test]
    fn approve_writes_versions_and_deletes_into_manifest() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let c = manual(&reg, "one");
        c.published().create_empty("/a/data.json").unwrap();
        c.published().create_empty("/old/data.json").unwrap();

        assert_eq!(
            c.version("alice", "/a/data.json").unwrap().as_deref(),
            Some("/a/previous/v1/data.json")
        );
        assert!(c.mark_for_deletion("alice", "/old").unwrap());
        assert!(c.mark_for_deletion("alice", "/old").unwrap());
        assert!(!c.mark_for_deletion("alice", "/never-published").unwrap());
        assert_eq!(c.description().pending_deletes.len(), 1);

        assert!(c.approve("alice").unwrap());
        let manifest = c.manifest().unwrap();
        assert_eq!(manifest.files_to_copy.len(), 1);
        assert_eq!(manifest.files_to_copy[0].source, "/a/data.json");
        assert_eq!(manifest.files_to_copy[0].target, "/a/previous/v1/data.json");
        assert_eq!(manifest.uris_to_delete, vec!["/old"]);
    }

    #[test]
    fn version_numbers_increase() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let c = manual(&reg, "one");
        c.published().create_empty("/a/data.json").unwrap();
        c.published().create_empty("/a/previous/v3/data.json").unwrap();

        assert_eq!(
            c.version("alice", "/a/data.json").unwrap().as_deref(),
            Some("/a/previous/v4/data.json")
        );
        assert_eq!(
            c.version("alice", "/a/data.json").unwrap().as_deref(),
            Some("/a/previous/v5/data.json")
        );
        assert!(c.version("mallory", "/a/data.json").unwrap().is_none());
    }

    #[tokio::test]
    async fn is_publishing_tracks_the_publish_lock() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let c = manual(&reg, "one");

        assert!(!c.is_publishing());
        let guard = c.lock_for_publish().await;
        assert!(c.is_publishing());
        drop(guard);
        assert!(!c.is_publishing());
    }
}
