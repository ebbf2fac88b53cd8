//! Post-publish finalizer.
//!
//! Runs once after every target has committed, outside the publish critical
//! section. It folds the collection into the master store and retires it:
//!
//! 1. archive and delete the subtrees the collection marked for deletion
//! 2. apply the manifest's version copies (and any deletes still pending)
//! 3. merge reviewed files into master, unpacking bundles
//! 4. queue reindexing of new documents and index removal of deleted ones
//! 5. write the published-collection record
//! 6. remove the working collection and evict it from the registry
//!
//! Steps are independent. A failing step is logged and recorded in the
//! [`FinalizeReport`]; later steps still run and nothing is un-published.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::bundle;
use crate::collection::Collection;
use crate::collections::Collections;
use crate::config::StoreConfig;
use crate::content::{copy_file, copy_tree, ContentStore};
use crate::history;
use crate::traits::Indexer;
use publish_harness_core::manifest::Manifest;
use publish_harness_core::uri;

/// A finalization step, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeStep {
    ApplyDeletes,
    ApplyManifest,
    MergeFiles,
    Reindex,
    ArchiveCollection,
    RemoveWorkingCollection,
}

impl FinalizeStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizeStep::ApplyDeletes => "apply-deletes",
            FinalizeStep::ApplyManifest => "apply-manifest",
            FinalizeStep::MergeFiles => "merge-files",
            FinalizeStep::Reindex => "reindex",
            FinalizeStep::ArchiveCollection => "archive-collection",
            FinalizeStep::RemoveWorkingCollection => "remove-working-collection",
        }
    }
}

#[derive(Debug, Default)]
pub struct FinalizeReport {
    pub failed_steps: Vec<FinalizeStep>,
    /// Files written into the master store (bundle entries included).
    pub files_merged: usize,
    /// Subtrees removed from the master store.
    pub deleted: Vec<String>,
    /// Reindex and index-removal requests queued.
    pub index_requests: usize,
    /// `published-collections/<timestamp>-<id>` directory, when written.
    pub record: Option<PathBuf>,
}

impl FinalizeReport {
    pub fn is_clean(&self) -> bool {
        self.failed_steps.is_empty()
    }

    fn outcome<T>(&mut self, collection: &str, step: FinalizeStep, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => {
                debug!(collection, step = step.as_str(), "Finalize step done");
                Some(value)
            }
            Err(e) => {
                warn!(collection, step = step.as_str(), error = %format!("{:#}", e), "Finalize step failed");
                self.failed_steps.push(step);
                None
            }
        }
    }
}

pub struct Finalizer {
    store: StoreConfig,
    registry: Arc<Collections>,
    indexer: Arc<dyn Indexer>,
}

impl Finalizer {
    pub fn new(store: StoreConfig, registry: Arc<Collections>, indexer: Arc<dyn Indexer>) -> Self {
        Self {
            store,
            registry,
            indexer,
        }
    }

    /// Finalize a committed collection. `published_at` names the archive and
    /// record directories.
    pub async fn finalize(&self, collection: &Arc<Collection>, published_at: DateTime<Utc>) -> FinalizeReport {
        let id = collection.id().to_string();
        let stamp = history::record_name(published_at, &id);
        let master = self.registry.published().clone();
        let mut report = FinalizeReport::default();

        let manifest = collection
            .manifest()
            .with_context(|| format!("Failed to read manifest of {}", id));
        let manifest = match manifest {
            Ok(m) => m,
            Err(e) => {
                warn!(collection = %id, error = %format!("{:#}", e), "Continuing without manifest");
                report.failed_steps.push(FinalizeStep::ApplyManifest);
                Manifest::default()
            }
        };

        // 1. Archive and delete declared subtrees
        let pending: Vec<String> = collection
            .description()
            .pending_deletes
            .into_iter()
            .map(|p| uri::normalize(&p.uri))
            .collect();
        let archive_dir = self.store.archive_dir().join(&stamp);
        let deleted = report
            .outcome(&id, FinalizeStep::ApplyDeletes, apply_deletes(&master, &pending, &archive_dir))
            .unwrap_or_default();

        // 2. Version copies, then any delete not yet applied
        if report
            .outcome(&id, FinalizeStep::ApplyManifest, apply_manifest(&master, &manifest))
            .is_none()
        {
            debug!(collection = %id, "Manifest application incomplete");
        }

        // 3. Merge reviewed content
        report.files_merged = report
            .outcome(&id, FinalizeStep::MergeFiles, merge_reviewed(collection.reviewed(), &master))
            .unwrap_or(0);

        // 4. Index maintenance, fire-and-forget
        let reindex = collection
            .reviewed()
            .list()
            .map(|uris| uris.into_iter().filter(|u| uri::is_indexable(u)).collect::<Vec<_>>())
            .context("Failed to list reviewed content");
        if let Some(reindex) = report.outcome(&id, FinalizeStep::Reindex, reindex) {
            report.index_requests = reindex.len() + deleted.len();
            self.queue_index_updates(&id, reindex, deleted.clone());
        }
        report.deleted = deleted.into_iter().map(|(_, u)| u).collect();

        // 5. Published-collection record
        let record_dir = self.store.published_collections_dir().join(&stamp);
        report.record = report.outcome(
            &id,
            FinalizeStep::ArchiveCollection,
            write_record(collection, &manifest, &record_dir).map(|_| record_dir.clone()),
        );

        // 6. Retire the working collection
        let removed = collection
            .remove_from_disk()
            .with_context(|| format!("Failed to remove working collection {}", id));
        report.outcome(&id, FinalizeStep::RemoveWorkingCollection, removed);
        self.registry.evict(&id);

        info!(
            collection = %id,
            merged = report.files_merged,
            deleted = report.deleted.len(),
            failed_steps = report.failed_steps.len(),
            "Finalized publish"
        );
        report
    }

    fn queue_index_updates(&self, collection: &str, reindex: Vec<String>, removed: Vec<(String, String)>) {
        if reindex.is_empty() && removed.is_empty() {
            return;
        }
        let indexer = self.indexer.clone();
        let collection = collection.to_string();
        tokio::spawn(async move {
            for u in reindex {
                if let Err(e) = indexer.reindex(&u).await {
                    warn!(collection = %collection, uri = %u, error = %e, "Reindex failed");
                }
            }
            for (content_type, u) in removed {
                if let Err(e) = indexer.remove_index(&content_type, &u).await {
                    warn!(collection = %collection, uri = %u, error = %e, "Index removal failed");
                }
            }
        });
    }
}

/// Archive then delete each declared subtree. Returns `(type, uri)` for every
/// indexable document removed.
fn apply_deletes(
    master: &ContentStore,
    pending: &[String],
    archive_dir: &Path,
) -> Result<Vec<(String, String)>> {
    let mut removed = Vec::new();
    for target in pending {
        let path = master.resolve(target);
        if !path.exists() {
            debug!(uri = %target, "Declared delete already absent");
            continue;
        }

        let archived = archive_dir.join(uri::relative(target));
        if path.is_dir() {
            copy_tree(&path, &archived)?;
        } else {
            copy_file(&path, &archived)?;
        }
        removed.extend(indexed_documents(&archived, target));

        master.delete_dir(target)?;
        info!(uri = %target, archive = %archived.display(), "Deleted published content");
    }
    Ok(removed)
}

/// Indexable documents in an archived subtree, with the content type each
/// one declares.
fn indexed_documents(archived: &Path, target_uri: &str) -> Vec<(String, String)> {
    if archived.is_file() {
        return if uri::is_indexable(target_uri) {
            vec![(content_type(archived), uri::normalize(target_uri))]
        } else {
            Vec::new()
        };
    }

    WalkDir::new(archived)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let relative = e.path().strip_prefix(archived).ok()?;
            let rel = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/");
            let doc_uri = format!("{}/{}", uri::normalize(target_uri).trim_end_matches('/'), rel);
            uri::is_indexable(&doc_uri).then(|| (content_type(e.path()), doc_uri))
        })
        .collect()
}

/// The `type` field of a JSON document, or `unknown`.
fn content_type(path: &Path) -> String {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t.to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn apply_manifest(master: &ContentStore, manifest: &Manifest) -> Result<()> {
    let mut failures = 0;
    for copy in &manifest.files_to_copy {
        let Some(src) = master.get(&copy.source) else {
            warn!(source = %copy.source, target = %copy.target, "Version source not published");
            continue;
        };
        if let Err(e) = copy_file(&src, &master.resolve(&copy.target)) {
            warn!(source = %copy.source, target = %copy.target, error = %e, "Version copy failed");
            failures += 1;
        }
    }
    for target in &manifest.uris_to_delete {
        if let Err(e) = master.delete_dir(target) {
            warn!(uri = %target, error = %e, "Manifest delete failed");
            failures += 1;
        }
    }
    if failures > 0 {
        anyhow::bail!("{} manifest instruction(s) failed", failures);
    }
    Ok(())
}

/// Copy every unversioned reviewed file into master, unpacking bundles into
/// their un-suffixed directory.
fn merge_reviewed(reviewed: &ContentStore, master: &ContentStore) -> Result<usize> {
    let mut merged = 0;
    for content_uri in reviewed.list()? {
        if uri::is_versioned(&content_uri) {
            continue;
        }
        if let Some(target) = uri::bundle_target(&content_uri) {
            merged += bundle::unpack_bundle(&reviewed.resolve(&content_uri), &master.resolve(&target))?;
        } else {
            reviewed.copy_to(&content_uri, master)?;
            merged += 1;
        }
    }
    Ok(merged)
}

/// Write `published-collections/<stamp>/` (manifest + reviewed tree) and the
/// sibling `<stamp>.json` description.
fn write_record(collection: &Collection, manifest: &Manifest, record_dir: &Path) -> Result<()> {
    fs::create_dir_all(record_dir)
        .with_context(|| format!("Failed to create {}", record_dir.display()))?;
    copy_tree(collection.reviewed().root(), record_dir)?;

    let manifest_path = record_dir.join("manifest.json");
    fs::write(&manifest_path, serde_json::to_vec_pretty(manifest)?)
        .with_context(|| format!("Failed to write {}", manifest_path.display()))?;

    let description_path = record_dir.with_extension("json");
    let description = serde_json::to_vec_pretty(&collection.description())?;
    fs::write(&description_path, description)
        .with_context(|| format!("Failed to write {}", description_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn deletes_are_archived_with_their_type() {
        let tmp = TempDir::new().unwrap();
        let master = ContentStore::new(tmp.path().join("master"));
        fs::create_dir_all(master.resolve("/old/sub")).unwrap();
        fs::write(master.resolve("/old/data.json"), r#"{"type":"bulletin"}"#).unwrap();
        fs::write(master.resolve("/old/sub/data.json"), "not json").unwrap();
        master.create_empty("/keep/data.json").unwrap();

        let archive = tmp.path().join("archive/stamp");
        let mut removed =
            apply_deletes(&master, &["/old".to_string(), "/gone".to_string()], &archive).unwrap();
        removed.sort();

        assert_eq!(
            removed,
            vec![
                ("bulletin".to_string(), "/old/data.json".to_string()),
                ("unknown".to_string(), "/old/sub/data.json".to_string()),
            ]
        );
        assert!(!master.exists_any("/old"));
        assert!(master.exists("/keep/data.json"));
        assert!(archive.join("old/data.json").is_file());
    }

    #[test]
    fn manifest_copies_preserve_current_version() {
        let tmp = TempDir::new().unwrap();
        let master = ContentStore::new(tmp.path());
        fs::create_dir_all(master.resolve("/a")).unwrap();
        fs::write(master.resolve("/a/data.json"), "v-old").unwrap();

        let manifest = Manifest::build(["/a/previous/v1/data.json"], &[]);
        apply_manifest(&master, &manifest).unwrap();
        assert_eq!(
            fs::read_to_string(master.resolve("/a/previous/v1/data.json")).unwrap(),
            "v-old"
        );
    }

    #[test]
    fn merge_skips_versions_and_unpacks_bundles() {
        let tmp = TempDir::new().unwrap();
        let reviewed = ContentStore::new(tmp.path().join("reviewed"));
        let master = ContentStore::new(tmp.path().join("master"));
        reviewed.create_empty("/a/data.json").unwrap();
        reviewed.create_empty("/a/previous/v1/data.json").unwrap();
        reviewed.create_empty("/a/timeseries/x.csv").unwrap();
        bundle::bundle_timeseries(&reviewed).unwrap();

        let merged = merge_reviewed(&reviewed, &master).unwrap();
        assert_eq!(merged, 2);
        assert!(master.exists("/a/data.json"));
        assert!(master.exists("/a/timeseries/x.csv"));
        assert!(!master.exists("/a/previous/v1/data.json"));
        assert!(!master.exists("/a/timeseries-to-publish.zip"));
    }
}
