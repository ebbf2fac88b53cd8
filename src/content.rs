//! Filesystem-backed content store.
//!
//! A [`ContentStore`] maps content URIs (`/a/b/data.json`) onto files under a
//! single root directory. It is used for the three per-collection staging
//! areas, the published master store, and the published-collection archive.
//!
//! Mutations go through [`ContentStore::move_to`], [`ContentStore::copy_to`]
//! and [`ContentStore::delete`], which create missing parent directories on
//! the way in and prune directories left empty on the way out, so a store
//! never accumulates empty directory skeletons.
//!
//! [`LookupChain`] resolves a URI against an ordered list of stores and
//! returns the first hit.

use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::ContentError;
use publish_harness_core::uri;

#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
    excludes: Option<GlobSet>,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            excludes: None,
        }
    }

    /// Store that additionally hides files matching `patterns` from [`list`](Self::list).
    pub fn with_excludes(root: impl Into<PathBuf>, patterns: &[String]) -> anyhow::Result<Self> {
        let excludes = if patterns.is_empty() {
            None
        } else {
            Some(build_globset(patterns)?)
        };
        Ok(Self {
            root: root.into(),
            excludes,
        })
    }

    /// Store over a different root sharing this store's exclude patterns.
    pub fn with_root(&self, root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            excludes: self.excludes.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a URI maps to. Pure computation; the file need not exist.
    pub fn resolve(&self, content_uri: &str) -> PathBuf {
        self.root.join(uri::relative(&uri::normalize(content_uri)))
    }

    fn checked(&self, content_uri: &str) -> Result<PathBuf, ContentError> {
        if !uri::is_safe(content_uri) {
            return Err(ContentError::UnsafeUri {
                uri: content_uri.to_string(),
            });
        }
        Ok(self.resolve(content_uri))
    }

    /// Quiet existence probe: unsafe URIs and I/O failures read as absent.
    pub fn exists(&self, content_uri: &str) -> bool {
        self.get(content_uri).is_some()
    }

    /// Path of an existing file, or `None`.
    pub fn get(&self, content_uri: &str) -> Option<PathBuf> {
        let path = self.checked(content_uri).ok()?;
        path.is_file().then_some(path)
    }

    /// `true` when a file or directory exists at the URI.
    pub fn exists_any(&self, content_uri: &str) -> bool {
        self.checked(content_uri)
            .map(|p| p.exists())
            .unwrap_or(false)
    }

    /// Every file URI in the store, sorted, hidden files excluded.
    pub fn list(&self) -> Result<Vec<String>, ContentError> {
        self.list_under("/")
    }

    /// Every file URI under a directory URI, sorted, hidden files excluded.
    pub fn list_under(&self, dir_uri: &str) -> Result<Vec<String>, ContentError> {
        let start = self.resolve(dir_uri);
        if !start.is_dir() {
            return Ok(Vec::new());
        }

        let mut uris = Vec::new();
        for entry in WalkDir::new(&start).follow_links(false) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path());
            let rel_str = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/");

            if rel_str.split('/').any(|s| s.starts_with('.')) {
                continue;
            }
            if let Some(excludes) = &self.excludes {
                if excludes.is_match(&rel_str) {
                    continue;
                }
            }

            uris.push(format!("/{}", rel_str));
        }

        uris.sort();
        Ok(uris)
    }

    /// Number of listed files.
    pub fn count(&self) -> Result<usize, ContentError> {
        Ok(self.list()?.len())
    }

    /// Create an empty file at the URI (parents created as needed).
    pub fn create_empty(&self, content_uri: &str) -> Result<PathBuf, ContentError> {
        let path = self.checked(content_uri)?;
        ensure_parent(&path)?;
        fs::write(&path, b"").map_err(|e| ContentError::io(&path, e))?;
        Ok(path)
    }

    /// Delete the file at the URI and prune emptied ancestors.
    ///
    /// Returns `false` when there was no file to delete.
    pub fn delete(&self, content_uri: &str) -> Result<bool, ContentError> {
        let path = self.checked(content_uri)?;
        if !path.is_file() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|e| ContentError::io(&path, e))?;
        self.prune_empty_ancestors(&path)?;
        Ok(true)
    }

    /// Delete a file or a whole directory subtree and prune emptied ancestors.
    pub fn delete_dir(&self, content_uri: &str) -> Result<bool, ContentError> {
        let path = self.checked(content_uri)?;
        if path.is_dir() {
            fs::remove_dir_all(&path).map_err(|e| ContentError::io(&path, e))?;
        } else if path.is_file() {
            fs::remove_file(&path).map_err(|e| ContentError::io(&path, e))?;
        } else {
            return Ok(false);
        }
        self.prune_empty_ancestors(&path)?;
        Ok(true)
    }

    /// Move the file at `content_uri` into `dest` under the same URI.
    pub fn move_to(&self, content_uri: &str, dest: &ContentStore) -> Result<(), ContentError> {
        let src = self.checked(content_uri)?;
        let dst = dest.checked(content_uri)?;
        move_file(&src, &dst)?;
        self.prune_empty_ancestors(&src)
    }

    /// Copy the file at `content_uri` into `dest` under the same URI.
    pub fn copy_to(&self, content_uri: &str, dest: &ContentStore) -> Result<(), ContentError> {
        let src = self.checked(content_uri)?;
        let dst = dest.checked(content_uri)?;
        copy_file(&src, &dst)
    }

    fn prune_empty_ancestors(&self, removed: &Path) -> Result<(), ContentError> {
        let mut dir = removed.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            let is_empty = match fs::read_dir(current) {
                Ok(mut entries) => entries.next().is_none(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    dir = current.parent();
                    continue;
                }
                Err(e) => return Err(ContentError::io(current, e)),
            };
            if !is_empty {
                break;
            }
            fs::remove_dir(current).map_err(|e| ContentError::io(current, e))?;
            dir = current.parent();
        }
        Ok(())
    }
}

/// Ordered list of stores consulted front to back.
pub struct LookupChain<'a> {
    stores: Vec<&'a ContentStore>,
}

impl<'a> LookupChain<'a> {
    pub fn new(stores: Vec<&'a ContentStore>) -> Self {
        Self { stores }
    }

    /// First store's path for the URI, or `None` when no store holds it.
    pub fn find(&self, content_uri: &str) -> Option<PathBuf> {
        self.stores.iter().find_map(|s| s.get(content_uri))
    }
}

fn ensure_parent(path: &Path) -> Result<(), ContentError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ContentError::io(parent, e))?;
    }
    Ok(())
}

/// Move a file, creating the destination's parents.
///
/// When the destination already exists, or a rename is impossible (e.g.
/// across filesystems), falls back to copy-then-delete-source.
pub fn move_file(src: &Path, dst: &Path) -> Result<(), ContentError> {
    ensure_parent(dst)?;
    if !dst.exists() && fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    fs::copy(src, dst).map_err(|e| ContentError::io(dst, e))?;
    fs::remove_file(src).map_err(|e| ContentError::io(src, e))?;
    Ok(())
}

/// Copy a file, creating the destination's parents.
pub fn copy_file(src: &Path, dst: &Path) -> Result<(), ContentError> {
    ensure_parent(dst)?;
    fs::copy(src, dst).map_err(|e| ContentError::io(dst, e))?;
    Ok(())
}

/// Recursively copy every file under `src` into `dst`. Returns the file count.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<usize, ContentError> {
    if !src.is_dir() {
        return Ok(0);
    }
    let mut copied = 0;
    for entry in WalkDir::new(src) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        copy_file(entry.path(), &dst.join(relative))?;
        copied += 1;
    }
    Ok(copied)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ContentStore) {
        let tmp = TempDir::new().unwrap();
        let store = ContentStore::new(tmp.path().join("store"));
        fs::create_dir_all(store.root()).unwrap();
        (tmp, store)
    }

    #[test]
    fn resolve_strips_leading_slash() {
        let (_tmp, store) = store();
        assert_eq!(
            store.resolve("/a/b/data.json"),
            store.root().join("a/b/data.json")
        );
        assert_eq!(store.resolve("a/b/data.json"), store.resolve("/a/b/data.json"));
    }

    #[test]
    fn get_missing_is_none() {
        let (_tmp, store) = store();
        assert!(store.get("/nope.json").is_none());
        assert!(!store.exists("/../escape.json"));
    }

    #[test]
    fn list_excludes_hidden_and_sorts() {
        let (_tmp, store) = store();
        store.create_empty("/b/data.json").unwrap();
        store.create_empty("/a/data.json").unwrap();
        store.create_empty("/a/.DS_Store").unwrap();
        store.create_empty("/.git/config").unwrap();

        assert_eq!(store.list().unwrap(), vec!["/a/data.json", "/b/data.json"]);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn list_honours_configured_excludes() {
        let tmp = TempDir::new().unwrap();
        let store = ContentStore::with_excludes(tmp.path(), &["**/*.tmp".to_string()]).unwrap();
        store.create_empty("/a/data.json").unwrap();
        store.create_empty("/a/data.json.tmp").unwrap();
        assert_eq!(store.list().unwrap(), vec!["/a/data.json"]);
    }

    #[test]
    fn delete_prunes_empty_ancestors_but_not_root() {
        let (_tmp, store) = store();
        store.create_empty("/a/b/c/data.json").unwrap();
        store.create_empty("/a/keep.json").unwrap();

        assert!(store.delete("/a/b/c/data.json").unwrap());
        assert!(!store.root().join("a/b").exists());
        assert!(store.root().join("a/keep.json").exists());

        assert!(store.delete("/a/keep.json").unwrap());
        assert!(!store.root().join("a").exists());
        assert!(store.root().exists());
    }

    #[test]
    fn delete_missing_returns_false() {
        let (_tmp, store) = store();
        assert!(!store.delete("/missing.json").unwrap());
    }

    #[test]
    fn delete_rejects_unsafe_uri() {
        let (_tmp, store) = store();
        assert!(matches!(
            store.delete("/../../etc/passwd"),
            Err(ContentError::UnsafeUri { .. })
        ));
    }

    #[test]
    fn move_to_creates_parents_and_prunes_source() {
        let tmp = TempDir::new().unwrap();
        let a = ContentStore::new(tmp.path().join("a"));
        let b = ContentStore::new(tmp.path().join("b"));
        fs::create_dir_all(a.root()).unwrap();
        a.create_empty("/x/y/data.json").unwrap();

        a.move_to("/x/y/data.json", &b).unwrap();
        assert!(b.exists("/x/y/data.json"));
        assert!(!a.exists("/x/y/data.json"));
        assert!(!a.root().join("x").exists());
    }

    #[test]
    fn move_file_overwrites_existing_destination() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src.json");
        let dst = tmp.path().join("out/dst.json");
        fs::write(&src, "new").unwrap();
        fs::create_dir_all(dst.parent().unwrap()).unwrap();
        fs::write(&dst, "old").unwrap();

        move_file(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(&dst).unwrap(), "new");
        assert!(!src.exists());
    }

    #[test]
    fn delete_dir_removes_subtree() {
        let (_tmp, store) = store();
        store.create_empty("/a/b/one.json").unwrap();
        store.create_empty("/a/b/c/two.json").unwrap();
        assert!(store.delete_dir("/a/b").unwrap());
        assert!(store.list().unwrap().is_empty());
        assert!(!store.delete_dir("/a/b").unwrap());
    }

    #[test]
    fn lookup_chain_prefers_earlier_stores() {
        let tmp = TempDir::new().unwrap();
        let first = ContentStore::new(tmp.path().join("first"));
        let second = ContentStore::new(tmp.path().join("second"));
        second.create_empty("/a.json").unwrap();
        first.create_empty("/b.json").unwrap();
        second.create_empty("/b.json").unwrap();

        let chain = LookupChain::new(vec![&first, &second]);
        assert_eq!(chain.find("/a.json"), Some(second.resolve("/a.json")));
        assert_eq!(chain.find("/b.json"), Some(first.resolve("/b.json")));
        assert_eq!(chain.find("/c.json"), None);
    }

    #[test]
    fn copy_tree_copies_nested_files() {
        let tmp = TempDir::new().unwrap();
        let src = ContentStore::new(tmp.path().join("src"));
        src.create_empty("/a/one.json").unwrap();
        src.create_empty("/a/b/two.json").unwrap();
        let dst = tmp.path().join("dst");

        assert_eq!(copy_tree(src.root(), &dst).unwrap(), 2);
        assert!(dst.join("a/b/two.json").exists());
    }
}
