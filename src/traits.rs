//! Collaborator traits consumed by the editorial and publishing core.
//!
//! The harness does not own users, search indexes, or downstream publishing
//! systems. It reaches them through the narrow traits below, which are
//! implemented by the built-ins in [`permissions`](crate::permissions),
//! [`target_http`](crate::target_http) and [`notify`](crate::notify), or by
//! embedding applications and tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   can_edit / can_view   ┌──────────────┐
//! │  Collection  │ ──────────────────────▶ │ Permissions  │
//! └──────┬───────┘                         └──────────────┘
//!        │ approve
//!        ▼
//! ┌──────────────┐  begin/manifest/file/   ┌──────────────┐
//! │  Publisher   │ ──────commit/rollback──▶│PublishTarget │ × N
//! └──────┬───────┘                         └──────────────┘
//!        │ committed
//!        ▼
//! ┌──────────────┐   reindex/remove_index  ┌──────────────┐
//! │  Finalizer   │ ──────────────────────▶ │   Indexer    │
//! └──────────────┘                         └──────────────┘
//!        Publisher + Finalizer ──────────▶  Notifier
//! ```

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use publish_harness_core::manifest::Manifest;
use publish_harness_core::models::{CollectionDescription, CommitResult};

// ═══════════════════════════════════════════════════════════════════════
// Permissions
// ═══════════════════════════════════════════════════════════════════════

/// Access decisions for editorial operations.
///
/// Every mutating collection operation asks [`can_edit`](Permissions::can_edit);
/// [`Collection::find`](crate::collection::Collection::find) asks
/// [`can_view`](Permissions::can_view) before exposing unpublished content.
pub trait Permissions: Send + Sync {
    /// `true` if `actor` may create, edit, complete, review, and delete content.
    fn can_edit(&self, actor: &str) -> bool;

    /// `true` if `actor` may see the unpublished content of a collection.
    fn can_view(&self, actor: &str, collection: &CollectionDescription) -> bool;
}

// ═══════════════════════════════════════════════════════════════════════
// Publish Target
// ═══════════════════════════════════════════════════════════════════════

/// A downstream system that receives a collection inside a transaction.
///
/// # Lifecycle
///
/// 1. [`begin`](PublishTarget::begin) opens a transaction and returns its id.
/// 2. [`send_manifest`](PublishTarget::send_manifest) ships copy/delete instructions.
/// 3. [`publish_file`](PublishTarget::publish_file) is called once per file,
///    concurrently.
/// 4. [`commit`](PublishTarget::commit) makes the transaction visible, or
///    [`rollback`](PublishTarget::rollback) discards it.
///
/// An `Err` from any call, or a [`CommitResult`] that is not a success,
/// fails the whole publish attempt across every target.
///
/// # Example
///
/// ```rust
/// use std::path::Path;
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use publish_harness::traits::PublishTarget;
/// use publish_harness_core::manifest::Manifest;
/// use publish_harness_core::models::CommitResult;
///
/// struct NullTarget;
///
/// #[async_trait]
/// impl PublishTarget for NullTarget {
///     fn host(&self) -> &str { "null" }
///     async fn begin(&self) -> Result<String> { Ok("tx-1".to_string()) }
///     async fn send_manifest(&self, _tx: &str, _m: &Manifest) -> Result<()> { Ok(()) }
///     async fn publish_file(&self, _tx: &str, _uri: &str, _zip: bool, _path: &Path) -> Result<()> {
///         Ok(())
///     }
///     async fn commit(&self, _tx: &str) -> Result<CommitResult> { Ok(CommitResult::default()) }
///     async fn rollback(&self, _tx: &str) -> Result<()> { Ok(()) }
/// }
/// ```
#[async_trait]
pub trait PublishTarget: Send + Sync {
    /// Stable identifier of this target, used as the transaction-id map key.
    fn host(&self) -> &str;

    /// Open a transaction.
    async fn begin(&self) -> Result<String>;

    /// Send the collection's manifest into the transaction.
    async fn send_manifest(&self, transaction_id: &str, manifest: &Manifest) -> Result<()>;

    /// Stream one file into the transaction.
    ///
    /// `uri` is the destination URI. When `zipped` is set the file is a zip
    /// bundle the target must unpack into the directory named by `uri`.
    async fn publish_file(
        &self,
        transaction_id: &str,
        uri: &str,
        zipped: bool,
        path: &Path,
    ) -> Result<()>;

    /// Commit the transaction.
    async fn commit(&self, transaction_id: &str) -> Result<CommitResult>;

    /// Abandon the transaction.
    async fn rollback(&self, transaction_id: &str) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════
// Indexer
// ═══════════════════════════════════════════════════════════════════════

/// Search index maintenance triggered after publish.
///
/// Calls are dispatched on background tasks; errors are logged by the
/// caller and never affect the publish.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// (Re)index the published document at `uri`.
    async fn reindex(&self, uri: &str) -> Result<()>;

    /// Remove a deleted document of the given content type from the index.
    async fn remove_index(&self, content_type: &str, uri: &str) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════
// Notifier
// ═══════════════════════════════════════════════════════════════════════

/// Stage of the publish lifecycle a notification reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStage {
    Started,
    Failed,
    Completed,
}

impl PublishStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStage::Started => "started",
            PublishStage::Failed => "failed",
            PublishStage::Completed => "completed",
        }
    }
}

/// Publish lifecycle alarms keyed by collection id.
///
/// Best-effort: implementations should not fail loudly, and callers log and
/// swallow any error returned.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        collection_id: &str,
        stage: PublishStage,
        detail: Option<&str>,
    ) -> Result<()>;
}
