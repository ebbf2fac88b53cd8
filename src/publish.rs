//! Multi-target publish transaction coordinator.
//!
//! Publishes one approved collection to every configured [`PublishTarget`]
//! as a single all-or-nothing unit:
//!
//! ```text
//! NOT_STARTED ─▶ TRANSACTIONS_OPENED ─▶ MANIFEST_SENT ─▶ FILES_SENT ─▶ COMMITTED
//!                        │                    │               │
//!                        └────────────────────┴───────────────┴──▶ ROLLED_BACK
//! ```
//!
//! # Guarded entry
//!
//! 1. take the collection's in-process publish lock (waits)
//! 2. stop if the collection is already published
//! 3. take the `<id>.lock` advisory file lock (never waits; another process
//!    publishing the collection means this attempt quietly stops)
//! 4. stop unless the collection is approved (`COMPLETE`), nothing is left
//!    in `inprogress` or `complete`, and at least one target is configured
//!
//! # Steps
//!
//! Each step fans its calls out over a bounded task pool
//! (`publish.max_concurrency`) and waits for every call before moving on.
//! Errors are collected per call; siblings are never cancelled. Any error
//! ends the attempt: every open transaction is rolled back (best effort) and
//! the collection is left approved and unpublished for a later retry. Calls
//! are never retried within an attempt.
//!
//! On commit success the collection is marked published, the locks are
//! released, and the [`Finalizer`] folds it into the master store.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::collection::Collection;
use crate::error::{LockError, PublishError};
use crate::finalize::{FinalizeReport, Finalizer};
use crate::harness::Harness;
use crate::lock::FileLock;
use crate::traits::{Notifier, PublishStage, PublishTarget};
use publish_harness_core::models::{
    ApprovalStatus, Event, EventType, HostResult, PublishState,
};
use publish_harness_core::uri;

/// How a publish call ended.
#[derive(Debug)]
pub enum PublishOutcome {
    Published {
        hosts: usize,
        files: usize,
        report: FinalizeReport,
    },
    /// The collection was published by an earlier attempt.
    AlreadyPublished,
    /// Another process holds the collection's advisory lock.
    LockedElsewhere,
    NotApproved(ApprovalStatus),
    /// Drafts or unreviewed content are still staged; `count` items.
    Unreviewed(usize),
    /// No publish target is configured.
    NoTargets,
    /// The attempt was rolled back. `reached` is the last state completed
    /// before the failing step.
    Failed {
        reached: PublishState,
        errors: Vec<PublishError>,
    },
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published { .. })
    }
}

/// An open transaction on one target.
#[derive(Clone)]
struct OpenTransaction {
    target: Arc<dyn PublishTarget>,
    id: String,
}

/// A file to ship: local path, the URI the target sees, and the unpack flag.
#[derive(Clone)]
struct Transfer {
    path: PathBuf,
    remote_uri: String,
    zipped: bool,
}

struct StepFailure {
    reached: PublishState,
    errors: Vec<PublishError>,
    results: Vec<HostResult>,
}

fn remote_error(
    target: &dyn PublishTarget,
    transaction: &str,
    operation: &'static str,
    e: anyhow::Error,
) -> PublishError {
    PublishError::Remote {
        host: target.host().to_string(),
        transaction: transaction.to_string(),
        operation,
        message: format!("{:#}", e),
    }
}

pub struct Publisher {
    targets: Vec<Arc<dyn PublishTarget>>,
    pool: Arc<Semaphore>,
    notifier: Arc<dyn Notifier>,
    finalizer: Arc<Finalizer>,
}

impl Publisher {
    pub fn new(
        targets: Vec<Arc<dyn PublishTarget>>,
        max_concurrency: usize,
        notifier: Arc<dyn Notifier>,
        finalizer: Arc<Finalizer>,
    ) -> Self {
        Self {
            targets,
            pool: Arc::new(Semaphore::new(max_concurrency.max(1))),
            notifier,
            finalizer,
        }
    }

    /// Publish `collection` to every target.
    ///
    /// `Err` is returned only for local faults around the attempt (lock file
    /// or description I/O); remote failures are a [`PublishOutcome::Failed`].
    pub async fn publish(&self, collection: &Arc<Collection>, actor: &str) -> Result<PublishOutcome> {
        let id = collection.id().to_string();
        let guard = collection.lock_for_publish().await;

        if collection.description().publish_complete {
            debug!(collection = %id, "Already published");
            return Ok(PublishOutcome::AlreadyPublished);
        }

        let file_lock = match FileLock::try_acquire(collection.lock_path()) {
            Ok(lock) => lock,
            Err(LockError::Contended(path)) => {
                info!(collection = %id, lock = %path.display(), "Publish in progress elsewhere");
                return Ok(PublishOutcome::LockedElsewhere);
            }
            Err(e) => return Err(e.into()),
        };

        let status = collection.description().approval_status;
        if status != ApprovalStatus::Complete {
            info!(collection = %id, ?status, "Collection not approved; not publishing");
            return Ok(PublishOutcome::NotApproved(status));
        }

        let unreviewed = collection.in_progress().count()? + collection.complete().count()?;
        if unreviewed > 0 {
            warn!(collection = %id, unreviewed, "Unreviewed content staged; not publishing");
            return Ok(PublishOutcome::Unreviewed(unreviewed));
        }

        if self.targets.is_empty() {
            warn!(collection = %id, "No publish targets configured; not publishing");
            return Ok(PublishOutcome::NoTargets);
        }

        let transfers = self.transfers(collection)?;

        self.notify(&id, PublishStage::Started, None).await;
        collection.update(|d| {
            d.publish_start_date = Some(Utc::now());
            d.publish_results.clear();
        })?;
        info!(collection = %id, actor, hosts = self.targets.len(), "Publish started");

        match self.run_transaction(collection, &transfers).await {
            Ok(results) => {
                let published_at = Utc::now();
                collection.update(|d| {
                    d.publish_complete = true;
                    d.publish_end_date = Some(published_at);
                    d.publish_results = results;
                    d.add_event(Event::now(EventType::Published, actor));
                })?;
                info!(collection = %id, files = transfers.len(), "Publish committed");
                self.notify(&id, PublishStage::Completed, None).await;

                drop(file_lock);
                drop(guard);

                let report = self.finalizer.finalize(collection, published_at).await;
                Ok(PublishOutcome::Published {
                    hosts: self.targets.len(),
                    files: transfers.len(),
                    report,
                })
            }
            Err(failure) => {
                let StepFailure {
                    reached,
                    errors,
                    results,
                } = failure;
                collection.update(|d| {
                    d.publish_transaction_ids.clear();
                    d.publish_results = results;
                })?;

                let reason = errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                error!(collection = %id, ?reached, errors = errors.len(), "Publish failed: {}", reason);
                self.notify(&id, PublishStage::Failed, Some(&reason)).await;

                Ok(PublishOutcome::Failed { reached, errors })
            }
        }
    }

    /// Reviewed files that travel individually: everything except versioned
    /// copies and raw timeseries files.
    fn transfers(&self, collection: &Collection) -> Result<Vec<Transfer>> {
        let reviewed = collection.reviewed();
        Ok(reviewed
            .list()?
            .into_iter()
            .filter(|u| !uri::is_versioned(u) && !uri::is_to_be_zipped(u))
            .map(|u| {
                let path = reviewed.resolve(&u);
                match uri::bundle_target(&u) {
                    Some(target) => Transfer {
                        path,
                        remote_uri: target,
                        zipped: true,
                    },
                    None => Transfer {
                        path,
                        remote_uri: u,
                        zipped: false,
                    },
                }
            })
            .collect())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Transaction steps
    // ═══════════════════════════════════════════════════════════════════

    async fn run_transaction(
        &self,
        collection: &Arc<Collection>,
        transfers: &[Transfer],
    ) -> std::result::Result<Vec<HostResult>, StepFailure> {
        let id = collection.id();

        let open = self.open_transactions().await.map_err(|errors| StepFailure {
            reached: PublishState::NotStarted,
            errors,
            results: Vec::new(),
        })?;
        if let Err(e) = collection.update(|d| {
            d.publish_transaction_ids = open
                .iter()
                .map(|t| (t.target.host().to_string(), t.id.clone()))
                .collect();
        }) {
            warn!(collection = %id, error = %e, "Failed to record transaction ids");
        }
        debug!(collection = %id, transactions = open.len(), "Transactions opened");

        match self.run_steps(collection, &open, transfers).await {
            Ok(results) => Ok(results),
            Err(failure) => {
                self.rollback(id, &open).await;
                Err(failure)
            }
        }
    }

    /// Manifest, files, commit. Stops at the first step with any error.
    async fn run_steps(
        &self,
        collection: &Collection,
        open: &[OpenTransaction],
        transfers: &[Transfer],
    ) -> std::result::Result<Vec<HostResult>, StepFailure> {
        let id = collection.id();
        let failed = |reached, errors| StepFailure {
            reached,
            errors,
            results: Vec::new(),
        };

        self.send_manifest(collection, open)
            .await
            .map_err(|errors| failed(PublishState::TransactionsOpened, errors))?;
        debug!(collection = %id, "Manifest sent");

        self.send_files(open, transfers)
            .await
            .map_err(|errors| failed(PublishState::ManifestSent, errors))?;
        debug!(collection = %id, files = transfers.len(), "Files sent");

        let (results, errors) = self.commit(open).await;
        if !errors.is_empty() {
            return Err(StepFailure {
                reached: PublishState::FilesSent,
                errors,
                results,
            });
        }
        Ok(results)
    }

    /// Begin on every target. Partial successes are rolled back and their
    /// ids discarded when any target fails.
    async fn open_transactions(&self) -> std::result::Result<Vec<OpenTransaction>, Vec<PublishError>> {
        let jobs: Vec<_> = self
            .targets
            .iter()
            .map(|target| {
                let target = target.clone();
                async move {
                    match target.begin().await {
                        Ok(tx) => Ok(OpenTransaction { target, id: tx }),
                        Err(e) => Err(PublishError::Begin {
                            host: target.host().to_string(),
                            message: format!("{:#}", e),
                        }),
                    }
                }
            })
            .collect();

        let (open, errors) = partition(self.fan_out(jobs).await);
        if errors.is_empty() {
            return Ok(open);
        }
        if !open.is_empty() {
            self.rollback("-", &open).await;
        }
        Err(errors)
    }

    async fn send_manifest(
        &self,
        collection: &Collection,
        open: &[OpenTransaction],
    ) -> std::result::Result<(), Vec<PublishError>> {
        let manifest = match collection.manifest() {
            Ok(m) => Arc::new(m),
            Err(e) => return Err(vec![PublishError::Task(format!("manifest unavailable: {}", e))]),
        };

        let jobs: Vec<_> = open
            .iter()
            .cloned()
            .map(|tx| {
                let manifest = manifest.clone();
                async move {
                    tx.target
                        .send_manifest(&tx.id, &manifest)
                        .await
                        .map_err(|e| remote_error(tx.target.as_ref(), &tx.id, "manifest", e))
                }
            })
            .collect();
        check(self.fan_out(jobs).await)
    }

    async fn send_files(
        &self,
        open: &[OpenTransaction],
        transfers: &[Transfer],
    ) -> std::result::Result<(), Vec<PublishError>> {
        let jobs: Vec<_> = transfers
            .iter()
            .flat_map(|file| open.iter().map(move |tx| (tx.clone(), file.clone())))
            .map(|(tx, file)| async move {
                debug!(host = %tx.target.host(), transaction = %tx.id, uri = %file.remote_uri, "Sending file");
                tx.target
                    .publish_file(&tx.id, &file.remote_uri, file.zipped, &file.path)
                    .await
                    .map_err(|e| {
                        remote_error(
                            tx.target.as_ref(),
                            &tx.id,
                            "publish",
                            e.context(file.remote_uri.clone()),
                        )
                    })
            })
            .collect();
        check(self.fan_out(jobs).await)
    }

    /// Commit everywhere. Returns every host result obtained and the errors:
    /// a failed call, a transaction-level error flag, or any per-file error.
    async fn commit(&self, open: &[OpenTransaction]) -> (Vec<HostResult>, Vec<PublishError>) {
        let jobs: Vec<_> = open
            .iter()
            .cloned()
            .map(|tx| async move {
                match tx.target.commit(&tx.id).await {
                    Ok(result) => Ok(HostResult {
                        host: tx.target.host().to_string(),
                        transaction_id: tx.id.clone(),
                        result,
                    }),
                    Err(e) => Err(remote_error(tx.target.as_ref(), &tx.id, "commit", e)),
                }
            })
            .collect();

        let (results, mut errors) = partition(self.fan_out(jobs).await);
        for host_result in &results {
            if host_result.result.is_success() {
                continue;
            }
            let mut message = host_result
                .result
                .message
                .clone()
                .unwrap_or_else(|| "commit failed".to_string());
            for file_error in &host_result.result.file_errors {
                message.push_str(&format!("; {}: {}", file_error.uri, file_error.message));
            }
            errors.push(PublishError::Commit {
                host: host_result.host.clone(),
                transaction: host_result.transaction_id.clone(),
                message,
            });
        }
        (results, errors)
    }

    /// Roll back every open transaction. Failures are logged only.
    async fn rollback(&self, collection: &str, open: &[OpenTransaction]) {
        let jobs: Vec<_> = open
            .iter()
            .cloned()
            .map(|tx| async move {
                tx.target
                    .rollback(&tx.id)
                    .await
                    .map_err(|e| remote_error(tx.target.as_ref(), &tx.id, "rollback", e))
            })
            .collect();

        for result in self.fan_out(jobs).await {
            if let Err(e) = result {
                warn!(collection, error = %e, "Rollback failed");
            }
        }
        info!(collection, transactions = open.len(), "Rolled back");
    }

    /// Run every job on the bounded pool and wait for all of them.
    async fn fan_out<T, Fut>(&self, jobs: Vec<Fut>) -> Vec<std::result::Result<T, PublishError>>
    where
        T: Send + 'static,
        Fut: Future<Output = std::result::Result<T, PublishError>> + Send + 'static,
    {
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let pool = self.pool.clone();
                tokio::spawn(async move {
                    match pool.acquire_owned().await {
                        Ok(_permit) => job.await,
                        Err(e) => Err(PublishError::Task(e.to_string())),
                    }
                })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(result) => result,
                Err(e) => Err(PublishError::Task(e.to_string())),
            })
            .collect()
    }

    async fn notify(&self, collection: &str, stage: PublishStage, detail: Option<&str>) {
        if let Err(e) = self.notifier.notify(collection, stage, detail).await {
            warn!(collection, stage = stage.as_str(), error = %e, "Notification failed");
        }
    }
}

/// `pubh publish`: publish one collection now and report the outcome.
pub async fn run_publish(harness: &Harness, actor: &str, reference: &str) -> Result<()> {
    let collection = harness.collection(reference)?;
    let name = collection.name().to_string();

    match harness.publisher.publish(&collection, actor).await? {
        PublishOutcome::Published {
            hosts,
            files,
            report,
        } => {
            println!("Published '{}': {} file(s) to {} target(s)", name, files, hosts);
            if let Some(record) = &report.record {
                println!("  Record: {}", record.display());
            }
            if !report.is_clean() {
                let steps: Vec<&str> = report.failed_steps.iter().map(|s| s.as_str()).collect();
                println!("  Finalization incomplete: {}", steps.join(", "));
            }
            Ok(())
        }
        PublishOutcome::AlreadyPublished => {
            println!("'{}' is already published", name);
            Ok(())
        }
        PublishOutcome::LockedElsewhere => {
            bail!("'{}' is being published by another process", name)
        }
        PublishOutcome::NotApproved(status) => {
            bail!("'{}' is not approved (status {:?})", name, status)
        }
        PublishOutcome::Unreviewed(count) => {
            bail!("'{}' still has {} unreviewed item(s)", name, count)
        }
        PublishOutcome::NoTargets => {
            bail!("No publish targets configured; add [[publish.targets]] to the config")
        }
        PublishOutcome::Failed { reached, errors } => {
            eprintln!("Publish of '{}' failed after {:?}; all targets rolled back:", name, reached);
            for e in &errors {
                eprintln!("  {}", e);
            }
            bail!("publish failed")
        }
    }
}

fn partition<T>(results: Vec<std::result::Result<T, PublishError>>) -> (Vec<T>, Vec<PublishError>) {
    let mut ok = Vec::new();
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(value) => ok.push(value),
            Err(e) => errors.push(e),
        }
    }
    (ok, errors)
}

fn check(results: Vec<std::result::Result<(), PublishError>>) -> std::result::Result<(), Vec<PublishError>> {
    let (_, errors) = partition(results);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
