//! Timed publishing.
//!
//! The [`Scheduler`] runs one-shot tasks at a collection's publish date,
//! keyed by collection id. Scheduling a collection again replaces (and
//! cancels) its earlier task. A task can be cancelled until it fires; once
//! it fires it removes its own entry and runs to completion.
//!
//! Must be used from within a Tokio runtime.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::collections::Collections;
use crate::harness::Harness;
use crate::publish::{PublishOutcome, Publisher};
use publish_harness_core::models::{CollectionDescription, CollectionType};

/// Actor recorded on events produced by scheduled publishes.
pub const SCHEDULER_ACTOR: &str = "scheduler";

struct Entry {
    generation: u64,
    handle: JoinHandle<()>,
}

type TaskMap = Arc<Mutex<HashMap<String, Entry>>>;

fn lock(tasks: &TaskMap) -> MutexGuard<'_, HashMap<String, Entry>> {
    tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct Scheduler {
    tasks: TaskMap,
    generation: AtomicU64,
    shut_down: AtomicBool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` at the collection's publish date (immediately when the
    /// date has passed).
    ///
    /// Returns `false`, registering nothing, for manual collections, for
    /// collections without a date, and after [`shutdown`](Self::shutdown).
    pub fn schedule<F>(&self, collection: &CollectionDescription, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shut_down.load(Ordering::SeqCst) {
            return false;
        }
        if collection.collection_type == CollectionType::Manual {
            return false;
        }
        let Some(publish_date) = collection.publish_date else {
            return false;
        };

        let delay = (publish_date - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        let id = collection.id.clone();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let tasks = self.tasks.clone();

        let mut map = lock(&self.tasks);
        let handle = {
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                {
                    let mut map = lock(&tasks);
                    if map.get(&id).map(|e| e.generation) == Some(generation) {
                        map.remove(&id);
                    }
                }
                debug!(collection = %id, "Scheduled task fired");
                task.await;
            })
        };
        if let Some(previous) = map.insert(id.clone(), Entry { generation, handle }) {
            previous.handle.abort();
            debug!(collection = %id, "Replaced scheduled task");
        }

        info!(collection = %id, at = %publish_date, delay_secs = delay.as_secs(), "Scheduled");
        true
    }

    /// Cancel the collection's pending task. Returns `true` when one existed.
    pub fn cancel(&self, collection_id: &str) -> bool {
        match lock(&self.tasks).remove(collection_id) {
            Some(entry) => {
                entry.handle.abort();
                info!(collection = %collection_id, "Cancelled scheduled task");
                true
            }
            None => false,
        }
    }

    /// Refuse new schedules and cancel every pending task.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let drained: Vec<(String, Entry)> = lock(&self.tasks).drain().collect();
        for (_, entry) in &drained {
            entry.handle.abort();
        }
        info!(cancelled = drained.len(), "Scheduler shut down");
    }

    pub fn task_exists_for_collection(&self, collection_id: &str) -> bool {
        lock(&self.tasks).contains_key(collection_id)
    }

    pub fn pending(&self) -> usize {
        lock(&self.tasks).len()
    }
}

/// Schedule the publish of a collection at its publish date.
///
/// The collection is reloaded from disk when the task fires, so changes made
/// by other processes are seen and a collection deleted in the meantime is
/// skipped.
pub fn schedule_publish(
    scheduler: &Scheduler,
    registry: Arc<Collections>,
    publisher: Arc<Publisher>,
    collection: &CollectionDescription,
) -> bool {
    let id = collection.id.clone();
    scheduler.schedule(collection, async move {
        let collection = match registry.load_by_id(&id) {
            Ok(collection) => collection,
            Err(e) => {
                warn!(collection = %id, error = %e, "Scheduled collection unavailable");
                return;
            }
        };
        match publisher.publish(&collection, SCHEDULER_ACTOR).await {
            Ok(PublishOutcome::Published { files, .. }) => {
                info!(collection = %id, files, "Scheduled publish complete")
            }
            Ok(PublishOutcome::Failed { reached, errors }) => {
                warn!(collection = %id, ?reached, errors = errors.len(), "Scheduled publish failed")
            }
            Ok(other) => info!(collection = %id, outcome = ?other, "Scheduled publish skipped"),
            Err(e) => warn!(collection = %id, error = %format!("{:#}", e), "Scheduled publish errored"),
        }
    })
}

/// Schedule every unpublished scheduled collection in the registry that has
/// no pending task yet. Returns the number scheduled.
pub fn schedule_all(
    scheduler: &Scheduler,
    registry: &Arc<Collections>,
    publisher: &Arc<Publisher>,
) -> usize {
    let mut scheduled = 0;
    for collection in registry.list() {
        let description = collection.description();
        if !description.is_scheduled()
            || description.publish_complete
            || scheduler.task_exists_for_collection(&description.id)
        {
            continue;
        }
        if schedule_publish(scheduler, registry.clone(), publisher.clone(), &description) {
            scheduled += 1;
        }
    }
    scheduled
}

/// `pubh serve`: keep every scheduled collection on a timer until Ctrl-C.
///
/// The registry is rescanned every `rescan` so collections created or
/// approved by other `pubh` invocations are picked up. A scheduled
/// collection whose publish did not go through is rescheduled by the next
/// rescan, which retries it straight away.
pub async fn run_serve(harness: &Harness, rescan: std::time::Duration) -> anyhow::Result<()> {
    let scheduler = harness.scheduler.clone();
    let scheduled = schedule_all(&scheduler, &harness.registry, &harness.publisher);
    info!(scheduled, "Scheduler running; press Ctrl-C to stop");

    let mut interval = tokio::time::interval(rescan);
    interval.tick().await;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => {
                if let Err(e) = harness.registry.refresh() {
                    warn!(error = %format!("{:#}", e), "Registry rescan failed");
                    continue;
                }
                let added = schedule_all(&scheduler, &harness.registry, &harness.publisher);
                if added > 0 {
                    info!(added, "Scheduled newly found collections");
                }
            }
        }
    }

    scheduler.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::atomic::AtomicUsize;

    fn description(collection_type: CollectionType, offset_secs: i64) -> CollectionDescription {
        CollectionDescription::new(
            "c1".to_string(),
            "C1".to_string(),
            collection_type,
            Some(Utc::now() + Duration::seconds(offset_secs)),
        )
    }

    #[tokio::test]
    async fn manual_collections_are_never_scheduled() {
        let scheduler = Scheduler::new();
        assert!(!scheduler.schedule(&description(CollectionType::Manual, 60), async {}));
        assert!(!scheduler.task_exists_for_collection("c1"));
    }

    #[tokio::test]
    async fn future_task_registers_until_cancelled() {
        let scheduler = Scheduler::new();
        assert!(scheduler.schedule(&description(CollectionType::Scheduled, 60), async {}));
        assert!(scheduler.task_exists_for_collection("c1"));

        assert!(scheduler.cancel("c1"));
        assert!(!scheduler.task_exists_for_collection("c1"));
        assert!(!scheduler.cancel("c1"));
    }

    #[tokio::test]
    async fn past_date_fires_immediately_and_clears_entry() {
        let scheduler = Scheduler::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        assert!(scheduler.schedule(&description(CollectionType::Scheduled, -5), async move {
            let _ = tx.send(());
        }));

        tokio::time::timeout(std::time::Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(!scheduler.task_exists_for_collection("c1"));
    }

    #[tokio::test]
    async fn rescheduling_replaces_the_previous_task() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let first = fired.clone();
        scheduler.schedule(&description(CollectionType::Scheduled, 1), async move {
            first.fetch_add(1, Ordering::SeqCst);
        });
        let (tx, rx) = tokio::sync::oneshot::channel();
        let second = fired.clone();
        scheduler.schedule(&description(CollectionType::Scheduled, -1), async move {
            second.fetch_add(10, Ordering::SeqCst);
            let _ = tx.send(());
        });
        assert_eq!(scheduler.pending(), 1);

        rx.await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn shutdown_cancels_and_refuses() {
        let scheduler = Scheduler::new();
        scheduler.schedule(&description(CollectionType::Scheduled, 60), async {});
        scheduler.shutdown();
        assert_eq!(scheduler.pending(), 0);
        assert!(!scheduler.schedule(&description(CollectionType::Scheduled, 60), async {}));
    }
}
