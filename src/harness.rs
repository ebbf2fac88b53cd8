//! Application context.
//!
//! A [`Harness`] wires the registry, publisher, finalizer and scheduler
//! together from a [`Config`]. There are no globals: the CLI builds one per
//! invocation and passes it down explicitly.
//!
//! Embedders and tests supply their own collaborators through
//! [`Harness::with_components`]:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use publish_harness::config::Config;
//! use publish_harness::harness::{Components, Harness};
//! use publish_harness::notify::{LogIndexer, LogNotifier};
//! use publish_harness::permissions::ConfigPermissions;
//!
//! # fn example(config: &Config) -> anyhow::Result<()> {
//! let harness = Harness::with_components(config, Components {
//!     permissions: Arc::new(ConfigPermissions::new(&config.permissions)),
//!     targets: Vec::new(),
//!     notifier: Arc::new(LogNotifier),
//!     indexer: Arc::new(LogIndexer),
//! })?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::collection::Collection;
use crate::collections::Collections;
use crate::config::Config;
use crate::finalize::Finalizer;
use crate::notify::{LogIndexer, LogNotifier, WebhookNotifier};
use crate::permissions::ConfigPermissions;
use crate::publish::Publisher;
use crate::scheduler::Scheduler;
use crate::target_http::HttpPublishTarget;
use crate::traits::{Indexer, Notifier, Permissions, PublishTarget};

/// The pluggable collaborators of a harness.
pub struct Components {
    pub permissions: Arc<dyn Permissions>,
    pub targets: Vec<Arc<dyn PublishTarget>>,
    pub notifier: Arc<dyn Notifier>,
    pub indexer: Arc<dyn Indexer>,
}

pub struct Harness {
    pub config: Arc<Config>,
    pub registry: Arc<Collections>,
    pub publisher: Arc<Publisher>,
    pub scheduler: Arc<Scheduler>,
}

impl Harness {
    /// Build a harness with the built-in collaborators: config permissions,
    /// one HTTP client per `[[publish.targets]]`, a webhook notifier when
    /// configured (log notifier otherwise), and the log indexer.
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = config.publish.timeout_secs;

        let mut targets: Vec<Arc<dyn PublishTarget>> = Vec::new();
        for target in &config.publish.targets {
            let client = HttpPublishTarget::new(&target.url, timeout)
                .with_context(|| format!("Failed to create publish target client for {}", target.url))?;
            targets.push(Arc::new(client));
        }

        let notifier: Arc<dyn Notifier> = match &config.notifications.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone(), timeout)?),
            None => Arc::new(LogNotifier),
        };

        Self::with_components(
            config,
            Components {
                permissions: Arc::new(ConfigPermissions::new(&config.permissions)),
                targets,
                notifier,
                indexer: Arc::new(LogIndexer),
            },
        )
    }

    pub fn with_components(config: &Config, components: Components) -> Result<Self> {
        let config = Arc::new(config.clone());
        let registry = Arc::new(Collections::load(&config, components.permissions)?);
        let finalizer = Arc::new(Finalizer::new(
            config.store.clone(),
            registry.clone(),
            components.indexer,
        ));
        let publisher = Arc::new(Publisher::new(
            components.targets,
            config.publish.max_concurrency,
            components.notifier,
            finalizer,
        ));

        Ok(Self {
            config,
            registry,
            publisher,
            scheduler: Arc::new(Scheduler::new()),
        })
    }

    /// Look a collection up by id or name, failing with a readable error.
    pub fn collection(&self, id_or_name: &str) -> Result<Arc<Collection>> {
        self.registry
            .resolve(id_or_name)
            .with_context(|| format!("No collection with id or name '{}'", id_or_name))
    }
}
