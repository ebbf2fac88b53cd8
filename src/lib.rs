//! # Publish Harness
//!
//! A filesystem-backed editorial workflow and multi-target publishing engine.
//!
//! Content items move through staged custody inside a **collection**
//! (in progress → complete → reviewed). An approved collection is pushed to
//! every configured publish target as one transaction, committed or rolled
//! back everywhere together, and then folded into the permanent master
//! store. Scheduled collections publish themselves at their publish date.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  approve   ┌─────────────┐  commit   ┌─────────────┐
//! │ Collection  │──────────▶│  Publisher  │─────────▶│  Finalizer  │
//! │ 3 stages    │           │ N targets   │          │ master +    │
//! └──────▲──────┘           └──────▲──────┘          │ archive     │
//!        │                         │                 └─────────────┘
//!   ┌────┴─────┐             ┌─────┴─────┐
//!   │   CLI    │             │ Scheduler │
//!   │  (pubh)  │             │  (serve)  │
//!   └──────────┘             └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pubh init
//! pubh --as alice collection create "May release" --type manual
//! pubh --as alice content create "May release" /economy/cpi/data.json
//! pubh --as alice content complete "May release" /economy/cpi/data.json
//! pubh --as bob content review "May release" /economy/cpi/data.json
//! pubh --as bob collection approve "May release"
//! pubh --as bob publish "May release"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`content`] | Filesystem content store and lookup chain |
//! | [`collection`] | Per-collection staging state machine |
//! | [`collections`] | Collection registry |
//! | [`bundle`] | Timeseries zip bundles |
//! | [`publish`] | Multi-target publish transaction coordinator |
//! | [`finalize`] | Post-publish merge, archive and cleanup |
//! | [`scheduler`] | Timed publishing |
//! | [`history`] | Published-collection records |
//! | [`traits`] | Permissions, publish target, indexer and notifier seams |
//! | [`target_http`] | HTTP publish target client |
//! | [`harness`] | Application context wiring |

pub mod bundle;
pub mod collection;
pub mod collections;
pub mod config;
pub mod content;
pub mod editorial;
pub mod error;
pub mod finalize;
pub mod harness;
pub mod history;
pub mod lock;
pub mod notify;
pub mod permissions;
pub mod publish;
pub mod scheduler;
pub mod target_http;
pub mod traits;

pub use publish_harness_core::{manifest, models, uri};
