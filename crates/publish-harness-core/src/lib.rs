//! # Publish Harness Core
//!
//! Shared, I/O-free logic for Publish Harness: the persisted collection
//! description and its event ledger, the publish manifest, and the URI
//! conventions (versioned content, zip bundles, indexable documents) that
//! the staging, publishing, and finalization stages agree on.
//!
//! This crate contains no tokio, no filesystem access, and no network
//! clients. Everything here is plain data plus pure functions.

pub mod manifest;
pub mod models;
pub mod uri;
