//! Editorial CLI commands.
//!
//! Thin wrappers over [`Collections`](crate::collections::Collections) and
//! [`Collection`] used by `pubh collection …` and `pubh content …`. A
//! rejected transition is reported as an error so the process exits
//! non-zero.

use std::fs;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::collection::Collection;
use crate::config::Config;
use crate::error::LockError;
use crate::harness::Harness;
use crate::lock::FileLock;
use publish_harness_core::models::{CollectionDescription, CollectionType};

/// Create the store directory layout.
pub fn run_init(config: &Config) -> Result<()> {
    let store = &config.store;
    for dir in [
        store.collections_dir(),
        store.master_dir(),
        store.published_collections_dir(),
        store.archive_dir(),
    ] {
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    println!("Store initialized at {}", store.root.display());
    Ok(())
}

/// Parse `2024-05-01T09:30:00Z` (RFC 3339) or `2024-05-01 09:30` (UTC).
pub fn parse_publish_date(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
        .with_context(|| format!("Invalid publish date '{}': expected RFC 3339 or 'YYYY-MM-DD HH:MM'", s))?;
    Ok(naive.and_utc())
}

// ═══════════════════════════════════════════════════════════════════════
// pubh collection …
// ═══════════════════════════════════════════════════════════════════════

pub fn run_collection_create(
    harness: &Harness,
    actor: &str,
    name: &str,
    collection_type: &str,
    publish_date: Option<&str>,
    teams: Vec<String>,
) -> Result<()> {
    let collection_type: CollectionType = collection_type.parse().map_err(anyhow::Error::msg)?;
    let publish_date = publish_date.map(parse_publish_date).transpose()?;

    let collection = harness
        .registry
        .create_collection(actor, name, collection_type, publish_date, teams)?;
    println!("Created collection '{}' ({})", collection.name(), collection.id());
    Ok(())
}

pub fn run_collection_list(harness: &Harness) -> Result<()> {
    let collections = harness.registry.list();
    if collections.is_empty() {
        println!("No collections.");
        return Ok(());
    }

    println!(
        "{:<30} {:<10} {:<12} {:<20} {:>5}  ID",
        "NAME", "TYPE", "STATUS", "PUBLISH DATE", "ITEMS"
    );
    for collection in collections {
        let d = collection.description();
        println!(
            "{:<30} {:<10} {:<12} {:<20} {:>5}  {}",
            d.name,
            type_label(&d),
            status_label(&d),
            date_label(d.publish_date),
            collection.uri_count()?,
            d.id
        );
    }
    Ok(())
}

pub fn run_collection_show(harness: &Harness, reference: &str) -> Result<()> {
    let collection = harness.collection(reference)?;
    let d = collection.description();

    println!("Collection: {}", d.name);
    println!("  ID:            {}", d.id);
    println!("  Type:          {}", type_label(&d));
    println!("  Status:        {}", status_label(&d));
    println!("  Publish date:  {}", date_label(d.publish_date));
    if !d.teams.is_empty() {
        println!("  Teams:         {}", d.teams.join(", "));
    }

    for (label, store) in [
        ("In progress", collection.in_progress()),
        ("Complete", collection.complete()),
        ("Reviewed", collection.reviewed()),
    ] {
        let uris = store.list()?;
        println!();
        println!("  {} ({}):", label, uris.len());
        for u in uris {
            println!("    {}", u);
        }
    }

    if !d.pending_deletes.is_empty() {
        println!();
        println!("  Pending deletes:");
        for p in &d.pending_deletes {
            println!("    {}  (by {})", p.uri, p.user);
        }
    }

    if !d.publish_results.is_empty() {
        println!();
        println!("  Last publish results:");
        for r in &d.publish_results {
            let state = if r.result.is_success() { "ok" } else { "error" };
            println!("    {} [{}]: {}", r.host, r.transaction_id, state);
            for fe in &r.result.file_errors {
                println!("      {}: {}", fe.uri, fe.message);
            }
        }
    }
    Ok(())
}

pub fn run_collection_approve(harness: &Harness, actor: &str, reference: &str) -> Result<()> {
    let (collection, _lock) = editable(harness, reference)?;
    if !collection.approve(actor)? {
        bail!(
            "Cannot approve '{}': every item must be reviewed, the collection must be unpublished, and {} must be an editor",
            collection.name(),
            actor
        );
    }
    println!("Approved '{}'", collection.name());
    Ok(())
}

pub fn run_collection_unlock(harness: &Harness, actor: &str, reference: &str) -> Result<()> {
    let (collection, _lock) = editable(harness, reference)?;
    if !collection.unlock(actor)? {
        bail!("Cannot unlock '{}'", collection.name());
    }
    println!("Unlocked '{}'", collection.name());
    Ok(())
}

pub fn run_collection_delete(harness: &Harness, actor: &str, reference: &str) -> Result<()> {
    let (collection, _lock) = editable(harness, reference)?;
    harness.registry.delete_collection(actor, collection.id())?;
    println!("Deleted collection '{}'", collection.name());
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// pubh content …
// ═══════════════════════════════════════════════════════════════════════

/// A per-URI editorial transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentOp {
    Create,
    Edit,
    Complete,
    Review,
    Delete,
    MarkDelete,
}

impl ContentOp {
    fn verb(&self) -> &'static str {
        match self {
            ContentOp::Create => "create",
            ContentOp::Edit => "edit",
            ContentOp::Complete => "complete",
            ContentOp::Review => "review",
            ContentOp::Delete => "delete",
            ContentOp::MarkDelete => "mark for deletion",
        }
    }
}

pub fn run_content(
    harness: &Harness,
    actor: &str,
    reference: &str,
    op: ContentOp,
    content_uri: &str,
) -> Result<()> {
    let (collection, _lock) = editable(harness, reference)?;
    let registry = &harness.registry;

    let accepted = match op {
        ContentOp::Create => collection.create(actor, content_uri, registry)?,
        ContentOp::Edit => collection.edit(actor, content_uri, registry)?,
        ContentOp::Complete => collection.complete_content(actor, content_uri)?,
        ContentOp::Review => collection.review(actor, content_uri)?,
        ContentOp::Delete => collection.delete_content(actor, content_uri)?,
        ContentOp::MarkDelete => collection.mark_for_deletion(actor, content_uri)?,
    };
    if !accepted {
        bail!(
            "Cannot {} {} in '{}' as {}",
            op.verb(),
            content_uri,
            collection.name(),
            actor
        );
    }
    println!("{}: {} ({})", op.verb(), content_uri, collection.name());
    Ok(())
}

pub fn run_content_version(harness: &Harness, actor: &str, reference: &str, content_uri: &str) -> Result<()> {
    let (collection, _lock) = editable(harness, reference)?;
    match collection.version(actor, content_uri)? {
        Some(versioned) => {
            println!("Versioned {} as {}", content_uri, versioned);
            Ok(())
        }
        None => bail!("Cannot version {}: not published or not permitted", content_uri),
    }
}

pub fn run_content_find(harness: &Harness, actor: &str, reference: &str, content_uri: &str) -> Result<()> {
    let collection = harness.collection(reference)?;
    match collection.find(actor, content_uri) {
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None => bail!("Not found: {}", content_uri),
    }
}

/// Resolve a collection that may currently be changed, holding its
/// advisory lock so no process can start publishing it meanwhile.
fn editable(harness: &Harness, reference: &str) -> Result<(Arc<Collection>, FileLock)> {
    let collection = harness.collection(reference)?;
    if collection.is_publishing() {
        bail!("Collection '{}' is being published", collection.name());
    }
    let lock = match FileLock::try_acquire(collection.lock_path()) {
        Ok(lock) => lock,
        Err(LockError::Contended(_)) => {
            bail!("Collection '{}' is being published", collection.name())
        }
        Err(e) => return Err(e.into()),
    };
    Ok((collection, lock))
}

fn type_label(d: &CollectionDescription) -> &'static str {
    match d.collection_type {
        CollectionType::Scheduled => "scheduled",
        CollectionType::Manual => "manual",
    }
}

fn status_label(d: &CollectionDescription) -> &'static str {
    use publish_harness_core::models::ApprovalStatus::*;
    if d.publish_complete {
        return "PUBLISHED";
    }
    match d.approval_status {
        NotStarted => "NOT_STARTED",
        InProgress => "IN_PROGRESS",
        Complete => "COMPLETE",
        Error => "ERROR",
    }
}

fn date_label(date: Option<DateTime<Utc>>) -> String {
    date.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_both_date_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        assert_eq!(parse_publish_date("2024-05-01T09:30:00Z").unwrap(), expected);
        assert_eq!(parse_publish_date("2024-05-01T10:30:00+01:00").unwrap(), expected);
        assert_eq!(parse_publish_date("2024-05-01 09:30").unwrap(), expected);
        assert!(parse_publish_date("tomorrow").is_err());
    }
}
