//! Publish history.
//!
//! Every successful publish leaves an immutable record under
//! `published-collections/`: a `<timestamp>-<id>.json` copy of the final
//! description and a `<timestamp>-<id>/` directory with the manifest and the
//! reviewed tree. The listing here reads those descriptions back.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::Config;
use publish_harness_core::models::CollectionDescription;

const STAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// `<timestamp>-<id>`, the shared name of a collection's record and archive.
pub fn record_name(published_at: DateTime<Utc>, id: &str) -> String {
    format!("{}-{}", published_at.format(STAMP_FORMAT), id)
}

#[derive(Debug, Clone)]
pub struct PublishedRecord {
    /// `<timestamp>-<id>`.
    pub name: String,
    pub path: PathBuf,
    pub description: CollectionDescription,
}

/// Every readable record, oldest first.
pub fn list_records(dir: &Path) -> Result<Vec<PublishedRecord>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(|s| s.to_string()) else {
            continue;
        };

        let parsed = fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|s| serde_json::from_str::<CollectionDescription>(&s).map_err(Into::into));
        match parsed {
            Ok(description) => records.push(PublishedRecord {
                name,
                path: path.with_extension(""),
                description,
            }),
            Err(e) => warn!(record = %path.display(), error = %e, "Skipping unreadable publish record"),
        }
    }

    records.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(records)
}

/// Print the publish history, newest first.
pub fn run_history(config: &Config, limit: usize) -> Result<()> {
    let records = list_records(&config.store.published_collections_dir())?;
    if records.is_empty() {
        println!("No collections have been published.");
        return Ok(());
    }

    println!(
        "{:<20} {:<30} {:<10} {:>6}  RECORD",
        "PUBLISHED", "NAME", "TYPE", "HOSTS"
    );
    for record in records.iter().rev().take(limit) {
        let d = &record.description;
        let published = d
            .publish_end_date
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let kind = match d.collection_type {
            publish_harness_core::models::CollectionType::Scheduled => "scheduled",
            publish_harness_core::models::CollectionType::Manual => "manual",
        };
        println!(
            "{:<20} {:<30} {:<10} {:>6}  {}",
            published,
            d.name,
            kind,
            d.publish_results.len(),
            record.name
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use publish_harness_core::models::CollectionType;
    use tempfile::TempDir;

    #[test]
    fn record_name_is_sortable() {
        let t = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(record_name(t, "abc"), "2024-03-09-07-05-01-abc");
    }

    #[test]
    fn lists_records_in_order_and_skips_garbage() {
        let tmp = TempDir::new().unwrap();
        for (stamp, name) in [("2024-02-01-00-00-00", "b"), ("2024-01-01-00-00-00", "a")] {
            let d = CollectionDescription::new(name.to_string(), name.to_string(), CollectionType::Manual, None);
            fs::write(
                tmp.path().join(format!("{}-{}.json", stamp, name)),
                serde_json::to_string(&d).unwrap(),
            )
            .unwrap();
        }
        fs::write(tmp.path().join("broken.json"), "{").unwrap();

        let records = list_records(tmp.path()).unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.description.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(records[0].path, tmp.path().join("2024-01-01-00-00-00-a"));
    }

    #[test]
    fn missing_dir_is_empty_history() {
        let tmp = TempDir::new().unwrap();
        assert!(list_records(&tmp.path().join("nope")).unwrap().is_empty());
    }
}
