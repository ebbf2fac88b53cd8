//! Persisted collection description and its event ledger.
//!
//! A [`CollectionDescription`] is stored as `collections/<id>.json` next to
//! the collection's staging directories. It is the authoritative record of
//! the collection's approval status, publish lifecycle, and the per-URI
//! event history used to enforce the "no self-review" rule.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of an editorial or lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Created,
    Edited,
    Completed,
    Reviewed,
    Deleted,
    Published,
    Approved,
    Unlocked,
}

/// A single ledger entry: who did what, when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub email: String,
}

impl Event {
    /// Event of the given type performed by `actor` right now.
    pub fn now(event_type: EventType, actor: &str) -> Self {
        Self {
            date: Utc::now(),
            event_type,
            email: actor.to_string(),
        }
    }
}

/// Whether a collection is published automatically at its publish date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionType {
    Scheduled,
    Manual,
}

impl std::str::FromStr for CollectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scheduled" => Ok(CollectionType::Scheduled),
            "manual" => Ok(CollectionType::Manual),
            other => Err(format!(
                "Unknown collection type: '{}'. Must be scheduled or manual.",
                other
            )),
        }
    }
}

/// Approval state of a collection. Only `Complete` collections may publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    #[default]
    NotStarted,
    InProgress,
    Complete,
    Error,
}

/// Published content the collection will remove when it publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDelete {
    pub uri: String,
    pub user: String,
}

/// A per-file failure reported by a publish target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub uri: String,
    pub message: String,
}

/// Outcome of a commit on one publish target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub file_errors: Vec<FileError>,
}

impl CommitResult {
    /// A commit with neither a transaction-level nor a per-file error.
    pub fn is_success(&self) -> bool {
        !self.error && self.file_errors.is_empty()
    }
}

/// Commit outcome recorded against the host that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostResult {
    pub host: String,
    pub transaction_id: String,
    #[serde(flatten)]
    pub result: CommitResult,
}

/// Linear progress of one publish attempt.
///
/// ```text
/// NotStarted → TransactionsOpened → ManifestSent → FilesSent → Committed
///                      └───────────────┴──────────────┴────────→ RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishState {
    NotStarted,
    TransactionsOpened,
    ManifestSent,
    FilesSent,
    Committed,
    RolledBack,
}

/// The persisted description of a collection (`collections/<id>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDescription {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub collection_type: CollectionType,
    #[serde(default)]
    pub publish_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub approval_status: ApprovalStatus,
    #[serde(default)]
    pub publish_complete: bool,
    #[serde(default)]
    pub publish_start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub publish_end_date: Option<DateTime<Utc>>,
    /// Collection-level events (approval, unlock, publish).
    #[serde(default)]
    pub events: Vec<Event>,
    /// Per-URI editorial history.
    #[serde(default)]
    pub events_by_uri: BTreeMap<String, Vec<Event>>,
    /// Publish target host → open transaction id.
    #[serde(default)]
    pub publish_transaction_ids: BTreeMap<String, String>,
    #[serde(default)]
    pub pending_deletes: Vec<PendingDelete>,
    #[serde(default)]
    pub teams: Vec<String>,
    #[serde(default)]
    pub publish_results: Vec<HostResult>,
}

impl CollectionDescription {
    pub fn new(
        id: String,
        name: String,
        collection_type: CollectionType,
        publish_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            name,
            collection_type,
            publish_date,
            approval_status: ApprovalStatus::NotStarted,
            publish_complete: false,
            publish_start_date: None,
            publish_end_date: None,
            events: Vec::new(),
            events_by_uri: BTreeMap::new(),
            publish_transaction_ids: BTreeMap::new(),
            pending_deletes: Vec::new(),
            teams: Vec::new(),
            publish_results: Vec::new(),
        }
    }

    /// Append a collection-level event.
    pub fn add_event(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Append an event to the history of `uri`.
    pub fn add_event_for_uri(&mut self, uri: &str, event: Event) {
        self.events_by_uri
            .entry(uri.to_string())
            .or_default()
            .push(event);
    }

    /// History of `uri`, oldest first.
    pub fn events_for(&self, uri: &str) -> &[Event] {
        self.events_by_uri
            .get(uri)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Most recent event of the given type recorded for `uri`.
    pub fn last_event_of(&self, uri: &str, event_type: EventType) -> Option<&Event> {
        self.events_for(uri)
            .iter()
            .rev()
            .find(|e| e.event_type == event_type)
    }

    /// `true` for scheduled collections that have a publish date.
    pub fn is_scheduled(&self) -> bool {
        self.collection_type == CollectionType::Scheduled && self.publish_date.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn description() -> CollectionDescription {
        CollectionDescription::new(
            "may-release-abc".to_string(),
            "May Release".to_string(),
            CollectionType::Scheduled,
            Some(Utc::now() + Duration::hours(1)),
        )
    }

    #[test]
    fn serializes_with_camel_case_and_upper_enums() {
        let mut d = description();
        d.add_event_for_uri("/a/data.json", Event::now(EventType::Created, "alice"));
        let json = serde_json::to_value(&d).unwrap();

        assert_eq!(json["type"], "scheduled");
        assert_eq!(json["approvalStatus"], "NOT_STARTED");
        assert_eq!(json["publishComplete"], false);
        assert_eq!(json["eventsByUri"]["/a/data.json"][0]["type"], "CREATED");
        assert_eq!(json["eventsByUri"]["/a/data.json"][0]["email"], "alice");
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = r#"{"id":"x","name":"X","type":"manual"}"#;
        let d: CollectionDescription = serde_json::from_str(json).unwrap();
        assert_eq!(d.approval_status, ApprovalStatus::NotStarted);
        assert!(d.events_by_uri.is_empty());
        assert!(d.publish_transaction_ids.is_empty());
        assert!(!d.is_scheduled());
    }

    #[test]
    fn last_event_of_finds_most_recent() {
        let mut d = description();
        d.add_event_for_uri("/a", Event::now(EventType::Completed, "alice"));
        d.add_event_for_uri("/a", Event::now(EventType::Edited, "bob"));
        d.add_event_for_uri("/a", Event::now(EventType::Completed, "bob"));

        let last = d.last_event_of("/a", EventType::Completed).unwrap();
        assert_eq!(last.email, "bob");
        assert!(d.last_event_of("/a", EventType::Reviewed).is_none());
        assert!(d.last_event_of("/missing", EventType::Completed).is_none());
    }

    #[test]
    fn commit_result_success_rules() {
        assert!(CommitResult::default().is_success());
        let with_file_error = CommitResult {
            error: false,
            message: None,
            file_errors: vec![FileError {
                uri: "/a".to_string(),
                message: "checksum mismatch".to_string(),
            }],
        };
        assert!(!with_file_error.is_success());
    }

    #[test]
    fn collection_type_parses() {
        assert_eq!("Manual".parse::<CollectionType>(), Ok(CollectionType::Manual));
        assert!("weekly".parse::<CollectionType>().is_err());
    }
}
