//! Publish manifest: the declarative copy/delete list applied on publish.
//!
//! The manifest is computed at approval time from the reviewed tree and the
//! collection's pending deletes, written to `collections/<id>/manifest.json`,
//! sent to every publish target, and applied to the master store by the
//! finalizer.
//!
//! Versioned URIs never travel as files. For each reviewed
//! `/a/previous/v2/data.json` the manifest instead asks the receiver to copy
//! the currently published `/a/data.json` into that version slot before the
//! new content overwrites it.

use serde::{Deserialize, Serialize};

use crate::models::PendingDelete;
use crate::uri;

/// Copy `source` to `target` inside the published store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCopy {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub files_to_copy: Vec<FileCopy>,
    #[serde(default)]
    pub uris_to_delete: Vec<String>,
}

impl Manifest {
    /// Build the manifest for a reviewed tree and its pending deletes.
    ///
    /// Output is sorted and de-duplicated so the same collection always
    /// produces byte-identical manifests.
    pub fn build<'a, I>(reviewed_uris: I, pending_deletes: &[PendingDelete]) -> Manifest
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut files_to_copy: Vec<FileCopy> = reviewed_uris
            .into_iter()
            .filter(|u| uri::is_versioned(u))
            .filter_map(|target| {
                uri::unversioned(target).map(|source| FileCopy {
                    source,
                    target: uri::normalize(target),
                })
            })
            .collect();
        files_to_copy.sort_by(|a, b| a.target.cmp(&b.target));
        files_to_copy.dedup();

        let mut uris_to_delete: Vec<String> = pending_deletes
            .iter()
            .map(|d| uri::normalize(&d.uri))
            .collect();
        uris_to_delete.sort();
        uris_to_delete.dedup();

        Manifest {
            files_to_copy,
            uris_to_delete,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files_to_copy.is_empty() && self.uris_to_delete.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versioned_uris_become_copies() {
        let reviewed = ["/a/data.json", "/a/previous/v2/data.json", "/b/chart.png"];
        let manifest = Manifest::build(reviewed, &[]);

        assert_eq!(
            manifest.files_to_copy,
            vec![FileCopy {
                source: "/a/data.json".to_string(),
                target: "/a/previous/v2/data.json".to_string(),
            }]
        );
        assert!(manifest.uris_to_delete.is_empty());
    }

    #[test]
    fn pending_deletes_are_normalized_and_deduplicated() {
        let deletes = vec![
            PendingDelete {
                uri: "old/page".to_string(),
                user: "alice".to_string(),
            },
            PendingDelete {
                uri: "/old/page".to_string(),
                user: "bob".to_string(),
            },
        ];
        let manifest = Manifest::build(std::iter::empty(), &deletes);
        assert_eq!(manifest.uris_to_delete, vec!["/old/page".to_string()]);
    }

    #[test]
    fn json_field_names() {
        let manifest = Manifest::build(["/a/previous/v1/data.json"], &[]);
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["filesToCopy"][0]["source"], "/a/data.json");
        assert!(json["urisToDelete"].as_array().unwrap().is_empty());
        assert!(Manifest::default().is_empty());
    }
}
