//! Content URI conventions.
//!
//! A content URI is a `/`-separated path relative to a content store root,
//! always written with a leading `/` (e.g. `/economy/inflation/data.json`).
//! Several stages of the publish pipeline classify URIs the same way:
//!
//! | Kind | Rule | Example |
//! |------|------|---------|
//! | versioned | contains a `previous` segment followed by a version | `/a/previous/v2/data.json` |
//! | bundle | file name ends with [`BUNDLE_SUFFIX`] | `/a/timeseries-to-publish.zip` |
//! | to-be-zipped | under a `timeseries` directory, not a bundle | `/a/timeseries/cpi.json` |
//! | indexable | non-versioned `data.json` | `/economy/data.json` |

/// File-name suffix marking a zip bundle that targets unpack on arrival.
pub const BUNDLE_SUFFIX: &str = "-to-publish.zip";

/// Directory segment that introduces a previous version of a document.
pub const VERSION_SEGMENT: &str = "previous";

/// Directory segment holding raw timeseries files that are shipped zipped.
pub const TIMESERIES_SEGMENT: &str = "timeseries";

/// File name of an indexable document.
pub const INDEXABLE_FILE: &str = "data.json";

/// Normalize a URI to the canonical `/a/b/c` form.
///
/// Backslashes become `/`, empty and `.` segments are dropped, and a single
/// leading `/` is added. `..` segments are kept so that [`is_safe`] can
/// reject them.
pub fn normalize(uri: &str) -> String {
    let segments: Vec<&str> = uri
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    format!("/{}", segments.join("/"))
}

/// Strip the leading `/` so the URI can be joined onto a store root.
pub fn relative(uri: &str) -> &str {
    uri.trim_start_matches('/')
}

/// `false` when the URI would escape its store root or names nothing.
pub fn is_safe(uri: &str) -> bool {
    let normalized = normalize(uri);
    normalized != "/" && !normalized.split('/').any(|s| s == "..")
}

fn segments(uri: &str) -> impl Iterator<Item = &str> {
    uri.split('/').filter(|s| !s.is_empty())
}

/// File name (last segment) of a URI.
pub fn file_name(uri: &str) -> &str {
    segments(uri).last().unwrap_or("")
}

/// Parent directory of a URI (`/` for top-level files).
pub fn parent(uri: &str) -> String {
    let normalized = normalize(uri);
    match normalized.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => normalized[..idx].to_string(),
    }
}

/// `true` for URIs inside a `previous/<version>/` directory.
pub fn is_versioned(uri: &str) -> bool {
    let parts: Vec<&str> = segments(uri).collect();
    parts
        .iter()
        .enumerate()
        .any(|(i, s)| *s == VERSION_SEGMENT && i + 2 < parts.len())
}

/// `true` for zip bundles that are unpacked on the receiving side.
pub fn is_bundle(uri: &str) -> bool {
    let name = file_name(uri);
    name.len() > BUNDLE_SUFFIX.len() && name.ends_with(BUNDLE_SUFFIX)
}

/// Destination directory of a bundle (`/a/timeseries-to-publish.zip` → `/a/timeseries`).
pub fn bundle_target(uri: &str) -> Option<String> {
    if !is_bundle(uri) {
        return None;
    }
    let normalized = normalize(uri);
    normalized
        .strip_suffix(BUNDLE_SUFFIX)
        .map(|s| s.to_string())
}

/// Bundle URI for a timeseries directory (`/a/timeseries` → `/a/timeseries-to-publish.zip`).
pub fn bundle_for_dir(dir: &str) -> String {
    format!("{}{}", normalize(dir), BUNDLE_SUFFIX)
}

/// Directory URI of the `timeseries` segment a file lives under, if any.
pub fn timeseries_dir(uri: &str) -> Option<String> {
    let parts: Vec<&str> = segments(uri).collect();
    let idx = parts
        .iter()
        .take(parts.len().saturating_sub(1))
        .position(|s| *s == TIMESERIES_SEGMENT)?;
    Some(format!("/{}", parts[..=idx].join("/")))
}

/// `true` for raw timeseries files that must travel inside a bundle.
pub fn is_to_be_zipped(uri: &str) -> bool {
    !is_bundle(uri) && timeseries_dir(uri).is_some()
}

/// `true` for documents the search index should receive after publish.
pub fn is_indexable(uri: &str) -> bool {
    !is_versioned(uri) && file_name(uri) == INDEXABLE_FILE
}

/// Current (unversioned) URI a versioned URI was taken from.
///
/// `/a/b/previous/v2/data.json` → `/a/b/data.json`.
pub fn unversioned(uri: &str) -> Option<String> {
    let parts: Vec<&str> = segments(uri).collect();
    let idx = parts
        .iter()
        .enumerate()
        .position(|(i, s)| *s == VERSION_SEGMENT && i + 2 < parts.len())?;
    let mut kept: Vec<&str> = parts[..idx].to_vec();
    kept.extend_from_slice(&parts[idx + 2..]);
    Some(format!("/{}", kept.join("/")))
}

/// Versioned URI for the given version number.
///
/// `/a/b/data.json`, 3 → `/a/b/previous/v3/data.json`.
pub fn versioned(uri: &str, version: u32) -> String {
    let dir = parent(uri);
    let dir = if dir == "/" { String::new() } else { dir };
    format!(
        "{}/{}/v{}/{}",
        dir,
        VERSION_SEGMENT,
        version,
        file_name(uri)
    )
}

/// Parse the version number out of a `vN` directory name.
pub fn parse_version(segment: &str) -> Option<u32> {
    segment.strip_prefix('v')?.parse().ok()
}

/// Derive a collection id from its display name.
///
/// The id is a lower-case, filesystem-safe slug of the name followed by a
/// random suffix, and never longer than 255 characters. Lower-casing makes
/// ids unique regardless of the case the name was typed in.
pub fn collection_id(name: &str) -> String {
    const MAX_ID_LEN: usize = 255;
    let suffix = uuid::Uuid::new_v4().simple().to_string();

    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    let max_slug = MAX_ID_LEN - suffix.len() - 1;
    slug.truncate(max_slug);
    let slug = slug.trim_end_matches('-');

    if slug.is_empty() {
        suffix
    } else {
        format!("{}-{}", slug, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_variants() {
        assert_eq!(normalize("a/b/c.json"), "/a/b/c.json");
        assert_eq!(normalize("/a//b/./c.json"), "/a/b/c.json");
        assert_eq!(normalize("\\a\\b"), "/a/b");
        assert_eq!(normalize(""), "/");
    }

    #[test]
    fn safe_uris() {
        assert!(is_safe("/a/b.json"));
        assert!(!is_safe("/a/../../etc/passwd"));
        assert!(!is_safe("/"));
    }

    #[test]
    fn parent_of_uri() {
        assert_eq!(parent("/a/b/c.json"), "/a/b");
        assert_eq!(parent("/c.json"), "/");
    }

    #[test]
    fn versioned_detection() {
        assert!(is_versioned("/a/previous/v2/data.json"));
        assert!(!is_versioned("/a/previous/data.json"));
        assert!(!is_versioned("/a/data.json"));
    }

    #[test]
    fn versioned_roundtrip_paths() {
        let v = versioned("/a/b/data.json", 3);
        assert_eq!(v, "/a/b/previous/v3/data.json");
        assert_eq!(unversioned(&v), Some("/a/b/data.json".to_string()));
        assert_eq!(versioned("/data.json", 1), "/previous/v1/data.json");
        assert_eq!(unversioned("/a/data.json"), None);
    }

    #[test]
    fn bundle_detection() {
        assert!(is_bundle("/a/timeseries-to-publish.zip"));
        assert!(!is_bundle("/a/-to-publish.zip"));
        assert_eq!(
            bundle_target("/a/timeseries-to-publish.zip"),
            Some("/a/timeseries".to_string())
        );
        assert_eq!(bundle_target("/a/data.json"), None);
        assert_eq!(bundle_for_dir("/a/timeseries"), "/a/timeseries-to-publish.zip");
    }

    #[test]
    fn to_be_zipped_detection() {
        assert!(is_to_be_zipped("/a/timeseries/cpi/data.json"));
        assert!(!is_to_be_zipped("/a/timeseries-to-publish.zip"));
        assert!(!is_to_be_zipped("/a/timeseries"));
        assert_eq!(
            timeseries_dir("/a/timeseries/cpi/data.json"),
            Some("/a/timeseries".to_string())
        );
    }

    #[test]
    fn indexable_detection() {
        assert!(is_indexable("/economy/data.json"));
        assert!(!is_indexable("/economy/previous/v1/data.json"));
        assert!(!is_indexable("/economy/chart.png"));
    }

    #[test]
    fn collection_id_is_slug_plus_suffix() {
        let id = collection_id("Inflation  Release (May)");
        assert!(id.starts_with("inflation-release-may-"));
        assert_eq!(id.len(), "inflation-release-may-".len() + 32);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[test]
    fn collection_id_length_capped() {
        let name = "x".repeat(1000);
        assert!(collection_id(&name).len() <= 255);
        assert_eq!(collection_id("!!!").len(), 32);
    }

    #[test]
    fn version_segment_parse() {
        assert_eq!(parse_version("v12"), Some(12));
        assert_eq!(parse_version("12"), None);
        assert_eq!(parse_version("vx"), None);
    }
}
