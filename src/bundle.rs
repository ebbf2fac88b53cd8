//! Zip bundles for timeseries directories.
//!
//! Raw timeseries files are never published one by one. At approval time
//! every `…/timeseries/` directory in the reviewed store is packed into a
//! sibling `…/timeseries-to-publish.zip` (see
//! [`uri::BUNDLE_SUFFIX`](publish_harness_core::uri::BUNDLE_SUFFIX)); the
//! bundle is sent to publish targets flagged for unpacking, and the
//! finalizer unpacks it into the master store.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use tracing::debug;
use zip::write::SimpleFileOptions;

use crate::content::ContentStore;
use crate::error::CollectionError;
use publish_harness_core::uri;

/// Maximum decompressed bytes accepted for a single bundle entry.
const MAX_ENTRY_BYTES: u64 = 1024 * 1024 * 1024;

fn bundle_err(uri: &str, e: impl std::fmt::Display) -> CollectionError {
    CollectionError::Bundle {
        uri: uri.to_string(),
        message: e.to_string(),
    }
}

/// Pack every timeseries directory in `store` into bundles.
///
/// Raw files are removed once their bundle is written. Returns the bundle
/// URIs created.
pub fn bundle_timeseries(store: &ContentStore) -> Result<Vec<String>, CollectionError> {
    let dirs: BTreeSet<String> = store
        .list()?
        .iter()
        .filter(|u| uri::is_to_be_zipped(u))
        .filter_map(|u| uri::timeseries_dir(u))
        .collect();

    let mut bundles = Vec::new();
    for dir in dirs {
        bundles.push(create_bundle(store, &dir)?);
    }
    Ok(bundles)
}

/// Zip the files under `dir_uri` into its bundle and remove the originals.
///
/// An existing bundle (left by an earlier approval) is merged: its entries
/// are restored into the directory first, and files staged since then win.
pub fn create_bundle(store: &ContentStore, dir_uri: &str) -> Result<String, CollectionError> {
    let bundle_uri = uri::bundle_for_dir(dir_uri);
    let dir_path = store.resolve(dir_uri);
    let bundle_path = store.resolve(&bundle_uri);

    if bundle_path.is_file() {
        let restored = extract(&bundle_path, &dir_path, false)?;
        debug!(bundle = %bundle_uri, restored, "Merging existing timeseries bundle");
    }
    let files = store.list_under(dir_uri)?;

    let file = File::create(&bundle_path).map_err(|e| CollectionError::io(&bundle_path, e))?;
    let mut writer = zip::ZipWriter::new(file);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for file_uri in &files {
        let path = store.resolve(file_uri);
        let name = path
            .strip_prefix(&dir_path)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");

        writer
            .start_file(name, options)
            .map_err(|e| bundle_err(&bundle_uri, e))?;
        let mut src = File::open(&path).map_err(|e| CollectionError::io(&path, e))?;
        io::copy(&mut src, &mut writer).map_err(|e| bundle_err(&bundle_uri, e))?;
    }
    writer.finish().map_err(|e| bundle_err(&bundle_uri, e))?;

    store.delete_dir(dir_uri)?;
    debug!(bundle = %bundle_uri, files = files.len(), "Created timeseries bundle");
    Ok(bundle_uri)
}

/// Unpack a bundle into `dest`. Returns the number of files written.
///
/// Entries whose names would escape `dest` are skipped.
pub fn unpack_bundle(bundle: &Path, dest: &Path) -> Result<usize, CollectionError> {
    extract(bundle, dest, true)
}

fn extract(bundle: &Path, dest: &Path, overwrite: bool) -> Result<usize, CollectionError> {
    let label = bundle.display().to_string();
    let file = File::open(bundle).map_err(|e| CollectionError::io(bundle, e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| bundle_err(&label, e))?;

    let mut written = 0;
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(|e| bundle_err(&label, e))?;
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let out = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out).map_err(|e| CollectionError::io(&out, e))?;
            continue;
        }

        if !overwrite && out.exists() {
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).map_err(|e| CollectionError::io(parent, e))?;
        }
        let mut target = File::create(&out).map_err(|e| CollectionError::io(&out, e))?;
        let copied = io::copy(&mut entry.take(MAX_ENTRY_BYTES), &mut target)
            .map_err(|e| CollectionError::io(&out, e))?;
        if copied >= MAX_ENTRY_BYTES {
            return Err(bundle_err(
                &label,
                format!("entry exceeds size limit ({} bytes)", MAX_ENTRY_BYTES),
            ));
        }
        written += 1;
    }
    Ok(written)
}
