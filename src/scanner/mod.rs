//! Source discovery for batch runs.
//!
//! Walks a source tree, keeps files with a configured extension, and maps
//! each one to the path it should have under the destination tree.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Prefix of the staging directories the pipeline creates beside outputs.
const STAGING_PREFIX: &str = ".chapterforge-";

/// One file to chapterize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Check whether `path` has one of `extensions` (case-insensitive).
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Mirror `file`'s position below `source_root` under `destination_root`.
pub fn destination_for(source_root: &Path, destination_root: &Path, file: &Path) -> Option<PathBuf> {
    file.strip_prefix(source_root)
        .ok()
        .map(|relative| destination_root.join(relative))
}

/// Collect every matching file below `source_root`, in path order.
///
/// When the destination tree lives inside the source tree it is not
/// descended into, so earlier outputs are never picked up as sources.
/// Entries that cannot be read (dangling links, link loops, unreadable
/// directories) are logged and skipped.
pub fn scan(
    source_root: &Path,
    destination_root: &Path,
    extensions: &[String],
) -> Result<Vec<ScanEntry>> {
    if !source_root.is_dir() {
        anyhow::bail!("Source directory does not exist: {:?}", source_root);
    }

    info!("Scanning directory: {:?}", source_root);

    let skip_root = destination_root
        .canonicalize()
        .ok()
        .filter(|dest| {
            source_root
                .canonicalize()
                .map(|src| dest.starts_with(&src) && *dest != src)
                .unwrap_or(false)
        });

    let mut entries = Vec::new();
    let walker = WalkDir::new(source_root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            if e.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
                return false;
            }
            match (&skip_root, e.path().canonicalize()) {
                (Some(skip), Ok(path)) => path != *skip,
                _ => true,
            }
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        let path = entry.path();

        if !entry.file_type().is_file() || !has_extension(path, extensions) {
            continue;
        }

        match destination_for(source_root, destination_root, path) {
            Some(destination) => entries.push(ScanEntry {
                source: path.to_path_buf(),
                destination,
            }),
            None => debug!("Skipping path outside source root: {:?}", path),
        }
    }

    info!("Found {} candidate files in {:?}", entries.len(), source_root);
    Ok(entries)
}
