//! Directory expansion: list a subtree with jwalk, then assemble it into media nodes.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use jwalk::{Parallelism, WalkDir};

use super::{DirectoryEntry, FileEntry, MediaEntry};
use crate::error::{MediaError, MediaResult};

/// One filesystem entry collected while listing a subtree, before tree assembly.
#[derive(Debug, Clone)]
pub struct RawEntry {
    /// Full path to the file or directory
    pub path: PathBuf,
    /// File length in bytes (0 for directories)
    pub size: u64,
    pub is_dir: bool,
    /// Directory that listed this entry
    pub parent: PathBuf,
}

/// List every file and directory below `root` (excluding `root` itself).
///
/// Entries come back in listing order: each directory's children in the order
/// the filesystem returned them, without sorting. Hidden entries are included.
/// Symlinked directories are followed; dangling links and anything that is
/// neither a regular file nor a directory are skipped with a warning.
pub fn scan_subtree(root: &Path) -> MediaResult<Vec<RawEntry>> {
    match fs::metadata(root) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(MediaError::NotFound(root.to_path_buf())),
        Err(e) => return Err(listing_error(root, root, e.to_string())),
    }

    let start = std::time::Instant::now();
    let mut entries = Vec::new();

    for item in source_walker(root) {
        let entry = match item {
            Ok(entry) => entry,
            Err(e) => match e.path().filter(|p| is_dangling_link(p)) {
                Some(link) => {
                    tracing::warn!("Skipping dangling link {}", link.display());
                    continue;
                }
                None => return Err(listing_error(root, root, e.to_string())),
            },
        };
        let path = entry.path();
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.to_path_buf());

        if entry.file_type().is_dir() {
            entries.push(RawEntry {
                path,
                size: 0,
                is_dir: true,
                parent,
            });
            continue;
        }

        // Stat through symlinks so a link to a file stages the file contents
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(_) if is_dangling_link(&path) => {
                tracing::warn!("Skipping dangling link {}", path.display());
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(MediaError::NotFound(path));
            }
            Err(e) => return Err(listing_error(root, &path, e.to_string())),
        };
        if !meta.is_file() {
            tracing::warn!("Skipping non-regular entry {}", path.display());
            continue;
        }

        entries.push(RawEntry {
            path,
            size: meta.len(),
            is_dir: false,
            parent,
        });
    }

    tracing::debug!(
        "Listed {} entries under {} in {:.1}ms",
        entries.len(),
        root.display(),
        start.elapsed().as_secs_f64() * 1000.0
    );

    Ok(entries)
}

/// Assemble a flat listing produced by [`scan_subtree`] into a directory node.
pub fn build_directory(root: &Path, entries: Vec<RawEntry>) -> DirectoryEntry {
    // parent path → children, in listing order
    let mut children_of: HashMap<PathBuf, Vec<RawEntry>> = HashMap::new();
    for entry in entries {
        children_of.entry(entry.parent.clone()).or_default().push(entry);
    }

    assemble(root, &mut children_of)
}

fn assemble(path: &Path, children_of: &mut HashMap<PathBuf, Vec<RawEntry>>) -> DirectoryEntry {
    let raw_children = children_of.remove(path).unwrap_or_default();

    let children = raw_children
        .into_iter()
        .map(|raw| {
            if raw.is_dir {
                MediaEntry::Directory(assemble(&raw.path, children_of))
            } else {
                MediaEntry::File(FileEntry::new(raw.path, raw.size))
            }
        })
        .collect();

    DirectoryEntry::new(path.to_path_buf(), children)
}

/// Walker shared by directory expansion and the sector engine.
///
/// Serial, so it can run inside a rayon task without waiting on the same pool.
/// Links are followed; jwalk reports link cycles as errors.
pub(crate) fn source_walker(root: &Path) -> WalkDir {
    WalkDir::new(root)
        .skip_hidden(false)
        .follow_links(true)
        .sort(false)
        .min_depth(1)
        .parallelism(Parallelism::Serial)
}

pub(crate) fn is_dangling_link(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink())
        && fs::metadata(path).is_err()
}

fn listing_error(root: &Path, path: &Path, message: String) -> MediaError {
    // The selection raced with a delete: report the root as gone
    if !root.exists() {
        return MediaError::NotFound(root.to_path_buf());
    }
    MediaError::Unreadable {
        path: path.to_path_buf(),
        message,
    }
}
