pub mod collection;
pub mod dragdrop;
pub mod walk;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use compact_str::CompactString;

use crate::error::{MediaError, MediaResult};

/// Allocation unit of the disc image in bytes.
pub const SECTOR_SIZE: u64 = 2048;

/// Bytes a file of `len` bytes occupies on disc: whole sectors, none for an empty file.
pub fn size_on_disc_for_len(len: u64) -> u64 {
    len.div_ceil(SECTOR_SIZE) * SECTOR_SIZE
}

/// Variant tag of a [`MediaEntry`].
///
/// Ordering puts directories before files, which is the presentation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKind {
    Directory,
    File,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Directory => "Directory",
            EntryKind::File => "File",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A regular file selected for the image.
#[derive(Debug, Clone)]
pub struct FileEntry {
    path: PathBuf,
    display_name: CompactString,
    /// Length in bytes at construction time
    length: u64,
}

impl FileEntry {
    pub(crate) fn new(path: PathBuf, length: u64) -> Self {
        let display_name = display_name_of(&path);
        Self {
            path,
            display_name,
            length,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn length(&self) -> u64 {
        self.length
    }
}

/// A directory together with its fully expanded subtree.
///
/// Children keep the order the filesystem listed them in.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    path: PathBuf,
    display_name: CompactString,
    children: Vec<MediaEntry>,
}

impl DirectoryEntry {
    pub(crate) fn new(path: PathBuf, children: Vec<MediaEntry>) -> Self {
        let display_name = display_name_of(&path);
        Self {
            path,
            display_name,
            children,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn children(&self) -> &[MediaEntry] {
        &self.children
    }
}

/// A file or directory node of the virtual media tree.
///
/// The tree is immutable once built. Directory aggregates are derived from the
/// children on every call, so they cannot drift from the subtree.
#[derive(Debug, Clone)]
pub enum MediaEntry {
    File(FileEntry),
    Directory(DirectoryEntry),
}

impl MediaEntry {
    /// Build a file entry. Fails with `NotFound` unless `path` is an existing regular file.
    pub fn file(path: impl AsRef<Path>) -> MediaResult<Self> {
        let path = path.as_ref();
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) => return Err(stat_error(path, e)),
        };
        if !meta.is_file() {
            return Err(MediaError::NotFound(path.to_path_buf()));
        }

        Ok(MediaEntry::File(FileEntry::new(path.to_path_buf(), meta.len())))
    }

    /// Build a directory entry by listing the whole subtree rooted at `path`.
    pub fn directory(path: impl AsRef<Path>) -> MediaResult<Self> {
        let path = path.as_ref();
        let entries = walk::scan_subtree(path)?;
        Ok(MediaEntry::Directory(walk::build_directory(path, entries)))
    }

    /// Build a file or directory entry depending on what `path` points at.
    pub fn from_path(path: impl AsRef<Path>) -> MediaResult<Self> {
        let path = path.as_ref();
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => Self::directory(path),
            Ok(_) => Self::file(path),
            Err(e) => Err(stat_error(path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            MediaEntry::File(file) => file.path(),
            MediaEntry::Directory(dir) => dir.path(),
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            MediaEntry::File(file) => file.display_name(),
            MediaEntry::Directory(dir) => dir.display_name(),
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            MediaEntry::File(_) => EntryKind::File,
            MediaEntry::Directory(_) => EntryKind::Directory,
        }
    }

    /// "File" or "Directory"
    pub fn entry_type(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Sector-rounded size of this entry (recursive for directories).
    pub fn size_on_disc(&self) -> u64 {
        match self {
            MediaEntry::File(file) => size_on_disc_for_len(file.length),
            MediaEntry::Directory(dir) => dir.children.iter().map(MediaEntry::size_on_disc).sum(),
        }
    }

    /// Number of regular files represented by this entry.
    pub fn file_count(&self) -> u64 {
        match self {
            MediaEntry::File(_) => 1,
            MediaEntry::Directory(dir) => dir.children.iter().map(MediaEntry::file_count).sum(),
        }
    }

    /// Direct children (empty for files).
    pub fn children(&self) -> &[MediaEntry] {
        match self {
            MediaEntry::File(_) => &[],
            MediaEntry::Directory(dir) => dir.children(),
        }
    }
}

/// Leaf name of a path; falls back to the whole path for roots like `/`.
pub(crate) fn display_name_of(path: &Path) -> CompactString {
    path.file_name()
        .map(|n| CompactString::new(n.to_string_lossy()))
        .unwrap_or_else(|| CompactString::new(path.to_string_lossy()))
}

pub(crate) fn stat_error(path: &Path, e: io::Error) -> MediaError {
    if e.kind() == io::ErrorKind::NotFound {
        MediaError::NotFound(path.to_path_buf())
    } else {
        MediaError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    }
}
