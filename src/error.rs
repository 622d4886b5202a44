//! Error types for the media model and the build pipeline

use std::io;
use std::path::PathBuf;

use compact_str::CompactString;
use thiserror::Error;

use crate::media::EntryKind;

/// Errors returned when adding entries to a collection.
///
/// These are per-call results; none of them ends the session.
#[derive(Error, Debug)]
pub enum MediaError {
    /// The source path does not exist (or vanished before it could be read)
    #[error("Path not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A top-level entry of the same kind already uses this name
    #[error("A {kind} named '{name}' already exists")]
    Duplicate { name: CompactString, kind: EntryKind },

    /// The path exists but could not be read or listed
    #[error("Failed to read {}: {message}", .path.display())]
    Unreadable { path: PathBuf, message: String },

    /// The collection is frozen while an image is being built
    #[error("Cannot modify the media list while a build is running")]
    BuildInProgress,
}

/// Result type for media operations
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that end a build.
#[derive(Error, Debug)]
pub enum BuildError {
    /// Opening or attaching a source entry failed during staging
    #[error("Failed to stage {}: {source}", .path.display())]
    StagingFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The image engine failed to produce the result image
    #[error("Image engine failed: {0}")]
    Engine(#[source] io::Error),

    /// Reading the image or writing the destination failed
    #[error("Failed to write image: {0}")]
    WriteFailed(#[source] io::Error),

    /// The build was canceled cooperatively
    #[error("Build canceled")]
    Canceled,

    /// Another build is already running
    #[error("A build is already in progress")]
    Busy,

    /// The media list is empty
    #[error("Nothing to build: the media list is empty")]
    NothingToBuild,

    /// The build worker panicked or its outcome was already collected
    #[error("Build worker error: {0}")]
    Worker(String),
}

impl BuildError {
    pub fn staging(path: impl Into<PathBuf>, source: io::Error) -> Self {
        BuildError::StagingFailed {
            path: path.into(),
            source,
        }
    }
}

/// Result type for build operations
pub type BuildResult<T> = Result<T, BuildError>;
