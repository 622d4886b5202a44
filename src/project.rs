//! Session state: the media list plus the build gate.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use rayon::prelude::*;

use crate::build::{
    spawn_guarded, BuildHandle, BuildProgress, BuildRequest, CancelToken, ProgressSnapshot,
};
use crate::engine::ImageEngine;
use crate::error::{BuildError, BuildResult, MediaError, MediaResult};
use crate::media::collection::{CollectionEvent, MediaCollection};
use crate::media::dragdrop::{DropEffect, DropReport, FileDropTarget};
use crate::media::{display_name_of, stat_error, EntryKind, MediaEntry};

/// Clears the build flag when the worker ends.
struct ActiveBuild(Arc<AtomicBool>);

impl Drop for ActiveBuild {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A media list that can be turned into an image.
///
/// While a build runs the list is frozen: every mutation returns
/// [`MediaError::BuildInProgress`] and a second build returns [`BuildError::Busy`].
#[derive(Default)]
pub struct IsoProject {
    collection: MediaCollection,
    progress: Arc<BuildProgress>,
    building: Arc<AtomicBool>,
}

impl IsoProject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection(&self) -> &MediaCollection {
        &self.collection
    }

    pub fn subscribe(&mut self) -> mpsc::Receiver<CollectionEvent> {
        self.collection.subscribe()
    }

    pub fn is_building(&self) -> bool {
        self.building.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    pub fn add_file(&mut self, path: impl AsRef<Path>) -> MediaResult<Arc<MediaEntry>> {
        self.ensure_idle()?;
        self.collection.add_file(path)
    }

    pub fn add_directory(&mut self, path: impl AsRef<Path>) -> MediaResult<Arc<MediaEntry>> {
        self.ensure_idle()?;
        self.collection.add_directory(path)
    }

    /// Add a mixed batch of file and directory paths.
    ///
    /// Subtrees are listed in parallel; roots are inserted in input order, so a
    /// name repeated within the batch is reported as a duplicate after its first use.
    pub fn add_paths(&mut self, paths: &[PathBuf]) -> MediaResult<DropReport> {
        self.ensure_idle()?;

        let collection = &self.collection;
        let prepared: Vec<MediaResult<MediaEntry>> = paths
            .par_iter()
            .map(|path| prepare_entry(collection, path))
            .collect();

        let mut report = DropReport::default();
        for (path, entry) in paths.iter().zip(prepared) {
            match entry.and_then(|entry| self.collection.insert(entry)) {
                Ok(_) => report.added.push(path.clone()),
                Err(MediaError::Duplicate { .. }) => report.duplicates.push(path.clone()),
                Err(e) => {
                    tracing::warn!("Could not add {}: {}", path.display(), e);
                    report.failures.push((path.clone(), e));
                }
            }
        }

        if !report.duplicates.is_empty() {
            tracing::info!(
                "{} of {} paths already in the media list",
                report.duplicates.len(),
                paths.len()
            );
        }
        Ok(report)
    }

    pub fn remove(&mut self, entries: &[Arc<MediaEntry>]) -> MediaResult<usize> {
        self.ensure_idle()?;
        Ok(self.collection.remove(entries))
    }

    /// Start building the current media list on a background thread.
    pub fn start_build(
        &self,
        request: BuildRequest,
        engine: Box<dyn ImageEngine>,
        cancel: CancelToken,
    ) -> BuildResult<BuildHandle> {
        if self.collection.is_empty() {
            return Err(BuildError::NothingToBuild);
        }
        if self
            .building
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BuildError::Busy);
        }

        tracing::info!(
            "Starting build of {} roots ({} files) into {}",
            self.collection.len(),
            self.collection.total_file_count(),
            request.destination.display()
        );

        Ok(spawn_guarded(
            engine,
            self.collection.snapshot(),
            request,
            Arc::clone(&self.progress),
            cancel,
            ActiveBuild(Arc::clone(&self.building)),
        ))
    }

    fn ensure_idle(&self) -> MediaResult<()> {
        if self.is_building() {
            return Err(MediaError::BuildInProgress);
        }
        Ok(())
    }
}

/// Classify and build an entry without touching the collection.
fn prepare_entry(collection: &MediaCollection, path: &Path) -> MediaResult<MediaEntry> {
    let meta = fs::metadata(path).map_err(|e| stat_error(path, e))?;
    let kind = if meta.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    };

    let name = display_name_of(path);
    if collection.is_duplicate(&name, kind) {
        return Err(MediaError::Duplicate { name, kind });
    }

    match kind {
        EntryKind::Directory => MediaEntry::directory(path),
        EntryKind::File => MediaEntry::file(path),
    }
}

impl FileDropTarget for IsoProject {
    fn drop_effect(&self, paths: &[PathBuf]) -> DropEffect {
        if self.is_building() || paths.is_empty() {
            DropEffect::None
        } else {
            DropEffect::Copy
        }
    }

    fn on_drop(&mut self, paths: &[PathBuf]) -> DropReport {
        match self.add_paths(paths) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("Drop refused: {}", e);
                DropReport {
                    failures: paths
                        .iter()
                        .map(|p| (p.clone(), MediaError::BuildInProgress))
                        .collect(),
                    ..Default::default()
                }
            }
        }
    }
}
