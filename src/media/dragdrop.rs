use std::path::PathBuf;

use crate::error::MediaError;

/// What a drop target would do with dragged paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropEffect {
    /// The paths would be copied into the media list
    Copy,
    /// The drop is refused
    None,
}

/// Per-path results of adding a batch of dropped or multi-selected paths.
#[derive(Debug, Default)]
pub struct DropReport {
    /// Paths that became new roots, in input order
    pub added: Vec<PathBuf>,
    /// Paths skipped because a root with the same name and kind exists
    pub duplicates: Vec<PathBuf>,
    /// Paths that could not be added for any other reason
    pub failures: Vec<(PathBuf, MediaError)>,
}

impl DropReport {
    pub fn is_clean(&self) -> bool {
        self.duplicates.is_empty() && self.failures.is_empty()
    }
}

/// Capability a shell calls into while files are dragged over and dropped on it.
pub trait FileDropTarget {
    /// Effect to show while `paths` hover over the target.
    fn drop_effect(&self, paths: &[PathBuf]) -> DropEffect;

    /// Accept the dropped `paths`.
    fn on_drop(&mut self, paths: &[PathBuf]) -> DropReport;
}
