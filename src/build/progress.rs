use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Phase of the build state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildStage {
    #[default]
    Idle,
    /// Source entries are being registered with the image engine
    Staging,
    /// The finished image is being streamed to the destination
    Writing,
}

impl BuildStage {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => BuildStage::Staging,
            2 => BuildStage::Writing,
            _ => BuildStage::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            BuildStage::Idle => 0,
            BuildStage::Staging => 1,
            BuildStage::Writing => 2,
        }
    }
}

/// Live counters of the running build, readable from any thread.
///
/// Byte counters only grow during a build; they are reset when the next one starts.
#[derive(Debug, Default)]
pub struct BuildProgress {
    stage: AtomicU8,
    files_staged: AtomicU64,
    bytes_written: AtomicU64,
    bytes_to_write: AtomicU64,
}

impl BuildProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> BuildStage {
        BuildStage::from_u8(self.stage.load(Ordering::Acquire))
    }

    pub fn files_staged(&self) -> u64 {
        self.files_staged.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn bytes_to_write(&self) -> u64 {
        self.bytes_to_write.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            stage: self.stage(),
            files_staged: self.files_staged(),
            bytes_written: self.bytes_written(),
            bytes_to_write: self.bytes_to_write(),
        }
    }

    pub(crate) fn begin_staging(&self) {
        self.files_staged.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
        self.bytes_to_write.store(0, Ordering::Relaxed);
        self.set_stage(BuildStage::Staging);
    }

    /// Count one fully staged item. Returns the new total.
    pub(crate) fn file_staged(&self) -> u64 {
        self.files_staged.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn begin_writing(&self, bytes_to_write: u64) {
        self.bytes_to_write.store(bytes_to_write, Ordering::Relaxed);
        self.set_stage(BuildStage::Writing);
    }

    pub(crate) fn add_written(&self, bytes: u64) -> u64 {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed) + bytes
    }

    pub(crate) fn set_stage(&self, stage: BuildStage) {
        self.stage.store(stage.as_u8(), Ordering::Release);
    }
}

/// Point-in-time copy of [`BuildProgress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    pub stage: BuildStage,
    pub files_staged: u64,
    pub bytes_written: u64,
    pub bytes_to_write: u64,
}

impl ProgressSnapshot {
    /// Fraction of the image written, 0.0 until the size is known.
    pub fn write_fraction(&self) -> f64 {
        if self.bytes_to_write == 0 {
            return 0.0;
        }
        self.bytes_written as f64 / self.bytes_to_write as f64
    }
}

/// Cooperative cancellation flag shared between a shell and a build.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Notifications emitted by a running build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    StageChanged(BuildStage),
    /// An item finished staging
    ItemStaged { item: String, files_staged: u64 },
    /// The build ended; the outcome is returned by the build handle
    Finished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_resets_counters() {
        let progress = BuildProgress::new();
        progress.begin_staging();
        progress.file_staged();
        progress.begin_writing(4096);
        progress.add_written(2048);
        assert_eq!(progress.stage(), BuildStage::Writing);

        progress.begin_staging();
        assert_eq!(
            progress.snapshot(),
            ProgressSnapshot {
                stage: BuildStage::Staging,
                files_staged: 0,
                bytes_written: 0,
                bytes_to_write: 0,
            }
        );
    }

    #[test]
    fn write_fraction() {
        let progress = BuildProgress::new();
        assert_eq!(progress.snapshot().write_fraction(), 0.0);
        progress.begin_writing(4 * 1024 * 1024);
        progress.add_written(1024 * 1024);
        assert!((progress.snapshot().write_fraction() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_canceled());
        token.cancel();
        assert!(observer.is_canceled());
    }
}
