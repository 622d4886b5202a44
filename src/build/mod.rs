//! Image build pipeline: staging, streaming write and handle release.
//!
//! A build runs on its own thread. The shell polls [`BuildHandle`] for events
//! and reads live counters from the shared [`BuildProgress`].

pub mod boot;
pub mod finalize;
pub mod progress;
pub mod staging;
pub mod writer;

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::engine::ImageEngine;
use crate::error::BuildError;
use crate::media::MediaEntry;

pub use self::boot::{BootDiscovery, BootImageSpec};
pub use self::finalize::{ReleaseSummary, StreamRegistry};
pub use self::progress::{BuildEvent, BuildProgress, BuildStage, CancelToken, ProgressSnapshot};
pub use self::writer::WriterConfig;

/// What to build and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub destination: PathBuf,
    pub volume_name: Option<String>,
    /// One per platform is used; later specs for the same platform are ignored
    pub boot_specs: Vec<BootImageSpec>,
    pub writer: WriterConfig,
}

impl BuildRequest {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            volume_name: None,
            boot_specs: Vec::new(),
            writer: WriterConfig::default(),
        }
    }

    pub fn with_volume_name(mut self, name: impl Into<String>) -> Self {
        self.volume_name = Some(name.into());
        self
    }

    pub fn with_boot_specs(mut self, specs: Vec<BootImageSpec>) -> Self {
        self.boot_specs = specs;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub destination: PathBuf,
    pub files_staged: u64,
    pub bytes_written: u64,
    pub released: ReleaseSummary,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub enum BuildOutcome {
    Success(BuildReport),
    Canceled,
    Failed(BuildError),
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildOutcome::Success(_))
    }
}

/// Shared state a build reports through.
pub struct BuildContext<'a> {
    pub progress: &'a Arc<BuildProgress>,
    pub cancel: &'a CancelToken,
    pub events: Option<&'a mpsc::Sender<BuildEvent>>,
}

impl<'a> BuildContext<'a> {
    pub fn new(
        progress: &'a Arc<BuildProgress>,
        cancel: &'a CancelToken,
        events: Option<&'a mpsc::Sender<BuildEvent>>,
    ) -> Self {
        Self {
            progress,
            cancel,
            events,
        }
    }

    pub(crate) fn emit(&self, event: BuildEvent) {
        if let Some(tx) = self.events {
            let _ = tx.send(event);
        }
    }
}

/// Puts the stage back to idle however the build ends.
struct IdleOnDrop<'a>(&'a BuildProgress);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set_stage(BuildStage::Idle);
    }
}

/// Run a complete build on the current thread.
///
/// Source streams opened while staging are released before this returns,
/// on success, cancellation and failure alike.
pub fn run_build(
    engine: &mut dyn ImageEngine,
    entries: &[Arc<MediaEntry>],
    request: &BuildRequest,
    ctx: &BuildContext<'_>,
) -> BuildOutcome {
    let start = Instant::now();
    let _idle = IdleOnDrop(ctx.progress);
    let mut registry = StreamRegistry::new();

    let result = staging::stage_image(engine, entries, request, ctx, &mut registry).and_then(
        |mut image| {
            writer::write_image(&mut image.stream, &request.destination, &request.writer, ctx)
        },
    );

    let released = registry.release_all();

    let outcome = match result {
        Ok(bytes_written) => {
            let expected = ctx.progress.bytes_to_write();
            if bytes_written != expected {
                tracing::error!(
                    "Image size mismatch: wrote {} bytes, engine reported {}",
                    bytes_written,
                    expected
                );
            }
            debug_assert_eq!(bytes_written, expected);

            BuildOutcome::Success(BuildReport {
                destination: request.destination.clone(),
                files_staged: ctx.progress.files_staged(),
                bytes_written,
                released,
                elapsed: start.elapsed(),
            })
        }
        Err(BuildError::Canceled) => BuildOutcome::Canceled,
        Err(e) => BuildOutcome::Failed(e),
    };

    match &outcome {
        BuildOutcome::Success(report) => tracing::info!(
            "Build complete: {} files, {} bytes in {:.2}s",
            report.files_staged,
            report.bytes_written,
            report.elapsed.as_secs_f64()
        ),
        BuildOutcome::Canceled => tracing::info!("Build canceled"),
        BuildOutcome::Failed(e) => tracing::error!("Build failed: {}", e),
    }

    ctx.emit(BuildEvent::Finished);
    outcome
}

/// Run a build on a background thread.
pub fn spawn_build(
    engine: Box<dyn ImageEngine>,
    entries: Vec<Arc<MediaEntry>>,
    request: BuildRequest,
    progress: Arc<BuildProgress>,
    cancel: CancelToken,
) -> BuildHandle {
    spawn_guarded(engine, entries, request, progress, cancel, ())
}

/// Like [`spawn_build`], dropping `guard` on the worker once the build is over.
pub(crate) fn spawn_guarded<G: Send + 'static>(
    mut engine: Box<dyn ImageEngine>,
    entries: Vec<Arc<MediaEntry>>,
    request: BuildRequest,
    progress: Arc<BuildProgress>,
    cancel: CancelToken,
    guard: G,
) -> BuildHandle {
    let (tx, rx) = mpsc::channel();

    let worker_progress = Arc::clone(&progress);
    let worker_cancel = cancel.clone();
    let join = std::thread::spawn(move || {
        let _guard = guard;
        let ctx = BuildContext::new(&worker_progress, &worker_cancel, Some(&tx));
        run_build(engine.as_mut(), &entries, &request, &ctx)
    });

    BuildHandle {
        join: Some(join),
        events: rx,
        progress,
        cancel,
    }
}

/// Handle on a background build.
pub struct BuildHandle {
    join: Option<JoinHandle<BuildOutcome>>,
    events: mpsc::Receiver<BuildEvent>,
    progress: Arc<BuildProgress>,
    cancel: CancelToken,
}

impl BuildHandle {
    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Drain pending events without blocking.
    pub fn poll_events(&self) -> Vec<BuildEvent> {
        self.events.try_iter().collect()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |j| j.is_finished())
    }

    /// The outcome once the worker is done, `None` while it runs or after it was taken.
    pub fn try_outcome(&mut self) -> Option<BuildOutcome> {
        if !self.join.as_ref()?.is_finished() {
            return None;
        }
        self.join.take().map(join_outcome)
    }

    /// Block until the build ends.
    pub fn wait(mut self) -> BuildOutcome {
        match self.join.take() {
            Some(join) => join_outcome(join),
            None => BuildOutcome::Failed(BuildError::Worker(
                "build outcome already taken".to_string(),
            )),
        }
    }
}

fn join_outcome(join: JoinHandle<BuildOutcome>) -> BuildOutcome {
    join.join().unwrap_or_else(|_| {
        tracing::error!("Build worker panicked");
        BuildOutcome::Failed(BuildError::Worker("build worker panicked".to_string()))
    })
}
