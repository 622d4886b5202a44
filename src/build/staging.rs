//! Staging: hand every collection entry to the image engine.

use std::sync::Arc;

use crate::engine::{join_image_path, BootImage, ImageEngine, ItemProgress, ResultImage, SourceStream};
use crate::error::{BuildError, BuildResult};
use crate::media::MediaEntry;

use super::boot::{image_options, manufacturer, BootImageSpec};
use super::finalize::StreamRegistry;
use super::progress::{BuildEvent, BuildStage};
use super::{BuildContext, BuildRequest};

/// Configure `engine`, stage `entries` in order and produce the result image.
///
/// Every stream opened here is registered with `registry` before the engine
/// sees it, so the caller can release them whatever this returns. Cancellation
/// is checked before each top-level entry and once more before layout.
pub fn stage_image(
    engine: &mut dyn ImageEngine,
    entries: &[Arc<MediaEntry>],
    request: &BuildRequest,
    ctx: &BuildContext<'_>,
    registry: &mut StreamRegistry,
) -> BuildResult<ResultImage> {
    ctx.progress.begin_staging();
    ctx.emit(BuildEvent::StageChanged(BuildStage::Staging));

    let options = image_options(request.volume_name.as_deref(), &request.boot_specs);
    tracing::info!(
        "Staging {} entries (revision {:#x}, {} boot images)",
        entries.len(),
        options.revision.code(),
        request.boot_specs.len()
    );
    engine.configure(&options);

    if !request.boot_specs.is_empty() {
        let images = open_boot_images(&request.boot_specs, registry)?;
        engine.set_boot_images(images);
    }

    let progress = Arc::clone(ctx.progress);
    let events = ctx.events.cloned();
    engine.set_progress_handler(Box::new(move |item: &ItemProgress<'_>| {
        if !item.is_complete() {
            return;
        }
        let files_staged = progress.file_staged();
        tracing::trace!("Staged {} ({} sectors)", item.current_item, item.sectors_total);
        if let Some(tx) = &events {
            let _ = tx.send(BuildEvent::ItemStaged {
                item: item.current_item.to_string(),
                files_staged,
            });
        }
    }));

    for entry in entries {
        if ctx.cancel.is_canceled() {
            tracing::info!("Staging canceled before {}", entry.path().display());
            return Err(BuildError::Canceled);
        }
        stage_entry(engine, entry, "", registry)?;
    }

    if ctx.cancel.is_canceled() {
        return Err(BuildError::Canceled);
    }

    let image = engine.create_result_image().map_err(BuildError::Engine)?;
    ctx.progress.begin_writing(image.total_bytes);
    ctx.emit(BuildEvent::StageChanged(BuildStage::Writing));
    Ok(image)
}

fn open_boot_images(
    specs: &[BootImageSpec],
    registry: &mut StreamRegistry,
) -> BuildResult<Vec<BootImage>> {
    let mut images: Vec<BootImage> = Vec::with_capacity(specs.len());
    for spec in specs {
        if images.iter().any(|image| image.platform == spec.platform) {
            tracing::warn!(
                "Ignoring extra {} boot image {}",
                spec.platform.label(),
                spec.path.display()
            );
            continue;
        }
        let data = SourceStream::open(&spec.path).map_err(|e| BuildError::staging(&spec.path, e))?;
        registry.register(&data);
        tracing::info!(
            "Boot image ({}): {}",
            spec.platform.label(),
            spec.path.display()
        );
        images.push(BootImage {
            platform: spec.platform,
            emulation: spec.emulation,
            manufacturer: manufacturer(),
            data,
        });
    }
    Ok(images)
}

/// Files get a fresh stream at `base/name`; directories are walked by the engine.
fn stage_entry(
    engine: &mut dyn ImageEngine,
    entry: &MediaEntry,
    base: &str,
    registry: &mut StreamRegistry,
) -> BuildResult<()> {
    match entry {
        MediaEntry::File(file) => {
            let stream =
                SourceStream::open(file.path()).map_err(|e| BuildError::staging(file.path(), e))?;
            registry.register(&stream);
            engine
                .add_file(&join_image_path(base, file.display_name()), stream)
                .map_err(|e| BuildError::staging(file.path(), e))
        }
        MediaEntry::Directory(dir) => engine
            .add_tree(dir.path(), true)
            .map_err(|e| BuildError::staging(dir.path(), e)),
    }
}
