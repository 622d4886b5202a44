use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use isoforge_rs::build::{BuildEvent, BuildOutcome, BuildStage, CancelToken};
use isoforge_rs::config::ProjectManifest;
use isoforge_rs::engine::sector::SectorImageEngine;
use isoforge_rs::format::readable_bytes;
use isoforge_rs::project::IsoProject;

/// Assemble a disc image from files and folders.
#[derive(Parser, Debug)]
#[command(name = "IsoForge-rs", version, about)]
struct Cli {
    /// Files and folders to put on the disc, in order
    sources: Vec<PathBuf>,

    /// Destination image file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Volume label
    #[arg(long)]
    volume: Option<String>,

    /// Folder holding etfsboot.com and/or efisys.bin
    #[arg(long)]
    boot_folder: Option<PathBuf>,

    #[arg(long)]
    bios_image: Option<PathBuf>,

    #[arg(long)]
    uefi_image: Option<PathBuf>,

    /// YAML project manifest; command line values override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective manifest here and exit
    #[arg(long)]
    save_manifest: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> ProjectManifest {
        ProjectManifest {
            volume_name: self.volume.clone(),
            output: self.output.clone(),
            sources: self.sources.clone(),
            boot_folder: self.boot_folder.clone(),
            bios_image: self.bios_image.clone(),
            uefi_image: self.uefi_image.clone(),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("isoforge_rs=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let base = match &cli.config {
        Some(path) => ProjectManifest::load(path)?,
        None => ProjectManifest::default(),
    };
    let manifest = base.merge(cli.overrides());

    if let Some(path) = &cli.save_manifest {
        manifest.save(path)?;
        return Ok(());
    }

    let mut project = IsoProject::new();
    let report = project.add_paths(&manifest.sources)?;
    for path in &report.duplicates {
        println!("Skipped duplicate: {}", path.display());
    }
    for (path, err) in &report.failures {
        println!("Skipped {}: {}", path.display(), err);
    }

    let collection = project.collection();
    println!("Media list:");
    for entry in collection.sorted_for_display() {
        println!(
            "  {:<9} {:>10}  {}",
            entry.entry_type(),
            readable_bytes(entry.size_on_disc()),
            entry.display_name()
        );
    }
    println!(
        "Total: {} files, {} on disc",
        collection.total_file_count(),
        readable_bytes(collection.total_size_on_disc())
    );

    let request = manifest
        .build_request()
        .context("No output image given (use --output or `output:` in the manifest)")?;

    let cancel = CancelToken::new();
    let mut handle = project.start_build(
        request,
        Box::new(SectorImageEngine::new()),
        cancel.clone(),
    )?;

    // Enter on stdin cancels the build
    std::thread::spawn(move || {
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_ok() && !line.is_empty() {
            cancel.cancel();
        }
    });
    println!("Building... press Enter to cancel");

    let outcome = loop {
        for event in handle.poll_events() {
            match event {
                BuildEvent::StageChanged(BuildStage::Writing) => {
                    let p = handle.progress();
                    println!(
                        "Staged {} files, writing {}",
                        p.files_staged,
                        readable_bytes(p.bytes_to_write)
                    );
                }
                BuildEvent::ItemStaged { item, .. } => tracing::debug!("Staged {}", item),
                _ => {}
            }
        }

        if let Some(outcome) = handle.try_outcome() {
            break outcome;
        }

        let p = handle.progress();
        if p.stage == BuildStage::Writing {
            print!(
                "\r  {} / {} ({:.0}%)",
                readable_bytes(p.bytes_written),
                readable_bytes(p.bytes_to_write),
                p.write_fraction() * 100.0
            );
            let _ = std::io::Write::flush(&mut std::io::stdout());
        }
        std::thread::sleep(Duration::from_millis(200));
    };
    println!();

    match outcome {
        BuildOutcome::Success(report) => {
            println!(
                "Wrote {} ({}) in {:.1}s",
                report.destination.display(),
                readable_bytes(report.bytes_written),
                report.elapsed.as_secs_f64()
            );
            Ok(())
        }
        BuildOutcome::Canceled => {
            println!("Canceled; the partial image was left in place");
            std::process::exit(130);
        }
        BuildOutcome::Failed(e) => Err(e.into()),
    }
}
