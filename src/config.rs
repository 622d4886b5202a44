//! Project manifests: a YAML description of an image to build.
//!
//! ```yaml
//! volume_name: INSTALL
//! output: install.iso
//! sources:
//!   - setup.exe
//!   - sources
//! boot_folder: boot
//! ```
//!
//! Relative paths are resolved against the manifest's directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::build::{BootImageSpec, BuildRequest};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectManifest {
    pub volume_name: Option<String>,
    pub output: Option<PathBuf>,
    /// Files and folders, added as roots in this order
    pub sources: Vec<PathBuf>,
    /// Folder searched for `etfsboot.com` and `efisys.bin`
    pub boot_folder: Option<PathBuf>,
    /// Explicit BIOS boot image, wins over the boot folder
    pub bios_image: Option<PathBuf>,
    /// Explicit UEFI boot image, wins over the boot folder
    pub uefi_image: Option<PathBuf>,
}

impl ProjectManifest {
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!("Loading manifest from {}", path.display());

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let mut manifest: ProjectManifest = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))?;

        if let Some(base) = path.parent() {
            manifest.resolve_relative(base);
        }
        Ok(manifest)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let yaml = serde_yaml::to_string(self).context("Failed to serialize manifest")?;
        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write manifest {}", path.display()))?;
        tracing::info!("Saved manifest to {}", path.display());
        Ok(())
    }

    fn resolve_relative(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.sources.iter_mut().for_each(resolve);
        self.output.iter_mut().for_each(resolve);
        self.boot_folder.iter_mut().for_each(resolve);
        self.bios_image.iter_mut().for_each(resolve);
        self.uefi_image.iter_mut().for_each(resolve);
    }

    /// Layer `overrides` on top: its settings win, its sources come after ours.
    pub fn merge(mut self, overrides: ProjectManifest) -> Self {
        self.sources.extend(overrides.sources);
        self.volume_name = overrides.volume_name.or(self.volume_name);
        self.output = overrides.output.or(self.output);
        self.boot_folder = overrides.boot_folder.or(self.boot_folder);
        self.bios_image = overrides.bios_image.or(self.bios_image);
        self.uefi_image = overrides.uefi_image.or(self.uefi_image);
        self
    }

    /// Boot images to attach: explicit images first, then the boot folder fills the gaps.
    pub fn boot_specs(&self) -> Vec<BootImageSpec> {
        let mut found = self
            .boot_folder
            .as_deref()
            .map(BootImageSpec::discover)
            .unwrap_or_default();

        if let Some(path) = &self.bios_image {
            found.bios = Some(BootImageSpec::bios(path));
        }
        if let Some(path) = &self.uefi_image {
            found.uefi = Some(BootImageSpec::uefi(path));
        }
        found.into_specs()
    }

    /// The build request for this manifest, `None` without an output path.
    pub fn build_request(&self) -> Option<BuildRequest> {
        let output = self.output.as_ref()?;
        let mut request = BuildRequest::new(output).with_boot_specs(self.boot_specs());
        request.volume_name = self.volume_name.clone();
        Some(request)
    }
}
