use std::path::{Path, PathBuf};

use compact_str::CompactString;

use crate::engine::{Emulation, FormatRevision, ImageOptions, Platform};

/// File name of the BIOS boot sector image in a boot folder.
pub const BIOS_BOOT_FILE: &str = "etfsboot.com";
/// File name of the UEFI boot image in a boot folder.
pub const UEFI_BOOT_FILE: &str = "efisys.bin";
/// Manufacturer id written into every boot catalog entry.
pub const BOOT_MANUFACTURER: &str = "IsoForge";

/// A boot image to attach to the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootImageSpec {
    pub platform: Platform,
    pub path: PathBuf,
    pub emulation: Emulation,
}

impl BootImageSpec {
    pub fn new(platform: Platform, path: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            path: path.into(),
            emulation: Emulation::None,
        }
    }

    pub fn bios(path: impl Into<PathBuf>) -> Self {
        Self::new(Platform::BiosX86, path)
    }

    pub fn uefi(path: impl Into<PathBuf>) -> Self {
        Self::new(Platform::Uefi, path)
    }

    /// Look for the well-known boot image names in `folder`.
    pub fn discover(folder: impl AsRef<Path>) -> BootDiscovery {
        let folder = folder.as_ref();
        let find = |name: &str| {
            let path = folder.join(name);
            path.is_file().then_some(path)
        };

        let discovery = BootDiscovery {
            bios: find(BIOS_BOOT_FILE).map(BootImageSpec::bios),
            uefi: find(UEFI_BOOT_FILE).map(BootImageSpec::uefi),
        };

        for platform in discovery.missing() {
            tracing::warn!(
                "No {} boot image found in {}",
                platform.label(),
                folder.display()
            );
        }
        discovery
    }
}

/// Boot images found in a boot folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootDiscovery {
    pub bios: Option<BootImageSpec>,
    pub uefi: Option<BootImageSpec>,
}

impl BootDiscovery {
    pub fn is_empty(&self) -> bool {
        self.bios.is_none() && self.uefi.is_none()
    }

    /// Platforms without a boot image.
    pub fn missing(&self) -> Vec<Platform> {
        let mut missing = Vec::new();
        if self.bios.is_none() {
            missing.push(Platform::BiosX86);
        }
        if self.uefi.is_none() {
            missing.push(Platform::Uefi);
        }
        missing
    }

    /// Found specs, BIOS first.
    pub fn into_specs(self) -> Vec<BootImageSpec> {
        self.bios.into_iter().chain(self.uefi).collect()
    }
}

/// Image options for a build.
///
/// Any boot image forces [`FormatRevision::BOOTABLE`]. A blank volume name
/// leaves the engine default.
pub fn image_options(volume_name: Option<&str>, boot_specs: &[BootImageSpec]) -> ImageOptions {
    let mut options = ImageOptions::default();

    if let Some(name) = volume_name.map(str::trim).filter(|n| !n.is_empty()) {
        options.volume_name = Some(CompactString::new(name));
    }

    if !boot_specs.is_empty() {
        options.revision = FormatRevision::BOOTABLE;
    }
    options
}

pub(crate) fn manufacturer() -> CompactString {
    CompactString::const_new(BOOT_MANUFACTURER)
}
