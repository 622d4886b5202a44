//! Seam to the disc-image construction engine.
//!
//! The build pipeline only talks to [`ImageEngine`]. [`sector::SectorImageEngine`]
//! is the in-process implementation used by the command line tool.

pub mod sector;
pub mod stream;

use std::io::{self, Read};
use std::path::Path;

use compact_str::CompactString;

pub use self::stream::SourceStream;

/// Filesystem written into the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileSystem {
    #[default]
    Udf,
}

impl FileSystem {
    pub fn code(self) -> u8 {
        match self {
            FileSystem::Udf => 0x04,
        }
    }
}

/// Revision of the target filesystem.
///
/// Boot images only work with the older revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatRevision {
    /// UDF 2.50
    #[default]
    Udf250,
    /// UDF 1.50
    Udf150,
}

impl FormatRevision {
    /// Revision used when no boot image is attached
    pub const DEFAULT: FormatRevision = FormatRevision::Udf250;
    /// Revision required as soon as any boot image is attached
    pub const BOOTABLE: FormatRevision = FormatRevision::Udf150;

    pub fn code(self) -> u16 {
        match self {
            FormatRevision::Udf250 => 0x250,
            FormatRevision::Udf150 => 0x150,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x250 => Some(FormatRevision::Udf250),
            0x150 => Some(FormatRevision::Udf150),
            _ => None,
        }
    }
}

/// Firmware a boot image targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    BiosX86,
    Uefi,
}

impl Platform {
    /// El Torito platform id
    pub fn code(self) -> u8 {
        match self {
            Platform::BiosX86 => 0x00,
            Platform::Uefi => 0xEF,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Platform::BiosX86 => "BIOS",
            Platform::Uefi => "UEFI",
        }
    }
}

/// Boot media emulation. Only no-emulation boot is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Emulation {
    #[default]
    None,
}

/// A boot image handed to the engine.
#[derive(Debug, Clone)]
pub struct BootImage {
    pub platform: Platform,
    pub emulation: Emulation,
    pub manufacturer: CompactString,
    pub data: SourceStream,
}

/// Image-wide settings applied before any content is added.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageOptions {
    pub file_system: FileSystem,
    pub revision: FormatRevision,
    pub volume_name: Option<CompactString>,
}

/// Progress of one item while the engine lays out the image.
#[derive(Debug, Clone, Copy)]
pub struct ItemProgress<'a> {
    /// Path of the item inside the image
    pub current_item: &'a str,
    pub sectors_copied: u64,
    pub sectors_total: u64,
}

impl ItemProgress<'_> {
    /// The final report for an item.
    pub fn is_complete(&self) -> bool {
        self.sectors_copied == self.sectors_total
    }
}

/// Callback the engine invokes with per-item progress.
pub type ProgressHandler = Box<dyn FnMut(&ItemProgress<'_>) + Send>;

/// The finished image as a byte stream.
pub struct ResultImage {
    pub stream: Box<dyn Read + Send>,
    /// Exact number of bytes `stream` yields
    pub total_bytes: u64,
}

/// A disc-image construction engine.
///
/// Files added with [`ImageEngine::add_file`] may keep the given stream open
/// after the image is produced; callers are responsible for closing them.
pub trait ImageEngine: Send {
    /// Apply filesystem type, revision and volume name.
    fn configure(&mut self, options: &ImageOptions);

    /// Attach boot images. Requires [`FormatRevision::BOOTABLE`].
    fn set_boot_images(&mut self, images: Vec<BootImage>);

    fn set_progress_handler(&mut self, handler: ProgressHandler);

    /// Add a single file at `image_path` (relative, `/` separated) reading from `data`.
    fn add_file(&mut self, image_path: &str, data: SourceStream) -> io::Result<()>;

    /// Add the directory tree at `source_dir`, walking it with the engine's own listing.
    /// With `include_base` the directory itself becomes a folder at the image root.
    fn add_tree(&mut self, source_dir: &Path, include_base: bool) -> io::Result<()>;

    /// Lay out everything added so far and return the image stream.
    fn create_result_image(&mut self) -> io::Result<ResultImage>;
}

/// Join an image-relative base path and a leaf name with `/`.
pub fn join_image_path(base: &str, name: &str) -> String {
    let base = base.trim_matches('/');
    if base.is_empty() {
        name.trim_start_matches('/').to_string()
    } else {
        format!("{}/{}", base, name.trim_start_matches('/'))
    }
}
