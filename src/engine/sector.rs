//! In-process image engine that lays content out on 2048-byte sectors.
//!
//! Image layout:
//! - sector 0: descriptor (magic, filesystem, revision, counts, volume name)
//! - table sectors: one record per boot image, directory and file
//! - data: boot images, then file contents, each padded to a sector boundary
//!
//! Like the platform engine it stands in for, files smaller than
//! [`AUTO_CLOSE_THRESHOLD`] are buffered and their caller stream closed at once,
//! while larger files keep reading from the caller stream, which stays open.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use compact_str::CompactString;

use super::{
    join_image_path, BootImage, ImageEngine, ImageOptions, ItemProgress, ProgressHandler,
    ResultImage, SourceStream,
};
use crate::media::walk::{is_dangling_link, source_walker};
use crate::media::{display_name_of, SECTOR_SIZE};

/// Caller streams for files below this size are closed by the engine itself.
pub const AUTO_CLOSE_THRESHOLD: u64 = 128 * 1024;

pub const MAGIC: &[u8; 8] = b"ISOFORGE";

/// Longest volume name stored in the descriptor.
pub const MAX_VOLUME_NAME: usize = 32;

const RECORD_FILE: u8 = 0;
const RECORD_DIR: u8 = 1;
const RECORD_BOOT: u8 = 2;

/// Fixed bytes per table record, excluding the name.
const RECORD_FIXED_LEN: usize = 1 + 1 + 2 + 4 + 8;

enum Content {
    Buffered(Vec<u8>),
    /// Caller stream, left open after the image is read
    Stream(SourceStream),
    /// File found by the engine's own tree walk, opened when the image reaches it
    Source(PathBuf),
}

struct StagedItem {
    image_path: String,
    length: u64,
    /// None for directories
    content: Option<Content>,
}

/// Reference [`ImageEngine`] producing a flat sector image.
#[derive(Default)]
pub struct SectorImageEngine {
    options: ImageOptions,
    boot_images: Vec<BootImage>,
    items: Vec<StagedItem>,
    progress: Option<ProgressHandler>,
}

impl SectorImageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(&self) -> &ImageOptions {
        &self.options
    }

    /// Image paths staged so far, in insertion order.
    pub fn staged_paths(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.image_path.as_str()).collect()
    }

    fn push_dir(&mut self, image_path: String) {
        if self.items.iter().any(|i| i.image_path == image_path) {
            return;
        }
        self.items.push(StagedItem {
            image_path,
            length: 0,
            content: None,
        });
    }

    fn report(&mut self, image_path: &str, sectors_total: u64) {
        let Some(handler) = self.progress.as_mut() else {
            return;
        };
        if sectors_total > 0 {
            handler(&ItemProgress {
                current_item: image_path,
                sectors_copied: 0,
                sectors_total,
            });
        }
        handler(&ItemProgress {
            current_item: image_path,
            sectors_copied: sectors_total,
            sectors_total,
        });
    }
}

impl ImageEngine for SectorImageEngine {
    fn configure(&mut self, options: &ImageOptions) {
        self.options = options.clone();
    }

    fn set_boot_images(&mut self, images: Vec<BootImage>) {
        self.boot_images = images;
    }

    fn set_progress_handler(&mut self, handler: ProgressHandler) {
        self.progress = Some(handler);
    }

    fn add_file(&mut self, image_path: &str, data: SourceStream) -> io::Result<()> {
        let image_path = join_image_path("", &image_path.replace('\\', "/"));

        let (length, content) = if data.len() < AUTO_CLOSE_THRESHOLD {
            let mut buf = Vec::with_capacity(data.len() as usize);
            data.clone().read_to_end(&mut buf)?;
            data.close()?;
            (buf.len() as u64, Content::Buffered(buf))
        } else {
            (data.len(), Content::Stream(data))
        };

        self.items.push(StagedItem {
            image_path,
            length,
            content: Some(content),
        });
        Ok(())
    }

    fn add_tree(&mut self, source_dir: &Path, include_base: bool) -> io::Result<()> {
        let base = if include_base {
            let name = display_name_of(source_dir).to_string();
            self.push_dir(name.clone());
            name
        } else {
            String::new()
        };

        for item in source_walker(source_dir) {
            let entry = match item {
                Ok(entry) => entry,
                Err(e) if e.path().is_some_and(is_dangling_link) => continue,
                Err(e) => return Err(io::Error::other(e.to_string())),
            };
            let path = entry.path();
            let rel = path.strip_prefix(source_dir).map_err(io::Error::other)?;
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let image_path = join_image_path(&base, &rel);

            if entry.file_type().is_dir() {
                self.push_dir(image_path);
                continue;
            }

            if is_dangling_link(&path) {
                continue;
            }
            let meta = fs::metadata(&path)?;
            if !meta.is_file() {
                continue;
            }
            self.items.push(StagedItem {
                image_path,
                length: meta.len(),
                content: Some(Content::Source(path)),
            });
        }
        Ok(())
    }

    fn create_result_image(&mut self) -> io::Result<ResultImage> {
        let boot_images = std::mem::take(&mut self.boot_images);
        let items = std::mem::take(&mut self.items);

        // Table size depends only on names, so start sectors can be assigned in one pass
        let boot_names: Vec<String> = boot_images
            .iter()
            .map(|b| format!("[BOOT]/{}", b.platform.label()))
            .collect();
        let table_len: usize = boot_names
            .iter()
            .map(String::as_str)
            .chain(items.iter().map(|i| i.image_path.as_str()))
            .map(|name| RECORD_FIXED_LEN + name.len())
            .sum();
        let table_sectors = (table_len as u64).div_ceil(SECTOR_SIZE);
        let entry_count = (boot_names.len() + items.len()) as u32;

        let mut next_sector = 1 + table_sectors;
        let mut table = Vec::with_capacity(table_len);
        let mut segments = VecDeque::new();

        for (boot, name) in boot_images.iter().zip(&boot_names) {
            let length = boot.data.len();
            write_record(&mut table, RECORD_BOOT, boot.platform.code(), name, next_sector, length);
            segments.push_back(Segment::new(Payload::Stream(boot.data.clone()), length));
            next_sector += length.div_ceil(SECTOR_SIZE);
        }

        for item in items {
            let Some(content) = item.content else {
                write_record(&mut table, RECORD_DIR, 0, &item.image_path, 0, 0);
                continue;
            };

            let sectors = item.length.div_ceil(SECTOR_SIZE);
            write_record(
                &mut table,
                RECORD_FILE,
                0,
                &item.image_path,
                next_sector,
                item.length,
            );
            self.report(&item.image_path, sectors);

            let payload = match content {
                Content::Buffered(buf) => Payload::Buffered(Cursor::new(buf)),
                Content::Stream(stream) => Payload::Stream(stream),
                Content::Source(path) => Payload::Lazy(path),
            };
            segments.push_back(Segment::new(payload, item.length));
            next_sector += sectors;
        }

        let total_sectors = next_sector;
        let mut header = encode_descriptor(
            &self.options,
            boot_images.len() as u8,
            entry_count,
            table_sectors as u32,
            total_sectors,
        );
        header.extend_from_slice(&table);
        let header_len = header.len() as u64;
        segments.push_front(Segment::new(Payload::Buffered(Cursor::new(header)), header_len));

        tracing::info!(
            "Image laid out: {} sectors ({} table, {} boot images)",
            total_sectors,
            table_sectors,
            boot_images.len()
        );

        Ok(ResultImage {
            stream: Box::new(ImageStream { segments }),
            total_bytes: total_sectors * SECTOR_SIZE,
        })
    }
}

fn write_record(table: &mut Vec<u8>, kind: u8, platform: u8, name: &str, sector: u64, length: u64) {
    table.push(kind);
    table.push(platform);
    table.extend_from_slice(&(name.len() as u16).to_le_bytes());
    table.extend_from_slice(&(sector as u32).to_le_bytes());
    table.extend_from_slice(&length.to_le_bytes());
    table.extend_from_slice(name.as_bytes());
}

fn encode_descriptor(
    options: &ImageOptions,
    boot_count: u8,
    entry_count: u32,
    table_sectors: u32,
    total_sectors: u64,
) -> Vec<u8> {
    let mut sector = Vec::with_capacity(SECTOR_SIZE as usize);
    sector.extend_from_slice(MAGIC);
    sector.push(options.file_system.code());
    sector.extend_from_slice(&options.revision.code().to_le_bytes());
    sector.push(boot_count);
    sector.extend_from_slice(&entry_count.to_le_bytes());
    sector.extend_from_slice(&table_sectors.to_le_bytes());
    sector.extend_from_slice(&total_sectors.to_le_bytes());

    let name = options.volume_name.as_deref().unwrap_or("");
    let name = truncate_utf8(name, MAX_VOLUME_NAME);
    sector.push(name.len() as u8);
    sector.extend_from_slice(name.as_bytes());

    sector.resize(SECTOR_SIZE as usize, 0);
    sector
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Fields of the descriptor sector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub file_system: u8,
    pub revision: u16,
    pub boot_count: u8,
    pub entry_count: u32,
    pub table_sectors: u32,
    pub total_sectors: u64,
    pub volume_name: CompactString,
}

impl ImageDescriptor {
    /// Parse the first sector of an image. Returns `None` if it is not one of ours.
    pub fn parse(sector: &[u8]) -> Option<Self> {
        if sector.len() < 29 || &sector[..8] != MAGIC {
            return None;
        }
        let name_len = sector[28] as usize;
        let name = sector.get(29..29 + name_len)?;

        Some(Self {
            file_system: sector[8],
            revision: u16::from_le_bytes([sector[9], sector[10]]),
            boot_count: sector[11],
            entry_count: u32::from_le_bytes(sector[12..16].try_into().ok()?),
            table_sectors: u32::from_le_bytes(sector[16..20].try_into().ok()?),
            total_sectors: u64::from_le_bytes(sector[20..28].try_into().ok()?),
            volume_name: CompactString::new(String::from_utf8_lossy(name)),
        })
    }
}

enum Payload {
    Buffered(Cursor<Vec<u8>>),
    Stream(SourceStream),
    Lazy(PathBuf),
    Open(File),
}

impl Payload {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Payload::Lazy(path) = self {
            *self = Payload::Open(File::open(&*path)?);
        }
        match self {
            Payload::Buffered(cursor) => cursor.read(buf),
            Payload::Stream(stream) => stream.read(buf),
            Payload::Open(file) => file.read(buf),
            Payload::Lazy(_) => Ok(0),
        }
    }
}

/// One sector-aligned region of the image.
struct Segment {
    payload: Payload,
    remaining: u64,
    padding: u64,
}

impl Segment {
    fn new(payload: Payload, length: u64) -> Self {
        let padded = length.div_ceil(SECTOR_SIZE) * SECTOR_SIZE;
        Self {
            payload,
            remaining: length,
            padding: padded - length,
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining > 0 {
            let want = buf.len().min(self.remaining as usize);
            let n = self.payload.read(&mut buf[..want])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "source file is shorter than when it was staged",
                ));
            }
            self.remaining -= n as u64;
            return Ok(n);
        }

        let n = buf.len().min(self.padding as usize);
        buf[..n].fill(0);
        self.padding -= n as u64;
        Ok(n)
    }
}

/// Sequential reader over the laid out image.
struct ImageStream {
    segments: VecDeque<Segment>,
}

impl Read for ImageStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let Some(segment) = self.segments.front_mut() else {
                break;
            };
            match segment.read(&mut buf[filled..])? {
                0 => {
                    // Dropping the segment closes files the engine opened itself
                    self.segments.pop_front();
                }
                n => filled += n,
            }
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::engine::{Emulation, FormatRevision, Platform};

    fn read_all(image: ResultImage) -> Vec<u8> {
        let mut out = Vec::new();
        let mut stream = image.stream;
        stream.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn small_streams_are_closed_large_ones_stay_open() {
        let dir = tempfile::tempdir().unwrap();
        let small_path = dir.path().join("small.txt");
        let large_path = dir.path().join("large.bin");
        fs::write(&small_path, vec![7u8; 1000]).unwrap();
        fs::write(&large_path, vec![9u8; 200 * 1024]).unwrap();

        let small = SourceStream::open(&small_path).unwrap();
        let large = SourceStream::open(&large_path).unwrap();

        let mut engine = SectorImageEngine::new();
        engine.add_file("small.txt", small.clone()).unwrap();
        engine.add_file("large.bin", large.clone()).unwrap();

        assert!(!small.is_open());
        assert!(large.is_open());

        let image = engine.create_result_image().unwrap();
        let bytes = read_all(image);
        assert!(large.is_open());
        assert!(bytes.len() as u64 % SECTOR_SIZE == 0);
    }

    #[test]
    fn image_size_matches_stream_and_layout() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        fs::write(&a, vec![0xAB; 5000]).unwrap();

        let mut engine = SectorImageEngine::new();
        engine.configure(&ImageOptions {
            volume_name: Some(CompactString::new("BACKUP_2024")),
            ..ImageOptions::default()
        });
        engine.add_file("a.bin", SourceStream::open(&a).unwrap()).unwrap();

        let image = engine.create_result_image().unwrap();
        let total = image.total_bytes;
        let bytes = read_all(image);
        assert_eq!(bytes.len() as u64, total);

        let descriptor = ImageDescriptor::parse(&bytes[..SECTOR_SIZE as usize]).unwrap();
        assert_eq!(descriptor.revision, FormatRevision::DEFAULT.code());
        assert_eq!(descriptor.volume_name.as_str(), "BACKUP_2024");
        assert_eq!(descriptor.entry_count, 1);
        assert_eq!(descriptor.boot_count, 0);
        // descriptor + one table sector + three data sectors
        assert_eq!(descriptor.total_sectors, 1 + 1 + 3);
        assert_eq!(total, 5 * SECTOR_SIZE);

        let data_start = 2 * SECTOR_SIZE as usize;
        assert!(bytes[data_start..data_start + 5000].iter().all(|&b| b == 0xAB));
        assert!(bytes[data_start + 5000..].iter().all(|&b| b == 0));
    }

    #[test]
    fn add_tree_walks_with_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("photos");
        fs::create_dir_all(root.join("2023")).unwrap();
        fs::write(root.join("2023/beach.jpg"), vec![1u8; 10]).unwrap();
        fs::write(root.join("cover.png"), vec![2u8; 10]).unwrap();

        let mut engine = SectorImageEngine::new();
        engine.add_tree(&root, true).unwrap();

        let mut paths = engine.staged_paths();
        paths.sort();
        assert_eq!(
            paths,
            ["photos", "photos/2023", "photos/2023/beach.jpg", "photos/cover.png"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn add_tree_follows_linked_directories() {
        let dir = tempfile::tempdir().unwrap();
        let other = dir.path().join("other");
        let root = dir.path().join("set");
        fs::create_dir_all(&other).unwrap();
        fs::create_dir_all(&root).unwrap();
        fs::write(other.join("x.bin"), vec![1u8; 10]).unwrap();
        fs::write(root.join("y.bin"), vec![2u8; 10]).unwrap();
        std::os::unix::fs::symlink(&other, root.join("linked")).unwrap();

        let mut engine = SectorImageEngine::new();
        engine.add_tree(&root, true).unwrap();

        let mut paths = engine.staged_paths();
        paths.sort();
        assert_eq!(paths, ["set", "set/linked", "set/linked/x.bin", "set/y.bin"]);
    }

    #[test]
    fn progress_reports_each_file_once_complete() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("set");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("empty"), b"").unwrap();
        fs::write(root.join("two_sectors"), vec![0u8; 4000]).unwrap();

        let completions = Arc::new(Mutex::new(Vec::new()));
        let sink = completions.clone();

        let mut engine = SectorImageEngine::new();
        engine.set_progress_handler(Box::new(move |p: &ItemProgress<'_>| {
            if p.is_complete() {
                sink.lock().unwrap().push((p.current_item.to_string(), p.sectors_total));
            }
        }));
        engine.add_tree(&root, true).unwrap();
        engine.create_result_image().unwrap();

        let mut seen = completions.lock().unwrap().clone();
        seen.sort();
        assert_eq!(
            seen,
            [("set/empty".to_string(), 0), ("set/two_sectors".to_string(), 2)]
        );
    }

    #[test]
    fn boot_images_come_first() {
        let dir = tempfile::tempdir().unwrap();
        let boot = dir.path().join("etfsboot.com");
        fs::write(&boot, vec![0xEE; 2048]).unwrap();

        let mut engine = SectorImageEngine::new();
        engine.configure(&ImageOptions {
            revision: FormatRevision::BOOTABLE,
            ..ImageOptions::default()
        });
        engine.set_boot_images(vec![BootImage {
            platform: Platform::BiosX86,
            emulation: Emulation::None,
            manufacturer: CompactString::new("IsoForge"),
            data: SourceStream::open(&boot).unwrap(),
        }]);

        let bytes = read_all(engine.create_result_image().unwrap());
        let descriptor = ImageDescriptor::parse(&bytes).unwrap();
        assert_eq!(descriptor.revision, 0x150);
        assert_eq!(descriptor.boot_count, 1);
        assert_eq!(descriptor.entry_count, 1);

        let data_start = 2 * SECTOR_SIZE as usize;
        assert!(bytes[data_start..data_start + 2048].iter().all(|&b| b == 0xEE));
    }

    #[test]
    fn shrunken_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("tree");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("f"), vec![1u8; 3000]).unwrap();

        let mut engine = SectorImageEngine::new();
        engine.add_tree(&root, false).unwrap();
        let image = engine.create_result_image().unwrap();
        fs::write(root.join("f"), vec![1u8; 10]).unwrap();

        let mut stream = image.stream;
        let mut out = Vec::new();
        let err = stream.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn descriptor_rejects_foreign_data() {
        assert!(ImageDescriptor::parse(&[0u8; 2048]).is_none());
        assert!(ImageDescriptor::parse(b"short").is_none());
    }
}
