use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{BuildError, BuildResult};

use super::BuildContext;

/// Default copy buffer size.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Writer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterConfig {
    pub chunk_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Stream `image` into a freshly created `destination`.
///
/// Cancellation is checked before every read; a canceled or failed write
/// leaves the partial file in place. Returns the number of bytes written.
pub fn write_image(
    image: &mut dyn Read,
    destination: &Path,
    config: &WriterConfig,
    ctx: &BuildContext<'_>,
) -> BuildResult<u64> {
    let mut out = File::create(destination).map_err(BuildError::WriteFailed)?;
    let mut buf = vec![0u8; config.chunk_size.max(1)];
    let mut written = 0u64;

    tracing::info!("Writing image to {}", destination.display());

    loop {
        if ctx.cancel.is_canceled() {
            tracing::info!(
                "Write canceled after {} bytes: {}",
                written,
                destination.display()
            );
            return Err(BuildError::Canceled);
        }

        let n = match image.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(BuildError::WriteFailed(e)),
        };

        out.write_all(&buf[..n]).map_err(BuildError::WriteFailed)?;
        written = ctx.progress.add_written(n as u64);
    }

    out.flush().map_err(BuildError::WriteFailed)?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::{self, Cursor};
    use std::sync::Arc;

    use super::*;
    use crate::build::progress::{BuildProgress, CancelToken};

    /// Yields zeros and cancels the token once `cancel_after` bytes were read.
    struct CancelingReader {
        remaining: u64,
        read: u64,
        cancel_after: u64,
        token: CancelToken,
    }

    impl Read for CancelingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = (buf.len() as u64).min(self.remaining) as usize;
            buf[..n].fill(0);
            self.remaining -= n as u64;
            self.read += n as u64;
            if self.read >= self.cancel_after {
                self.token.cancel();
            }
            Ok(n)
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "source went away"))
        }
    }

    #[test]
    fn copies_everything_and_counts_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.iso");
        let progress = Arc::new(BuildProgress::new());
        let cancel = CancelToken::new();
        let ctx = BuildContext::new(&progress, &cancel, None);

        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        progress.begin_writing(data.len() as u64);
        let config = WriterConfig { chunk_size: 4096 };

        let written = write_image(&mut Cursor::new(data.clone()), &dest, &config, &ctx).unwrap();
        assert_eq!(written, 10_000);
        assert_eq!(progress.bytes_written(), progress.bytes_to_write());
        assert_eq!(fs::read(&dest).unwrap(), data);
    }

    #[test]
    fn cancel_stops_before_next_read() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.iso");
        let progress = Arc::new(BuildProgress::new());
        let cancel = CancelToken::new();
        let ctx = BuildContext::new(&progress, &cancel, None);

        let mib = 1024 * 1024;
        let mut source = CancelingReader {
            remaining: 10 * mib,
            read: 0,
            cancel_after: 2 * mib,
            token: cancel.clone(),
        };
        progress.begin_writing(10 * mib);

        let err = write_image(&mut source, &dest, &WriterConfig::default(), &ctx).unwrap_err();
        assert!(matches!(err, BuildError::Canceled));
        assert_eq!(progress.bytes_written(), 2 * mib);
        // Partial output stays behind
        assert_eq!(fs::metadata(&dest).unwrap().len(), 2 * mib);
    }

    #[test]
    fn read_errors_are_write_failures() {
        let dir = tempfile::tempdir().unwrap();
        let progress = Arc::new(BuildProgress::new());
        let cancel = CancelToken::new();
        let ctx = BuildContext::new(&progress, &cancel, None);

        let err = write_image(
            &mut FailingReader,
            &dir.path().join("out.iso"),
            &WriterConfig::default(),
            &ctx,
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::WriteFailed(_)));
    }

    #[test]
    fn unwritable_destination_fails() {
        let dir = tempfile::tempdir().unwrap();
        let progress = Arc::new(BuildProgress::new());
        let cancel = CancelToken::new();
        let ctx = BuildContext::new(&progress, &cancel, None);

        let dest = dir.path().join("missing").join("out.iso");
        let err = write_image(&mut Cursor::new(vec![1u8; 16]), &dest, &WriterConfig::default(), &ctx)
            .unwrap_err();
        assert!(matches!(err, BuildError::WriteFailed(_)));
    }
}
