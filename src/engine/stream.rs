use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// A shared read handle on a source file that can be closed explicitly.
///
/// Clones share one underlying handle: the engine reads through its clone
/// while the build keeps another to close the handle when it is done.
#[derive(Clone)]
pub struct SourceStream {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    len: u64,
    file: Mutex<Option<File>>,
}

impl SourceStream {
    /// Open `path` for reading.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            inner: Arc::new(Inner {
                path: path.to_path_buf(),
                len,
                file: Mutex::new(Some(file)),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// File length when the stream was opened.
    pub fn len(&self) -> u64 {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    pub fn is_open(&self) -> bool {
        self.lock().map(|file| file.is_some()).unwrap_or(false)
    }

    /// Close the handle for every clone. Returns whether it was still open.
    pub fn close(&self) -> io::Result<bool> {
        let mut file = self.lock()?;
        Ok(file.take().is_some())
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, Option<File>>> {
        self.inner.file.lock().map_err(|_| {
            io::Error::other(format!(
                "stream lock poisoned for {}",
                self.inner.path.display()
            ))
        })
    }
}

impl Read for SourceStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self.lock()?;
        match file.as_mut() {
            Some(file) => file.read(buf),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("stream already closed: {}", self.inner.path.display()),
            )),
        }
    }
}

impl fmt::Debug for SourceStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceStream")
            .field("path", &self.inner.path)
            .field("len", &self.inner.len)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn clones_share_one_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, b"0123456789").unwrap();

        let stream = SourceStream::open(&path).unwrap();
        assert_eq!(stream.len(), 10);
        assert_eq!(stream.path(), path.as_path());

        let mut reader = stream.clone();
        let mut head = [0u8; 4];
        reader.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"0123");

        // The cursor is shared as well
        let mut rest = Vec::new();
        stream.clone().read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"456789");

        assert!(stream.close().unwrap());
        assert!(!reader.is_open());
        assert!(!stream.close().unwrap());
        assert!(reader.read(&mut head).is_err());
    }

    #[test]
    fn open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = SourceStream::open(dir.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
