//! Release of source handles the image engine leaves open.
//!
//! The engine only closes the streams of small files itself. Every stream the
//! build opens is registered here and closed once the build is over, whatever
//! the outcome; otherwise the source files stay locked until the process exits.

use crate::engine::SourceStream;

/// Counts from one [`StreamRegistry::release_all`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseSummary {
    /// Streams this pass closed
    pub closed: usize,
    /// Streams the engine had already closed
    pub already_closed: usize,
    /// Streams that could not be closed (logged, never returned)
    pub failed: usize,
}

/// Streams opened during staging that the build must close itself.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: Vec<SourceStream>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stream: &SourceStream) {
        self.streams.push(stream.clone());
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Close every registered stream and empty the registry. Never fails.
    pub fn release_all(&mut self) -> ReleaseSummary {
        let mut summary = ReleaseSummary::default();

        for stream in self.streams.drain(..) {
            match stream.close() {
                Ok(true) => summary.closed += 1,
                Ok(false) => summary.already_closed += 1,
                Err(e) => {
                    tracing::warn!("Failed to close {}: {}", stream.path().display(), e);
                    summary.failed += 1;
                }
            }
        }

        tracing::debug!(
            "Released source streams: {} closed, {} already closed, {} failed",
            summary.closed,
            summary.already_closed,
            summary.failed
        );
        summary
    }
}

impl Drop for StreamRegistry {
    fn drop(&mut self) {
        if !self.streams.is_empty() {
            self.release_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn open(dir: &std::path::Path, name: &str) -> SourceStream {
        let path = dir.join(name);
        fs::write(&path, b"payload").unwrap();
        SourceStream::open(path).unwrap()
    }

    #[test]
    fn closes_everything_once() {
        let dir = tempfile::tempdir().unwrap();
        let a = open(dir.path(), "a");
        let b = open(dir.path(), "b");
        let c = open(dir.path(), "c");
        c.close().unwrap();

        let mut registry = StreamRegistry::new();
        registry.register(&a);
        registry.register(&b);
        registry.register(&c);
        assert_eq!(registry.len(), 3);

        let summary = registry.release_all();
        assert_eq!(
            summary,
            ReleaseSummary {
                closed: 2,
                already_closed: 1,
                failed: 0,
            }
        );
        assert!(!a.is_open() && !b.is_open());
        assert!(registry.is_empty());
        assert_eq!(registry.release_all(), ReleaseSummary::default());
    }

    #[test]
    fn drop_releases_pending_streams() {
        let dir = tempfile::tempdir().unwrap();
        let a = open(dir.path(), "a");
        {
            let mut registry = StreamRegistry::new();
            registry.register(&a);
        }
        assert!(!a.is_open());
    }
}
