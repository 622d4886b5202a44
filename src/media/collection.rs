use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;

use compact_str::CompactString;

use super::{display_name_of, EntryKind, MediaEntry};
use crate::error::{MediaError, MediaResult};

/// Change notification sent to every subscriber of a [`MediaCollection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionEvent {
    Added {
        name: CompactString,
        kind: EntryKind,
        file_count: u64,
        size_on_disc: u64,
    },
    Removed {
        name: CompactString,
        kind: EntryKind,
    },
}

/// Ordered set of top-level media entries.
///
/// Insertion order is canonical. Two roots of the same kind may not share a
/// display name; names deeper in a subtree are not checked. Totals are kept
/// up to date on every insert and remove instead of re-walking the roots.
#[derive(Default)]
pub struct MediaCollection {
    entries: Vec<Arc<MediaEntry>>,
    total_file_count: u64,
    total_size_on_disc: u64,
    subscribers: Vec<mpsc::Sender<CollectionEvent>>,
}

impl MediaCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Roots in insertion order.
    pub fn entries(&self) -> &[Arc<MediaEntry>] {
        &self.entries
    }

    pub fn total_file_count(&self) -> u64 {
        self.total_file_count
    }

    pub fn total_size_on_disc(&self) -> u64 {
        self.total_size_on_disc
    }

    /// Whether a root of `kind` already uses `name`.
    pub fn is_duplicate(&self, name: &str, kind: EntryKind) -> bool {
        self.entries
            .iter()
            .any(|e| e.kind() == kind && e.display_name() == name)
    }

    /// Add a single file as a new root.
    pub fn add_file(&mut self, path: impl AsRef<Path>) -> MediaResult<Arc<MediaEntry>> {
        let path = path.as_ref();
        self.check_duplicate(&display_name_of(path), EntryKind::File)?;
        self.insert(MediaEntry::file(path)?)
    }

    /// Expand a directory and add it as a new root.
    ///
    /// The duplicate check runs before the subtree is listed.
    pub fn add_directory(&mut self, path: impl AsRef<Path>) -> MediaResult<Arc<MediaEntry>> {
        let path = path.as_ref();
        self.check_duplicate(&display_name_of(path), EntryKind::Directory)?;
        self.insert(MediaEntry::directory(path)?)
    }

    /// Append an already built entry as a new root.
    pub fn insert(&mut self, entry: MediaEntry) -> MediaResult<Arc<MediaEntry>> {
        self.check_duplicate(entry.display_name(), entry.kind())?;

        let file_count = entry.file_count();
        let size_on_disc = entry.size_on_disc();
        let entry = Arc::new(entry);

        self.entries.push(entry.clone());
        self.total_file_count += file_count;
        self.total_size_on_disc += size_on_disc;

        tracing::debug!(
            "Added {} '{}' ({} files, {} bytes on disc)",
            entry.entry_type(),
            entry.display_name(),
            file_count,
            size_on_disc
        );

        self.notify(CollectionEvent::Added {
            name: CompactString::new(entry.display_name()),
            kind: entry.kind(),
            file_count,
            size_on_disc,
        });

        Ok(entry)
    }

    /// Remove the given roots. Entries that are not roots of this collection are ignored.
    ///
    /// Returns how many roots were removed.
    pub fn remove(&mut self, to_remove: &[Arc<MediaEntry>]) -> usize {
        let mut removed = Vec::new();
        self.entries.retain(|entry| {
            if to_remove.iter().any(|r| Arc::ptr_eq(r, entry)) {
                removed.push(entry.clone());
                false
            } else {
                true
            }
        });

        for entry in &removed {
            self.total_file_count -= entry.file_count();
            self.total_size_on_disc -= entry.size_on_disc();
            self.notify(CollectionEvent::Removed {
                name: CompactString::new(entry.display_name()),
                kind: entry.kind(),
            });
        }

        removed.len()
    }

    /// Cheap read-only view of the current roots, in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<MediaEntry>> {
        self.entries.clone()
    }

    /// Roots ordered for display: directories first, then by display name.
    pub fn sorted_for_display(&self) -> Vec<Arc<MediaEntry>> {
        let mut sorted = self.entries.clone();
        sorted.sort_by(|a, b| {
            a.kind()
                .cmp(&b.kind())
                .then_with(|| a.display_name().cmp(b.display_name()))
        });
        sorted
    }

    /// Receive an event for every later change to this collection.
    pub fn subscribe(&mut self) -> mpsc::Receiver<CollectionEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    fn check_duplicate(&self, name: &str, kind: EntryKind) -> MediaResult<()> {
        if self.is_duplicate(name, kind) {
            return Err(MediaError::Duplicate {
                name: CompactString::new(name),
                kind,
            });
        }
        Ok(())
    }

    fn notify(&mut self, event: CollectionEvent) {
        // Drop subscribers whose receiver is gone
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn file_of(dir: &Path, rel: &str, len: usize) -> std::path::PathBuf {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, vec![1u8; len]).unwrap();
        path
    }

    #[test]
    fn add_file_then_duplicate_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let first = file_of(tmp.path(), "a/setup.exe", 5000);
        let second = file_of(tmp.path(), "b/setup.exe", 100);

        let mut collection = MediaCollection::new();
        collection.add_file(&first).unwrap();
        assert_eq!(collection.total_size_on_disc(), 6144);
        assert_eq!(collection.total_file_count(), 1);

        let err = collection.add_file(&second).unwrap_err();
        assert!(matches!(
            err,
            MediaError::Duplicate { ref name, kind: EntryKind::File } if name.as_str() == "setup.exe"
        ));
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.total_size_on_disc(), 6144);
        assert_eq!(collection.total_file_count(), 1);
    }

    #[test]
    fn same_name_different_kind_is_allowed() {
        let tmp = tempfile::tempdir().unwrap();
        let file = file_of(tmp.path(), "x/data", 10);
        let dir = tmp.path().join("y/data");
        fs::create_dir_all(&dir).unwrap();
        file_of(&dir, "inside.txt", 10);

        let mut collection = MediaCollection::new();
        collection.add_file(&file).unwrap();
        collection.add_directory(&dir).unwrap();
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.total_file_count(), 2);
    }

    #[test]
    fn duplicate_directory_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("one/assets");
        let b = tmp.path().join("two/assets");
        file_of(&a, "x.png", 3000);
        file_of(&b, "y.png", 3000);

        let mut collection = MediaCollection::new();
        collection.add_directory(&a).unwrap();
        let before = (collection.total_file_count(), collection.total_size_on_disc());

        assert!(matches!(
            collection.add_directory(&b),
            Err(MediaError::Duplicate { kind: EntryKind::Directory, .. })
        ));
        assert_eq!(
            (collection.total_file_count(), collection.total_size_on_disc()),
            before
        );
    }

    #[test]
    fn nested_name_collisions_are_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = tmp.path().join("docs");
        file_of(&docs, "readme.txt", 10);
        let loose = file_of(tmp.path(), "loose/readme.txt", 10);

        let mut collection = MediaCollection::new();
        collection.add_directory(&docs).unwrap();
        collection.add_file(&loose).unwrap();
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn missing_paths_leave_collection_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let mut collection = MediaCollection::new();

        assert!(matches!(
            collection.add_file(tmp.path().join("missing.bin")),
            Err(MediaError::NotFound(_))
        ));
        assert!(matches!(
            collection.add_directory(tmp.path().join("missing")),
            Err(MediaError::NotFound(_))
        ));
        assert!(collection.is_empty());
        assert_eq!(collection.total_size_on_disc(), 0);
    }

    #[test]
    fn remove_subtracts_exact_aggregates() {
        let tmp = tempfile::tempdir().unwrap();
        let big = file_of(tmp.path(), "big.iso", 10_000);
        let small = file_of(tmp.path(), "small.txt", 1);
        let tree = tmp.path().join("tree");
        file_of(&tree, "a.bin", 4097);
        file_of(&tree, "sub/b.bin", 0);

        let mut collection = MediaCollection::new();
        let big = collection.add_file(&big).unwrap();
        let small = collection.add_file(&small).unwrap();
        let tree = collection.add_directory(&tree).unwrap();

        let total_size = collection.total_size_on_disc();
        let total_count = collection.total_file_count();
        assert_eq!(total_size, 10240 + 2048 + 6144);
        assert_eq!(total_count, 4);

        let removed = collection.remove(&[big.clone(), tree.clone()]);
        assert_eq!(removed, 2);
        assert_eq!(
            collection.total_size_on_disc(),
            total_size - big.size_on_disc() - tree.size_on_disc()
        );
        assert_eq!(
            collection.total_file_count(),
            total_count - big.file_count() - tree.file_count()
        );
        assert_eq!(collection.entries().len(), 1);
        assert!(Arc::ptr_eq(&collection.entries()[0], &small));

        // removing again is a no-op
        assert_eq!(collection.remove(&[big]), 0);
        assert_eq!(collection.total_file_count(), 1);
    }

    #[test]
    fn subscribers_see_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = file_of(tmp.path(), "notes.md", 5000);

        let mut collection = MediaCollection::new();
        let rx = collection.subscribe();

        let entry = collection.add_file(&path).unwrap();
        collection.remove(&[entry]);

        let events: Vec<CollectionEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                CollectionEvent::Added {
                    name: CompactString::new("notes.md"),
                    kind: EntryKind::File,
                    file_count: 1,
                    size_on_disc: 6144,
                },
                CollectionEvent::Removed {
                    name: CompactString::new("notes.md"),
                    kind: EntryKind::File,
                },
            ]
        );
    }

    #[test]
    fn display_order_is_kind_then_name() {
        let tmp = tempfile::tempdir().unwrap();
        let mut collection = MediaCollection::new();
        collection.add_file(file_of(tmp.path(), "zeta.txt", 1)).unwrap();
        collection.add_file(file_of(tmp.path(), "alpha.txt", 1)).unwrap();
        let dir = tmp.path().join("music");
        file_of(&dir, "track.flac", 1);
        collection.add_directory(&dir).unwrap();

        let names: Vec<String> = collection
            .sorted_for_display()
            .iter()
            .map(|e| e.display_name().to_string())
            .collect();
        assert_eq!(names, ["music", "alpha.txt", "zeta.txt"]);

        // insertion order is untouched
        assert_eq!(collection.entries()[0].display_name(), "zeta.txt");
    }
}
