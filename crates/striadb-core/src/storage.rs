//! Segment file naming and access.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::types::CompressionKind;

/// Identity of one segment file. Compression is part of the key because the
/// same column can carry segments in both formats during a recompression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    pub oid: u32,
    pub dbroot: u16,
    pub partition: u32,
    pub segment: u16,
    pub compression: CompressionKind,
}

/// How the reader pool reaches segment files. Swappable so tests and
/// alternate layouts can redirect reads without touching the pool.
pub trait SegmentStore: Send + Sync {
    /// Path of the segment file for `key` under this store's layout.
    fn segment_path(&self, key: &SegmentKey) -> PathBuf;

    /// Open the file read-only.
    fn open(&self, path: &Path) -> io::Result<File>;

    /// Last modification time, used to detect rewritten segment headers.
    fn mtime(&self, file: &File) -> io::Result<SystemTime>;
}

/// Segment files on a local filesystem, laid out as
/// `<root>/data<dbroot>/oid<oid>/p<partition>.s<segment>.seg`.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory for `key` so a writer can place the file.
    pub fn ensure_dir(&self, key: &SegmentKey) -> io::Result<PathBuf> {
        let path = self.segment_path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(path)
    }
}

impl SegmentStore for LocalStore {
    fn segment_path(&self, key: &SegmentKey) -> PathBuf {
        self.root
            .join(format!("data{}", key.dbroot))
            .join(format!("oid{}", key.oid))
            .join(format!("p{}.s{}.seg", key.partition, key.segment))
    }

    fn open(&self, path: &Path) -> io::Result<File> {
        File::open(path)
    }

    fn mtime(&self, file: &File) -> io::Result<SystemTime> {
        file.metadata()?.modified()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(oid: u32, dbroot: u16, partition: u32, segment: u16) -> SegmentKey {
        SegmentKey { oid, dbroot, partition, segment, compression: CompressionKind::None }
    }

    #[test]
    fn paths_separate_dbroots_and_columns() {
        let store = LocalStore::new("/var/lib/striadb");
        let path = store.segment_path(&key(3001, 2, 4, 1));
        assert_eq!(path, PathBuf::from("/var/lib/striadb/data2/oid3001/p4.s1.seg"));
    }

    #[test]
    fn compression_does_not_change_the_file_name() {
        // Both formats share one path; the fd cache key still separates them.
        let store = LocalStore::new("/data");
        let plain = store.segment_path(&key(7, 1, 0, 0));
        let mut compressed = key(7, 1, 0, 0);
        compressed.compression = CompressionKind::Snappy;
        assert_eq!(plain, store.segment_path(&compressed));
    }

    #[test]
    fn open_and_mtime_work_on_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let k = key(42, 1, 0, 0);
        let path = store.ensure_dir(&k).unwrap();
        std::fs::write(&path, b"segment bytes").unwrap();

        let file = store.open(&path).unwrap();
        assert!(store.mtime(&file).is_ok());
    }

    #[test]
    fn opening_a_missing_segment_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let err = store.open(&store.segment_path(&key(1, 1, 0, 0))).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
