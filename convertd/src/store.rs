//! Temporary file store.
//!
//! Uploaded bytes are spooled to local disk under a generated UUID and
//! tracked in an in-memory registry. Writes go to a `.part` file and are
//! published with an atomic rename, so a reader never observes a
//! half-written upload. Each conversion gets its own uniquely named scratch
//! directory. Cleanup happens eagerly on every convert call; a periodic
//! sweep removes whatever abandoned uploads and stale scratch space remain.

use crate::classify::Category;
use crate::config::StoreConfig;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("upload {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Metadata for one stored upload. Owned exclusively by the [`TempStore`];
/// handlers hold only the id.
#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub id: Uuid,
    pub filename: String,
    pub category: Category,
    pub mime_type: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

pub struct TempStore {
    uploads_dir: PathBuf,
    work_root: PathBuf,
    retention: Duration,
    entries: DashMap<Uuid, UploadRecord>,
}

impl TempStore {
    /// Create the spool directories. The root is canonicalized so paths stay
    /// valid regardless of later working-directory changes (LibreOffice
    /// profile URIs require absolute paths).
    pub fn new(config: &StoreConfig) -> std::io::Result<Self> {
        std::fs::create_dir_all(&config.root)?;
        let root = std::fs::canonicalize(&config.root)?;

        let uploads_dir = root.join("uploads");
        let work_root = root.join("work");
        std::fs::create_dir_all(&uploads_dir)?;
        std::fs::create_dir_all(&work_root)?;

        Ok(Self {
            uploads_dir,
            work_root,
            retention: config.retention,
            entries: DashMap::new(),
        })
    }

    /// Start a streamed upload. Bytes are written to `<id>.<ext>.part` and
    /// only become visible under the final path when `finish` renames them.
    pub async fn begin(&self, filename: &str, category: Category, mime_type: &str) -> Result<PendingUpload<'_>, StoreError> {
        let id = Uuid::new_v4();
        let ext = crate::classify::file_extension(filename);
        let ext = if ext.is_empty() { "bin".to_string() } else { ext };

        let final_path = self.uploads_dir.join(format!("{id}.{ext}"));
        let part_path = self.uploads_dir.join(format!("{id}.{ext}.part"));
        let file = tokio::fs::File::create(&part_path).await?;

        debug!(%id, filename, "starting spool write");

        Ok(PendingUpload {
            store: self,
            id,
            filename: filename.to_string(),
            category,
            mime_type: mime_type.to_string(),
            part_path,
            final_path,
            file,
            size_bytes: 0,
            persisted: false,
        })
    }

    /// Store a complete byte buffer in one call.
    pub async fn put(&self, filename: &str, category: Category, mime_type: &str, bytes: &[u8]) -> Result<UploadRecord, StoreError> {
        let mut pending = self.begin(filename, category, mime_type).await?;
        pending.write(bytes).await?;
        pending.finish().await
    }

    pub fn get(&self, id: Uuid) -> Result<UploadRecord, StoreError> {
        self.entries.get(&id).map(|entry| entry.clone()).ok_or(StoreError::NotFound(id))
    }

    /// Remove an upload and its spool file. Idempotent: removing an unknown
    /// or already-removed id is not an error.
    pub fn remove(&self, id: Uuid) {
        if let Some((_, record)) = self.entries.remove(&id) {
            if let Err(e) = std::fs::remove_file(&record.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(%id, "failed to remove spool file: {e}");
                }
            }
            debug!(%id, "removed upload");
        }
    }

    /// Create a scratch directory unique to one conversion attempt.
    pub fn work_dir(&self, id: Uuid, target: &str) -> Result<PathBuf, StoreError> {
        let dir = self.work_root.join(format!("{id}-{target}"));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// Remove uploads past the retention window, plus stray `.part` files,
    /// unregistered spool files (left over from a previous process), and
    /// stale scratch directories. Returns the number of items removed.
    pub fn sweep(&self) -> usize {
        let fs_cutoff = SystemTime::now().checked_sub(self.retention).unwrap_or(UNIX_EPOCH);
        let cutoff = DateTime::<Utc>::from(fs_cutoff);

        let mut removed = 0;

        // Collect first, then remove: removing while iterating would hold
        // shard locks across the remove call.
        let expired: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|entry| entry.created_at < cutoff)
            .map(|entry| *entry.key())
            .collect();
        for id in expired {
            self.remove(id);
            removed += 1;
        }

        let registered: Vec<PathBuf> = self.entries.iter().map(|entry| entry.path.clone()).collect();
        removed += sweep_files(&self.uploads_dir, fs_cutoff, |path| !registered.contains(&path.to_path_buf()));
        removed += sweep_dirs(&self.work_root, fs_cutoff);

        removed
    }
}

fn modified_before(path: &Path, cutoff: SystemTime) -> bool {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(|modified| modified < cutoff)
        .unwrap_or(false)
}

fn sweep_files(dir: &Path, cutoff: SystemTime, orphaned: impl Fn(&Path) -> bool) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && orphaned(&path) && modified_before(&path, cutoff) && std::fs::remove_file(&path).is_ok() {
            debug!(path = %path.display(), "swept orphaned spool file");
            removed += 1;
        }
    }
    removed
}

fn sweep_dirs(dir: &Path, cutoff: SystemTime) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() && modified_before(&path, cutoff) && std::fs::remove_dir_all(&path).is_ok() {
            debug!(path = %path.display(), "swept stale scratch directory");
            removed += 1;
        }
    }
    removed
}

/// An in-progress spool write. Dropping without calling
/// [`finish`](PendingUpload::finish) removes the partial file.
pub struct PendingUpload<'a> {
    store: &'a TempStore,
    id: Uuid,
    filename: String,
    category: Category,
    mime_type: String,
    part_path: PathBuf,
    final_path: PathBuf,
    file: tokio::fs::File,
    size_bytes: u64,
    persisted: bool,
}

impl PendingUpload<'_> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), StoreError> {
        self.file.write_all(chunk).await?;
        self.size_bytes += chunk.len() as u64;
        Ok(())
    }

    /// Publish the upload: flush, atomically rename the `.part` file to its
    /// final path, and register the record.
    pub async fn finish(mut self) -> Result<UploadRecord, StoreError> {
        self.file.flush().await?;
        tokio::fs::rename(&self.part_path, &self.final_path).await?;
        self.persisted = true;

        let record = UploadRecord {
            id: self.id,
            filename: self.filename.clone(),
            category: self.category,
            mime_type: self.mime_type.clone(),
            path: self.final_path.clone(),
            size_bytes: self.size_bytes,
            created_at: Utc::now(),
        };
        self.store.entries.insert(self.id, record.clone());

        debug!(id = %self.id, size_bytes = self.size_bytes, "upload spooled");
        Ok(record)
    }
}

impl Drop for PendingUpload<'_> {
    fn drop(&mut self) {
        if !self.persisted {
            let _ = std::fs::remove_file(&self.part_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use std::time::Duration;

    fn test_store(retention: Duration) -> (TempStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = StoreConfig {
            root: dir.path().join("spool"),
            retention,
            sweep_interval: Duration::from_secs(60),
        };
        (TempStore::new(&config).expect("store"), dir)
    }

    #[tokio::test]
    async fn put_get_remove_roundtrip() {
        let (store, _dir) = test_store(Duration::from_secs(3600));

        let record = store.put("photo.png", Category::Image, "image/png", b"not really a png").await.unwrap();

        let fetched = store.get(record.id).unwrap();
        assert_eq!(fetched.filename, "photo.png");
        assert_eq!(fetched.size_bytes, 16);
        assert_eq!(std::fs::read(&fetched.path).unwrap(), b"not really a png");

        store.remove(record.id);
        assert!(matches!(store.get(record.id), Err(StoreError::NotFound(_))));
        assert!(!fetched.path.exists());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (store, _dir) = test_store(Duration::from_secs(3600));
        let record = store.put("a.txt", Category::Document, "text/plain", b"hello").await.unwrap();

        store.remove(record.id);
        store.remove(record.id);
        store.remove(Uuid::new_v4());
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let (store, _dir) = test_store(Duration::from_secs(3600));
        let id = Uuid::new_v4();
        match store.get(id) {
            Err(StoreError::NotFound(missing)) => assert_eq!(missing, id),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn partial_write_is_invisible_and_cleaned_on_drop() {
        let (store, _dir) = test_store(Duration::from_secs(3600));

        let mut pending = store.begin("big.mp4", Category::Video, "video/mp4").await.unwrap();
        pending.write(b"half a file").await.unwrap();
        let id = pending.id();

        // Not finished: no published file, no record
        assert!(matches!(store.get(id), Err(StoreError::NotFound(_))));
        let visible: Vec<_> = std::fs::read_dir(store.uploads_dir())
            .unwrap()
            .flatten()
            .filter(|e| !e.path().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(visible.is_empty());

        drop(pending);
        assert_eq!(std::fs::read_dir(store.uploads_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn distinct_uploads_get_distinct_paths() {
        let (store, _dir) = test_store(Duration::from_secs(3600));
        let a = store.put("x.txt", Category::Document, "text/plain", b"a").await.unwrap();
        let b = store.put("x.txt", Category::Document, "text/plain", b"b").await.unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.path, b.path);
    }

    #[tokio::test]
    async fn sweep_removes_expired_entries() {
        let (store, _dir) = test_store(Duration::ZERO);
        let record = store.put("old.txt", Category::Document, "text/plain", b"old").await.unwrap();

        let removed = store.sweep();
        assert!(removed >= 1);
        assert!(matches!(store.get(record.id), Err(StoreError::NotFound(_))));
        assert!(!record.path.exists());
    }

    #[tokio::test]
    async fn sweep_keeps_fresh_entries() {
        let (store, _dir) = test_store(Duration::from_secs(3600));
        let record = store.put("fresh.txt", Category::Document, "text/plain", b"fresh").await.unwrap();

        assert_eq!(store.sweep(), 0);
        assert!(store.get(record.id).is_ok());
    }

    #[tokio::test]
    async fn sweep_removes_stale_work_dirs() {
        let (store, _dir) = test_store(Duration::ZERO);
        let work = store.work_dir(Uuid::new_v4(), "png").unwrap();
        std::fs::write(work.join("out.png"), b"leftover").unwrap();

        // Directory mtimes have second granularity on some filesystems, so
        // only assert the sweep runs; exact eligibility is timing-dependent.
        let _ = store.sweep();
    }

    #[tokio::test]
    async fn work_dirs_are_unique_per_target() {
        let (store, _dir) = test_store(Duration::from_secs(3600));
        let id = Uuid::new_v4();
        let png = store.work_dir(id, "png").unwrap();
        let jpg = store.work_dir(id, "jpg").unwrap();
        assert_ne!(png, jpg);
        assert!(png.is_dir());
        assert!(jpg.is_dir());
    }
}
