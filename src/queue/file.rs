//! Filesystem queue backend.
//!
//! One directory per queue, one JSON file per record, plus a `failed/`
//! directory. Pushes are atomic (temp file + fsync + rename); pops scan
//! the queue directory in modification-time order and take a non-blocking
//! advisory exclusive lock per candidate, so concurrent workers skip files
//! another process is inspecting.
//!
//! Advisory locks and mtime ordering are only reliable on local
//! filesystems; this backend is intended for low-throughput deployments
//! without a database, not for high concurrency or network mounts.

use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use super::{QueueBackend, QueueError};
use crate::core::payload::JobPayload;
use crate::core::record::{now_unix, FailedJob, JobRecord};
use crate::core::types::JobId;

const FAILED_DIR: &str = "failed";

/// Directory-per-queue storage with advisory file locking.
pub struct FileQueue {
    root: PathBuf,
    retry_after: Duration,
}

impl FileQueue {
    /// Create the backend rooted at `root`, creating the directory tree as
    /// needed.
    pub fn new(root: impl Into<PathBuf>, retry_after: Duration) -> Result<Self, QueueError> {
        let root = root.into();
        fs::create_dir_all(root.join(FAILED_DIR))?;
        Ok(Self { root, retry_after })
    }

    fn queue_dir(&self, queue: &str) -> PathBuf {
        self.root.join(queue)
    }

    fn failed_dir(&self) -> PathBuf {
        self.root.join(FAILED_DIR)
    }

    fn record_path(&self, queue: &str, id: &JobId) -> PathBuf {
        self.queue_dir(queue).join(format!("{}.json", id))
    }

    fn failed_path(&self, id: &JobId) -> PathBuf {
        self.failed_dir().join(format!("{}.json", id))
    }

    /// Write `contents` to `path` atomically: temp file in the same
    /// directory, fsync, rename.
    fn write_atomic(path: &Path, contents: &str) -> Result<(), QueueError> {
        let tmp = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Queue-directory entries sorted by modification time ascending.
    fn candidates(dir: &Path) -> Result<Vec<PathBuf>, QueueError> {
        let mut entries: Vec<(PathBuf, SystemTime)> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push((path, modified));
        }
        entries.sort_by_key(|(_, modified)| *modified);
        Ok(entries.into_iter().map(|(path, _)| path).collect())
    }

    fn read_record(file: &File) -> Result<JobRecord, QueueError> {
        let mut contents = String::new();
        let mut reader = file;
        reader.read_to_string(&mut contents)?;
        serde_json::from_str(&contents).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    /// Rewrite an open record file in place. The caller holds the lock.
    fn rewrite_record(file: &File, record: &JobRecord) -> Result<(), QueueError> {
        let contents = serde_json::to_string(record)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        file.set_len(0)?;
        let mut writer = file;
        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(contents.as_bytes())?;
        writer.sync_all()?;
        Ok(())
    }

    fn read_failed(path: &Path) -> Result<FailedJob, QueueError> {
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| QueueError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl QueueBackend for FileQueue {
    async fn push(
        &self,
        payload: &JobPayload,
        queue: &str,
        delay: Duration,
    ) -> Result<JobId, QueueError> {
        let record = JobRecord::fresh(payload.clone(), queue, delay);
        fs::create_dir_all(self.queue_dir(queue))?;

        let contents = serde_json::to_string(&record)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        Self::write_atomic(&self.record_path(queue, &record.id), &contents)?;

        Ok(record.id)
    }

    async fn pop(&self, queue: &str) -> Result<Option<JobRecord>, QueueError> {
        let dir = self.queue_dir(queue);
        if !dir.exists() {
            return Ok(None);
        }

        for path in Self::candidates(&dir)? {
            let file = match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(file) => file,
                // Deleted or renamed since the scan; move on.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            if file.try_lock_exclusive().is_err() {
                // Another worker holds this file.
                continue;
            }

            let mut record = match Self::read_record(&file) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable queue entry");
                    let _ = file.unlock();
                    continue;
                }
            };

            let now = now_unix();
            if record.is_reserved() {
                if !record.is_reservation_expired(self.retry_after, now) {
                    let _ = file.unlock();
                    continue;
                }
                // The reserving process died; the on-disk reservation is
                // stale and the record is treated as pending.
                record.mark_released(Duration::ZERO, now);
            } else if record.available_at > now {
                let _ = file.unlock();
                continue;
            }

            record.mark_reserved(now);
            Self::rewrite_record(&file, &record)?;
            let _ = file.unlock();
            return Ok(Some(record));
        }

        Ok(None)
    }

    async fn release(&self, record: &JobRecord, delay: Duration) -> Result<(), QueueError> {
        let path = self.record_path(&record.queue, &record.id);
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        file.lock_exclusive()?;

        let mut released = record.clone();
        released.mark_released(delay, now_unix());
        let result = Self::rewrite_record(&file, &released);
        let _ = file.unlock();
        result
    }

    async fn delete(&self, record: &JobRecord) -> Result<(), QueueError> {
        match fs::remove_file(self.record_path(&record.queue, &record.id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_failed(&self, record: &JobRecord, exception: &str) -> Result<(), QueueError> {
        let failed = FailedJob::from_record(record, exception, now_unix());
        let contents = serde_json::to_string(&failed)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;

        // Failed record first: a crash in between leaves both files, never
        // only the failed one.
        Self::write_atomic(&self.failed_path(&failed.id), &contents)?;
        self.delete(record).await
    }

    async fn size(&self, queue: &str) -> Result<u64, QueueError> {
        let dir = self.queue_dir(queue);
        if !dir.exists() {
            return Ok(0);
        }

        let mut count = 0u64;
        for path in Self::candidates(&dir)? {
            let Ok(contents) = fs::read_to_string(&path) else {
                continue;
            };
            let Ok(record) = serde_json::from_str::<JobRecord>(&contents) else {
                continue;
            };
            if !record.is_reserved() {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn clear(&self, queue: &str) -> Result<u64, QueueError> {
        let dir = self.queue_dir(queue);
        if !dir.exists() {
            return Ok(0);
        }

        let mut removed = 0u64;
        for path in Self::candidates(&dir)? {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    async fn failed_jobs(&self) -> Result<Vec<FailedJob>, QueueError> {
        let mut failed = Vec::new();
        for entry in fs::read_dir(self.failed_dir())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_failed(&path) {
                Ok(job) => failed.push(job),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable failed record");
                }
            }
        }
        failed.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        Ok(failed)
    }

    async fn retry_failed_job(&self, id: &JobId) -> Result<bool, QueueError> {
        let path = self.failed_path(id);
        if !path.exists() {
            return Ok(false);
        }

        let failed = Self::read_failed(&path)?;
        let record = failed.to_fresh_record();

        fs::create_dir_all(self.queue_dir(&record.queue))?;
        let contents = serde_json::to_string(&record)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        Self::write_atomic(&self.record_path(&record.queue, &record.id), &contents)?;

        fs::remove_file(&path)?;
        Ok(true)
    }

    async fn forget_failed_job(&self, id: &JobId) -> Result<bool, QueueError> {
        match fs::remove_file(self.failed_path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear_failed_jobs(&self) -> Result<u64, QueueError> {
        let mut removed = 0u64;
        for entry in fs::read_dir(self.failed_dir())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}
