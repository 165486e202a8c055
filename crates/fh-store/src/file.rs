//! JSON-file job store guarded by `flock(2)`.
//!
//! Layout: `{path}` holds the job table, `{path}.lock` carries the advisory
//! lock. Every operation takes the in-process mutex, then an exclusive
//! flock, reads the table, optionally mutates it, and replaces the file
//! through a temp-file rename so readers never see a partial write. The
//! flock keeps the CLI (`fhr jobs`) and a running server consistent.
//!
//! Locking and file I/O run on the blocking pool. The flock is polled with
//! `LOCK_NB` and gives up after the lock timeout, so a stuck holder
//! surfaces as an `Io` error instead of parking a runtime thread forever.

use async_trait::async_trait;
use fh_core::{Job, JobStatus, RunnerError, RunnerResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::{JobFilter, JobStore, ProgressUpdate, StatusChange, apply_progress, sort_jobs};

const STORE_VERSION: u32 = 1;

/// How long an operation waits for another process to release the flock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    jobs: BTreeMap<String, Job>,
}

#[derive(Debug)]
pub struct FileJobStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    local: Mutex<()>,
}

impl FileJobStore {
    /// Open (or lazily create) the store at `path`. The parent directory is
    /// created on first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self {
            path,
            lock_path,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            local: Mutex::new(()),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the table under both locks. The table is written
    /// back only when `f` reports a change.
    async fn with_table<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, Job>) -> RunnerResult<(T, bool)>,
    ) -> RunnerResult<T> {
        let _local = self.local.lock().await;

        let path = self.path.clone();
        let lock_path = self.lock_path.clone();
        let timeout = self.lock_timeout;
        let (flock, mut table) = blocking(move || {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let lock_file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&lock_path)?;
            let flock = FlockGuard::acquire(lock_file, &lock_path, timeout)?;
            let table = read_table(&path)?;
            Ok((flock, table))
        })
        .await?;

        let (value, changed) = f(&mut table.jobs)?;
        if changed {
            let path = self.path.clone();
            blocking(move || {
                write_table(&path, &table)?;
                drop(flock);
                Ok(())
            })
            .await?;
        }
        Ok(value)
    }
}

/// Run blocking file work off the async workers.
async fn blocking<T, F>(work: F) -> RunnerResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> RunnerResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| RunnerError::Io(std::io::Error::other(e)))?
}

fn read_table(path: &Path) -> RunnerResult<StoreFile> {
    let mut contents = String::new();
    match File::open(path) {
        Ok(mut file) => {
            file.read_to_string(&mut contents)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    if contents.trim().is_empty() {
        return Ok(StoreFile {
            version: STORE_VERSION,
            jobs: BTreeMap::new(),
        });
    }
    let table: StoreFile = serde_json::from_str(&contents)
        .map_err(|e| RunnerError::Corrupt(format!("{}: {e}", path.display())))?;
    if table.version != STORE_VERSION {
        return Err(RunnerError::Corrupt(format!(
            "{}: unsupported store version {} (expected {STORE_VERSION})",
            path.display(),
            table.version
        )));
    }
    Ok(table)
}

fn write_table(path: &Path, table: &StoreFile) -> RunnerResult<()> {
    let json = serde_json::to_vec_pretty(table)
        .map_err(|e| RunnerError::Corrupt(format!("failed to serialize store: {e}")))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Exclusive flock released on drop.
struct FlockGuard {
    file: File,
}

impl FlockGuard {
    /// Poll `LOCK_EX | LOCK_NB` with backoff until acquired or `timeout`.
    fn acquire(file: File, lock_path: &Path, timeout: Duration) -> RunnerResult<Self> {
        let start = Instant::now();
        let mut sleep_ms = 5;
        loop {
            let fd = file.as_raw_fd();
            // SAFETY: fd is a valid descriptor owned by `file`. LOCK_NB makes
            // the call return EWOULDBLOCK instead of waiting.
            let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if ret == 0 {
                return Ok(Self { file });
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::WouldBlock {
                return Err(err.into());
            }
            if start.elapsed() >= timeout {
                return Err(RunnerError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!(
                        "timed out after {timeout:?} waiting for {}",
                        lock_path.display()
                    ),
                )));
            }
            std::thread::sleep(Duration::from_millis(sleep_ms));
            sleep_ms = (sleep_ms * 2).min(200);
        }
    }
}

impl Drop for FlockGuard {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // SAFETY: fd is valid; LOCK_UN releases the advisory lock. Closing
        // the file would release it as well.
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn insert(&self, job: Job) -> RunnerResult<()> {
        self.with_table(|jobs| {
            if jobs.contains_key(&job.id) {
                return Err(RunnerError::DuplicateJob(job.id));
            }
            jobs.insert(job.id.clone(), job);
            Ok(((), true))
        })
        .await
    }

    async fn get(&self, id: &str) -> RunnerResult<Job> {
        self.with_table(|jobs| {
            let job = jobs
                .get(id)
                .cloned()
                .ok_or_else(|| RunnerError::JobNotFound(id.to_string()))?;
            Ok((job, false))
        })
        .await
    }

    async fn list(&self, filter: &JobFilter) -> RunnerResult<Vec<Job>> {
        self.with_table(|jobs| {
            let mut out: Vec<Job> = jobs
                .values()
                .filter(|job| filter.matches(job))
                .cloned()
                .collect();
            sort_jobs(&mut out);
            Ok((out, false))
        })
        .await
    }

    async fn update_progress(&self, id: &str, update: ProgressUpdate) -> RunnerResult<bool> {
        self.with_table(|jobs| {
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| RunnerError::JobNotFound(id.to_string()))?;
            let written = apply_progress(job, update);
            Ok((written, written))
        })
        .await
    }

    async fn compare_and_set_status(
        &self,
        id: &str,
        expected: JobStatus,
        change: StatusChange,
    ) -> RunnerResult<bool> {
        self.with_table(|jobs| {
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| RunnerError::JobNotFound(id.to_string()))?;
            if job.status != expected {
                tracing::debug!(job = %id, %expected, actual = %job.status, "status CAS lost");
                return Ok((false, false));
            }
            change.apply(job);
            Ok((true, true))
        })
        .await
    }
}
