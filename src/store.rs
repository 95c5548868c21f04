//! Locked access to the usage store file.
//!
//! Every read and write runs inside an exclusive `flock(2)` held on a sidecar
//! `<store>.lock` file. The data file itself is replaced by rename on save, so
//! it cannot carry the lock: a process blocked on the old inode would wake up
//! holding a lock nobody else sees.
//!
//! Reads take the same exclusive lock as writes. All access to all users is
//! serialized; a reader sees the store either before or after any write.

use crate::error::{LedgerError, Result};
use crate::model::UsageStore;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Whether a critical section persists the store on success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Handle on a store file shared with other processes.
#[derive(Debug, Clone)]
pub struct LockedStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Option<Duration>,
}

/// Held exclusive lock; released when dropped.
struct StoreLock {
    _flock: Flock<File>,
    path: PathBuf,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "releasing store lock");
    }
}

impl LockedStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = sidecar(&path, "lock");
        Self {
            path,
            lock_path,
            lock_timeout: None,
        }
    }

    /// Give up waiting for the lock after `timeout`. `None` blocks forever.
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` on the freshly loaded store while holding the lock.
    ///
    /// With [`Access::Write`] the store is saved after `f` returns `Ok`. The
    /// lock is released on every exit path, including errors from `f`.
    pub fn with_store<T, F>(&self, access: Access, f: F) -> Result<T>
    where
        F: FnOnce(&mut UsageStore) -> Result<T>,
    {
        let _lock = self.acquire()?;
        if !self.path.exists() {
            save(&self.path, &UsageStore::new())?;
        }

        let mut store = load(&self.path)?;
        let out = f(&mut store)?;

        if access == Access::Write {
            save(&self.path, &store)?;
        }
        Ok(out)
    }

    /// Project something out of the store without persisting.
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&UsageStore) -> T,
    {
        self.with_store(Access::Read, |store| Ok(f(store)))
    }

    /// Load, mutate and save as one critical section.
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut UsageStore) -> Result<T>,
    {
        self.with_store(Access::Write, f)
    }

    fn acquire(&self) -> Result<StoreLock> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| LedgerError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| LedgerError::io(&self.lock_path, e))?;

        let flock = match self.lock_timeout {
            None => self.lock_blocking(file)?,
            Some(timeout) => self.lock_polling(file, timeout)?,
        };

        debug!(path = %self.path.display(), "acquired store lock");
        Ok(StoreLock {
            _flock: flock,
            path: self.path.clone(),
        })
    }

    fn lock_blocking(&self, mut file: File) -> Result<Flock<File>> {
        loop {
            match Flock::lock(file, FlockArg::LockExclusive) {
                Ok(flock) => return Ok(flock),
                Err((f, Errno::EINTR)) => file = f,
                Err((_, errno)) => return Err(self.lock_error(errno)),
            }
        }
    }

    fn lock_polling(&self, mut file: File, timeout: Duration) -> Result<Flock<File>> {
        let started = Instant::now();
        loop {
            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(flock) => return Ok(flock),
                Err((f, errno)) if errno == Errno::EWOULDBLOCK || errno == Errno::EINTR => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(LedgerError::LockTimeout {
                            path: self.path.clone(),
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL.min(timeout - waited));
                    file = f;
                }
                Err((_, errno)) => return Err(self.lock_error(errno)),
            }
        }
    }

    fn lock_error(&self, errno: Errno) -> LedgerError {
        LedgerError::Lock {
            path: self.lock_path.clone(),
            errno,
        }
    }
}

/// Parse the store at `path`.
///
/// A missing, empty or unparseable file is an empty store. Corrupt content is
/// logged and then discarded by the next save.
pub fn load(path: &Path) -> Result<UsageStore> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(UsageStore::new()),
        Err(e) => return Err(LedgerError::io(path, e)),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(UsageStore::new());
    }

    match serde_json::from_slice(&bytes) {
        Ok(store) => Ok(store),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "usage store is corrupt, treating as empty");
            Ok(UsageStore::new())
        }
    }
}

/// Atomically replace the store at `path`: temp file, fsync, rename, fsync dir.
pub fn save(path: &Path, store: &UsageStore) -> Result<()> {
    let json = serde_json::to_vec_pretty(store)?;
    let tmp_path = sidecar(path, "tmp");

    let mut tmp = File::create(&tmp_path).map_err(|e| LedgerError::io(&tmp_path, e))?;
    tmp.write_all(&json)
        .and_then(|_| tmp.sync_all())
        .map_err(|e| LedgerError::io(&tmp_path, e))?;
    drop(tmp);

    fs::rename(&tmp_path, path).map_err(|e| LedgerError::io(path, e))?;
    sync_parent(path)?;

    debug!(path = %path.display(), users = store.users.len(), "saved usage store");
    Ok(())
}

fn sync_parent(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)
        .and_then(|dir| dir.sync_all())
        .map_err(|e| LedgerError::io(parent, e))
}

/// `<path>.<ext>` alongside the store, e.g. `user_usage.json.lock`.
fn sidecar(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(ext);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DailyBucket;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> LockedStore {
        LockedStore::new(dir.path().join("data").join("user_usage.json"))
    }

    #[test]
    fn test_sidecar_paths() {
        let path = Path::new("/tmp/data/user_usage.json");
        assert_eq!(
            sidecar(path, "lock"),
            PathBuf::from("/tmp/data/user_usage.json.lock")
        );
    }

    #[test]
    fn test_missing_file_is_created_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let empty = store.read(|s| s.is_empty()).unwrap();
        assert!(empty);
        assert_eq!(fs::read_to_string(store.path()).unwrap().trim(), "{}");
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("user_usage.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(load(&path).unwrap().is_empty());

        fs::write(&path, b"\xff\xfe\x00").unwrap();
        assert!(load(&path).unwrap().is_empty());

        fs::write(&path, "   \n").unwrap();
        assert!(load(&path).unwrap().is_empty());
    }

    #[test]
    fn test_write_persists_and_read_does_not() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store
            .update(|s| {
                s.user_mut("a")
                    .daily
                    .insert("2024-01-01".into(), DailyBucket::default());
                Ok(())
            })
            .unwrap();
        store
            .with_store(Access::Read, |s| {
                s.users.clear();
                Ok(())
            })
            .unwrap();

        let users = store.read(|s| s.users.len()).unwrap();
        assert_eq!(users, 1);
        assert!(!sidecar(store.path(), "tmp").exists());
    }

    #[test]
    fn test_failed_closure_releases_lock_and_skips_save() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).with_lock_timeout(Some(Duration::from_millis(200)));

        let err = store
            .update(|s| -> Result<()> {
                s.user_mut("ghost");
                Err(LedgerError::InvalidInput("boom".into()))
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));

        // Lock must be free again, and the aborted mutation not persisted
        assert!(store.read(|s| s.user("ghost").is_none()).unwrap());
    }

    #[test]
    fn test_lock_timeout_while_held() {
        let dir = TempDir::new().unwrap();
        let holder = store_in(&dir);
        let _held = holder.acquire().unwrap();

        let waiter = store_in(&dir).with_lock_timeout(Some(Duration::from_millis(50)));
        let err = waiter.read(|_| ()).unwrap_err();
        assert!(matches!(err, LedgerError::LockTimeout { .. }));
    }

    #[test]
    fn test_unwritable_location_is_store_unavailable() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let store = LockedStore::new(blocker.join("user_usage.json"));
        let err = store.read(|_| ()).unwrap_err();
        assert!(matches!(err, LedgerError::StoreUnavailable { .. }));
    }
}
