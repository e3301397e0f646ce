use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use super::EncryptionError;

/// Exclusive access to file paths across threads.
///
/// Cloning shares the same set of held paths.
#[derive(Clone, Default)]
pub struct PathLocks {
    inner: Arc<(Mutex<HashSet<PathBuf>>, Condvar)>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `path` is free, then holds it until the guard is dropped.
    pub fn acquire(&self, path: &Path) -> Result<PathGuard, EncryptionError> {
        let key = normalize(path);
        let (held, released) = &*self.inner;
        let mut held = held.lock().map_err(|_| EncryptionError::LockPoisoned)?;
        while held.contains(&key) {
            held = released
                .wait(held)
                .map_err(|_| EncryptionError::LockPoisoned)?;
        }
        held.insert(key.clone());

        Ok(PathGuard {
            locks: self.clone(),
            path: key,
        })
    }

    #[cfg(test)]
    pub(crate) fn is_locked(&self, path: &Path) -> bool {
        let key = normalize(path);
        self.inner
            .0
            .lock()
            .map(|held| held.contains(&key))
            .unwrap_or(false)
    }
}

fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Releases its path on drop.
pub struct PathGuard {
    locks: PathLocks,
    path: PathBuf,
}

impl PathGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        let (held, released) = &*self.locks.inner;
        let mut held = held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.path);
        released.notify_all();
    }
}
