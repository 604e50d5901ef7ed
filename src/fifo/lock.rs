use std::fs::File;
use std::io;
use std::ops::Deref;

use crate::error::QueueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockMode {
    Shared,
    Exclusive,
}

/// Advisory whole-file lock (`flock` on Linux), released on drop.
pub(crate) struct FileLock<'a> {
    file: &'a File,
}

impl<'a> FileLock<'a> {
    /// Block until the lock is granted.
    pub(crate) fn acquire(file: &'a File, mode: LockMode) -> Result<Self, QueueError> {
        loop {
            let locked = match mode {
                LockMode::Shared => file.lock_shared(),
                LockMode::Exclusive => file.lock(),
            };
            match locked {
                Ok(()) => return Ok(Self { file }),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(QueueError::Lock(e)),
            }
        }
    }
}

impl Deref for FileLock<'_> {
    type Target = File;

    fn deref(&self) -> &File {
        self.file
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock as well.
        if let Err(e) = self.file.unlock() {
            tracing::warn!(error = %e, "Failed to release queue lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_lock_blocks_other_descriptors_until_dropped() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("locked");
        let first = File::create(&path).unwrap();
        let second = File::open(&path).unwrap();

        let guard = FileLock::acquire(&first, LockMode::Exclusive).unwrap();
        assert!(matches!(
            second.try_lock_shared(),
            Err(std::fs::TryLockError::WouldBlock)
        ));
        drop(guard);

        let _shared = FileLock::acquire(&second, LockMode::Shared).unwrap();
    }
}
