//! Cross-process mutex over a sidecar lock file.

use crate::core::{PerfError, Result};
use parking_lot::{Mutex, MutexGuard};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::trace;

/// Advisory exclusive lock shared by every process mapping a segment.
///
/// `flock` is owned by the open file description, so threads sharing this
/// handle are serialized by `local` before the file lock is tried.
#[derive(Debug)]
pub struct SegmentLock {
    path: PathBuf,
    file: File,
    local: Mutex<()>,
    attempts: u32,
    interval: Duration,
}

/// Held lock; released on drop
pub struct LockGuard<'a> {
    lock: &'a SegmentLock,
    _local: MutexGuard<'a, ()>,
}

impl std::fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("path", &self.lock.path).finish()
    }
}

impl SegmentLock {
    pub fn open(path: &Path, attempts: u32, interval: Duration) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            local: Mutex::new(()),
            attempts: attempts.max(1),
            interval,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try acquisition up to the configured number of attempts, waiting at
    /// most one interval per attempt.
    pub fn acquire(&self) -> Result<LockGuard<'_>> {
        for attempt in 1..=self.attempts {
            let Some(local) = self.local.try_lock_for(self.interval) else {
                continue;
            };
            if sys::try_lock(&self.file)? {
                trace!(attempt, path = %self.path.display(), "Segment lock acquired");
                return Ok(LockGuard { lock: self, _local: local });
            }
            drop(local);
            if attempt < self.attempts {
                std::thread::sleep(self.interval);
            }
        }
        Err(PerfError::LockContention {
            attempts: self.attempts,
        })
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        sys::unlock(&self.lock.file);
    }
}

#[cfg(unix)]
mod sys {
    use crate::core::{PerfError, Result};
    use nix::errno::Errno;
    use nix::fcntl::{flock, FlockArg};
    use std::fs::File;
    use std::os::unix::io::AsRawFd;

    /// `Ok(false)` when another holder has the lock
    pub fn try_lock(file: &File) -> Result<bool> {
        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => Ok(true),
            Err(Errno::EWOULDBLOCK) | Err(Errno::EINTR) => Ok(false),
            Err(e) => Err(PerfError::shared_memory(format!("flock failed: {}", e))),
        }
    }

    pub fn unlock(file: &File) {
        if let Err(e) = flock(file.as_raw_fd(), FlockArg::Unlock) {
            tracing::warn!("Failed to release segment lock: {}", e);
        }
    }
}

#[cfg(not(unix))]
mod sys {
    use crate::core::{PerfError, Result};
    use std::fs::File;

    pub fn try_lock(_file: &File) -> Result<bool> {
        Err(PerfError::shared_memory("file locking requires a unix host"))
    }

    pub fn unlock(_file: &File) {}
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_second_holder_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.lock");
        let first = SegmentLock::open(&path, 3, Duration::from_millis(1)).unwrap();
        let second = SegmentLock::open(&path, 3, Duration::from_millis(1)).unwrap();

        let guard = first.acquire().unwrap();
        match second.acquire() {
            Err(PerfError::LockContention { attempts }) => assert_eq!(attempts, 3),
            other => panic!("expected contention, got {:?}", other.map(|_| ())),
        }
        drop(guard);
        assert!(second.acquire().is_ok());
    }

    #[test]
    fn test_threads_sharing_a_handle_are_exclusive() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let lock = Arc::new(SegmentLock::open(&dir.path().join("seg.lock"), 10_000, Duration::from_millis(1)).unwrap());
        let inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let _guard = lock.acquire().unwrap();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        std::thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_held_handle_blocks_same_process_thread() {
        let dir = tempfile::tempdir().unwrap();
        let lock = SegmentLock::open(&dir.path().join("seg.lock"), 2, Duration::from_millis(1)).unwrap();
        let guard = lock.acquire().unwrap();
        std::thread::scope(|scope| {
            let contended = scope.spawn(|| lock.acquire().map(|_| ())).join().unwrap();
            assert!(matches!(contended, Err(PerfError::LockContention { attempts: 2 })));
        });
        drop(guard);
    }
}
