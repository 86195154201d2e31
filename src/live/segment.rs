//! Memory-mapped live segments.
//!
//! Layout: 4-byte magic, u32 version, u64 payload length (little endian),
//! then the bincode-encoded snapshot. A zeroed header reads as empty.

use super::lock::{LockGuard, SegmentLock};
use crate::core::{PerfError, Result};
use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAGIC: &[u8; 4] = b"PTLV";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 16;

/// Order key to serialized record
pub type Snapshot = BTreeMap<String, String>;

/// Execution context sharing one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiveContext {
    /// HTTP server processes
    Server,
    /// Command-line processes
    Command,
}

impl LiveContext {
    pub const ALL: [LiveContext; 2] = [LiveContext::Server, LiveContext::Command];

    pub fn project_id(&self) -> u8 {
        match self {
            LiveContext::Server => b'w',
            LiveContext::Command => b'c',
        }
    }
}

/// ftok-style key: low 16 bits of the inode, low 8 bits of the device,
/// project id in the top byte
#[cfg(unix)]
pub fn segment_key(anchor: &Path, context: LiveContext) -> Result<u32> {
    use std::os::unix::fs::MetadataExt;

    let meta = std::fs::metadata(anchor)?;
    let ino = (meta.ino() & 0xffff) as u32;
    let dev = (meta.dev() & 0xff) as u32;
    Ok(ino | (dev << 16) | (u32::from(context.project_id()) << 24))
}

#[cfg(not(unix))]
pub fn segment_key(_anchor: &Path, _context: LiveContext) -> Result<u32> {
    Err(PerfError::shared_memory("shared segments require a unix host"))
}

/// Largest encoded size of `snapshot`, mirroring bincode's fixed-int layout
fn encoded_len(snapshot: &Snapshot) -> usize {
    8 + snapshot.iter().map(|(k, v)| 16 + k.len() + v.len()).sum::<usize>()
}

/// Drop oldest entries until the snapshot fits in `budget` bytes
pub fn fit_snapshot(snapshot: &mut Snapshot, budget: usize) -> usize {
    let mut size = encoded_len(snapshot);
    let mut dropped = 0;
    while size > budget {
        match snapshot.pop_first() {
            Some((k, v)) => {
                size -= 16 + k.len() + v.len();
                dropped += 1;
            },
            None => break,
        }
    }
    dropped
}

/// One shared segment and its lock
#[derive(Debug)]
pub struct SharedSegment {
    key: u32,
    path: PathBuf,
    map: Mutex<MmapMut>,
    lock: SegmentLock,
}

impl SharedSegment {
    /// Open or create the segment for `context` under `dir`
    pub fn open(
        dir: &Path,
        anchor: &Path,
        context: LiveContext,
        size: usize,
        lock_attempts: u32,
        lock_interval: Duration,
    ) -> Result<Self> {
        let key = segment_key(anchor, context)?;
        let path = dir.join(format!("perftail-{:08x}.seg", key));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        if file.metadata()?.len() < size as u64 {
            file.set_len(size as u64)?;
        }
        // SAFETY: the file stays open for the lifetime of the map and every
        // writer holds the segment lock while mutating it.
        let map = unsafe { MmapOptions::new().len(size).map_mut(&file)? };
        let lock = SegmentLock::open(&dir.join(format!("perftail-{:08x}.lock", key)), lock_attempts, lock_interval)?;
        Ok(Self {
            key,
            path,
            map: Mutex::new(map),
            lock,
        })
    }

    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock(&self) -> Result<LockGuard<'_>> {
        self.lock.acquire()
    }

    /// Payload bytes available for a snapshot
    pub fn capacity(&self) -> usize {
        self.map.lock().len().saturating_sub(HEADER_LEN)
    }

    /// Decode the stored snapshot; caller holds the lock
    pub fn read(&self, _guard: &LockGuard<'_>) -> Result<Snapshot> {
        let map = self.map.lock();
        if map.len() < HEADER_LEN || &map[0..4] != MAGIC {
            return Ok(Snapshot::new());
        }
        let version = u32::from_le_bytes([map[4], map[5], map[6], map[7]]);
        if version != VERSION {
            return Err(PerfError::shared_memory(format!(
                "segment {} has version {}, expected {}",
                self.path.display(),
                version,
                VERSION
            )));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&map[8..16]);
        let len = u64::from_le_bytes(len_bytes) as usize;
        if len > map.len() - HEADER_LEN {
            return Err(PerfError::shared_memory(format!(
                "segment {} declares {} payload bytes beyond its size",
                self.path.display(),
                len
            )));
        }
        Ok(bincode::deserialize(&map[HEADER_LEN..HEADER_LEN + len])?)
    }

    /// Encode `snapshot` into the segment, dropping its oldest entries when
    /// it does not fit; caller holds the lock. Returns the entries dropped.
    pub fn write(&self, _guard: &LockGuard<'_>, snapshot: &mut Snapshot) -> Result<usize> {
        let mut map = self.map.lock();
        let budget = map.len().saturating_sub(HEADER_LEN);
        let dropped = fit_snapshot(snapshot, budget);
        let payload = bincode::serialize(snapshot)?;
        if payload.len() > budget {
            return Err(PerfError::shared_memory(format!(
                "snapshot of {} bytes exceeds segment capacity {}",
                payload.len(),
                budget
            )));
        }
        map[0..4].copy_from_slice(MAGIC);
        map[4..8].copy_from_slice(&VERSION.to_le_bytes());
        map[8..16].copy_from_slice(&(payload.len() as u64).to_le_bytes());
        map[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(&payload);
        map.flush_async()?;
        Ok(dropped)
    }
}
