//! Regions backing a bus channel.
//!
//! A region is a [`ControlBlock`] plus the ring bytes. The control block
//! holds everything the openers of a channel must agree on: ring positions,
//! both semaphore counts, the ring lock and the attach count. Every field is
//! an atomic, so the block behaves the same on the heap and inside a file
//! mapped by several processes.
//!
//! Mapped file layout:
//!
//! ```text
//! [ ControlBlock .. CONTROL_SIZE ][ ring bytes (buffer_size) ]
//! ```
//!
//! Openers of a mapped file serialize attach and detach with an exclusive
//! file lock. The first opener formats the control block, later openers
//! must agree with its geometry, and the last one out removes the file.

// memmap2 exposes mapping as an unsafe constructor, and the control block
// is viewed in place inside the mapping.
#![allow(unsafe_code)]

use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io,
    ops::Deref,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
};

use memmap2::{MmapMut, MmapOptions};

use crate::{
    error::BusError,
    semaphore::{Backoff, Semaphore},
};

/// Prefix of the file backing a mapped region.
pub const REGION_FILE_PREFIX: &str = "DCameraShm_";

/// Bytes reserved for the control block at the start of a mapped file.
pub const CONTROL_SIZE: usize = 4096;

/// Marks a formatted control block.
const FORMATTED: u32 = 0x5342_5553;

const _: () = assert!(size_of::<ControlBlock>() <= CONTROL_SIZE);

/// Where a channel's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RegionBackend {
    /// Private heap allocation
    #[default]
    Heap,
    /// Memory-mapped file `DCameraShm_<name>` inside `dir`, shareable
    /// across processes
    Mapped {
        /// Directory holding the region file
        dir: PathBuf,
    },
}

/// Channel state shared by every opener.
///
/// Positions are only read or written with the ring lock held. The
/// semaphore counts are updated lock-free.
#[derive(Debug, Default)]
#[repr(C)]
pub struct ControlBlock {
    magic: AtomicU32,
    ring_lock: AtomicU32,
    closed: AtomicU32,
    capacity: AtomicU64,
    max_messages: AtomicU64,
    attached: AtomicU64,
    read: AtomicU64,
    write: AtomicU64,
    write_slots: AtomicU64,
    read_ready: AtomicU64,
}

impl ControlBlock {
    /// Reset to an empty ring with one opener attached.
    fn format(&self, capacity: usize, max_messages: usize) {
        self.capacity.store(capacity as u64, Ordering::Relaxed);
        self.max_messages.store(max_messages as u64, Ordering::Relaxed);
        self.read.store(0, Ordering::Relaxed);
        self.write.store(0, Ordering::Relaxed);
        self.write_slots.store(max_messages as u64, Ordering::Relaxed);
        self.read_ready.store(0, Ordering::Relaxed);
        self.closed.store(0, Ordering::Relaxed);
        self.ring_lock.store(0, Ordering::Relaxed);
        self.attached.store(1, Ordering::Relaxed);
        self.magic.store(FORMATTED, Ordering::Release);
    }

    /// Formatted and still attached by someone.
    fn is_live(&self) -> bool {
        self.magic.load(Ordering::Acquire) == FORMATTED && self.attached.load(Ordering::Acquire) > 0
    }

    fn matches(&self, capacity: usize, max_messages: usize) -> bool {
        self.capacity.load(Ordering::Relaxed) == capacity as u64
            && self.max_messages.load(Ordering::Relaxed) == max_messages as u64
    }

    fn attach(&self) {
        self.attached.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns true for the last opener out.
    fn detach(&self) -> bool {
        self.attached.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Take the ring lock, spinning with backoff.
    pub(crate) fn lock_ring(&self) -> RingLock<'_> {
        let mut backoff = Backoff::new();
        while self.ring_lock.compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed).is_err() {
            backoff.snooze();
        }
        RingLock { lock: &self.ring_lock }
    }

    pub(crate) fn read_position(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    pub(crate) fn write_position(&self) -> u64 {
        self.write.load(Ordering::Relaxed)
    }

    pub(crate) fn set_read_position(&self, position: u64) {
        self.read.store(position, Ordering::Relaxed);
    }

    pub(crate) fn set_write_position(&self, position: u64) {
        self.write.store(position, Ordering::Relaxed);
    }

    /// Free write slots, capped at `max_messages`.
    pub(crate) fn write_slots(&self) -> Semaphore<'_> {
        Semaphore::new(&self.write_slots, &self.closed, self.max_messages.load(Ordering::Relaxed))
    }

    /// Records published and not yet consumed.
    pub(crate) fn read_ready(&self) -> Semaphore<'_> {
        Semaphore::new(&self.read_ready, &self.closed, u64::MAX)
    }

    /// Fail every current and future semaphore wait.
    pub(crate) fn close(&self) {
        self.closed.store(1, Ordering::Release);
    }
}

/// Held ring lock. Released on drop.
pub(crate) struct RingLock<'a> {
    lock: &'a AtomicU32,
}

impl Drop for RingLock<'_> {
    fn drop(&mut self) {
        self.lock.store(0, Ordering::Release);
    }
}

enum ControlStorage {
    Heap(Box<ControlBlock>),
    Mapped(MmapMut),
}

/// Owner of a control block, wherever it lives.
pub struct Control {
    storage: ControlStorage,
}

impl Control {
    fn heap(capacity: usize, max_messages: usize) -> Self {
        let block = Box::new(ControlBlock::default());
        block.format(capacity, max_messages);
        Self { storage: ControlStorage::Heap(block) }
    }

    fn map(file: &File) -> io::Result<Self> {
        // SAFETY: the file stays open for the mapping's lifetime and is at
        // least CONTROL_SIZE bytes long. Concurrent writers only touch the
        // block through atomics, which tolerate shared mutation.
        let map = unsafe { MmapOptions::new().len(CONTROL_SIZE).map_mut(file)? };
        Ok(Self { storage: ControlStorage::Mapped(map) })
    }
}

impl Deref for Control {
    type Target = ControlBlock;

    #[allow(clippy::cast_ptr_alignment)]
    fn deref(&self) -> &ControlBlock {
        match &self.storage {
            ControlStorage::Heap(block) => &**block,
            // SAFETY: the mapping starts on a page boundary, so it is aligned
            // for ControlBlock, and spans CONTROL_SIZE >= size_of::<ControlBlock>()
            // bytes. ControlBlock is plain atomics, valid for any bit pattern,
            // and the returned borrow cannot outlive the mapping.
            ControlStorage::Mapped(map) => unsafe { &*map.as_ptr().cast::<ControlBlock>() },
        }
    }
}

impl fmt::Debug for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// Fixed-size ring storage plus the control block every opener shares.
pub trait SharedRegion: Send {
    /// Ring size in bytes.
    fn len(&self) -> usize;

    /// Whether the ring has zero size.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read view of the ring bytes.
    fn as_slice(&self) -> &[u8];

    /// Write view of the ring bytes.
    fn as_mut_slice(&mut self) -> &mut [u8];

    /// Control block of this region.
    fn control(&self) -> Arc<Control>;
}

/// Heap-allocated region, private to one [`crate::BusContext`].
pub struct HeapRegion {
    bytes: Box<[u8]>,
    control: Arc<Control>,
}

impl HeapRegion {
    /// Zeroed ring of `len` bytes with `max_messages` write slots.
    pub fn new(len: usize, max_messages: usize) -> Self {
        Self { bytes: vec![0u8; len].into_boxed_slice(), control: Arc::new(Control::heap(len, max_messages)) }
    }
}

impl SharedRegion for HeapRegion {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    fn control(&self) -> Arc<Control> {
        Arc::clone(&self.control)
    }
}

/// File-backed region mapped read/write.
///
/// Every opener of the same path, in this process or another, shares the
/// ring bytes and the control block. The file is removed when the last
/// opener drops, mirroring unlink of a named shared-memory object.
pub struct MappedRegion {
    ring: MmapMut,
    control: Arc<Control>,
    path: PathBuf,
    file: File,
}

impl MappedRegion {
    /// Create or attach to `DCameraShm_<name>` in `dir`.
    ///
    /// # Errors
    ///
    /// - `BusError::ConfigMismatch` if a live region at that path has a
    ///   different capacity or slot count
    /// - `BusError::Region` if the file cannot be opened, locked or mapped
    pub fn open(dir: &Path, name: &str, len: usize, max_messages: usize) -> Result<Self, BusError> {
        let path = dir.join(format!("{REGION_FILE_PREFIX}{name}"));
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(&path)?;

        file.lock()?;
        let opened = Self::attach_locked(&file, name, len, max_messages);
        if let Err(e) = file.unlock() {
            tracing::warn!(path = %path.display(), "failed to unlock region file: {}", e);
        }
        let (ring, control, formatted) = opened?;

        tracing::debug!(path = %path.display(), len, formatted, "mapped bus region");
        Ok(Self { ring, control: Arc::new(control), path, file })
    }

    /// Map the file, formatting it unless a live opener already did.
    /// Caller holds the file lock.
    fn attach_locked(
        file: &File,
        name: &str,
        len: usize,
        max_messages: usize,
    ) -> Result<(MmapMut, Control, bool), BusError> {
        let total = (CONTROL_SIZE + len) as u64;
        if file.metadata()?.len() < CONTROL_SIZE as u64 {
            file.set_len(total)?;
        }

        let control = Control::map(file)?;
        let live = control.is_live();
        if live {
            if !control.matches(len, max_messages) || file.metadata()?.len() != total {
                return Err(BusError::ConfigMismatch { name: name.to_owned() });
            }
        } else {
            file.set_len(total)?;
        }

        // SAFETY: as for the control mapping; the ring range lies entirely
        // within the file, whose length no opener changes while it is live.
        let ring = unsafe { MmapOptions::new().offset(CONTROL_SIZE as u64).len(len).map_mut(file)? };

        if live {
            control.attach();
        } else {
            control.format(len, max_messages);
        }
        Ok((ring, control, !live))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SharedRegion for MappedRegion {
    fn len(&self) -> usize {
        self.ring.len()
    }

    fn as_slice(&self) -> &[u8] {
        &self.ring
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.ring
    }

    fn control(&self) -> Arc<Control> {
        Arc::clone(&self.control)
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Err(e) = self.file.lock() {
            tracing::warn!(path = %self.path.display(), "failed to lock region file: {}", e);
            return;
        }
        if self.control.detach()
            && let Err(e) = fs::remove_file(&self.path)
        {
            tracing::warn!(path = %self.path.display(), "failed to remove region file: {}", e);
        }
        let _ = self.file.unlock();
    }
}

/// Open a ring of `len` bytes with `max_messages` slots for channel `name`.
///
/// # Errors
///
/// See [`MappedRegion::open`]. The heap backend cannot fail.
pub fn open_region(
    backend: &RegionBackend,
    name: &str,
    len: usize,
    max_messages: usize,
) -> Result<Box<dyn SharedRegion>, BusError> {
    match backend {
        RegionBackend::Heap => Ok(Box::new(HeapRegion::new(len, max_messages))),
        RegionBackend::Mapped { dir } => Ok(Box::new(MappedRegion::open(dir, name, len, max_messages)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_region_is_zeroed_and_formatted() {
        let region = HeapRegion::new(64, 4);
        assert_eq!(region.len(), 64);
        assert!(region.as_slice().iter().all(|&b| b == 0));

        let control = region.control();
        assert!(control.is_live());
        assert_eq!(control.write_slots().available(), 4);
        assert_eq!(control.read_ready().available(), 0);
    }

    #[test]
    fn mapped_region_writes_reach_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut region = MappedRegion::open(dir.path(), "unit", 128, 4).unwrap();
        region.as_mut_slice()[..4].copy_from_slice(b"ping");
        region.ring.flush().unwrap();

        let on_disk = fs::read(region.path()).unwrap();
        assert_eq!(on_disk.len(), CONTROL_SIZE + 128);
        assert_eq!(&on_disk[CONTROL_SIZE..CONTROL_SIZE + 4], b"ping");
    }

    #[test]
    fn second_mapping_sees_first_mappings_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = MappedRegion::open(dir.path(), "twice", 64, 4).unwrap();
        let second = MappedRegion::open(dir.path(), "twice", 64, 4).unwrap();

        first.as_mut_slice()[0] = 0xAB;
        first.control().set_write_position(9);
        assert!(first.control().write_slots().try_acquire());

        assert_eq!(second.as_slice()[0], 0xAB);
        assert_eq!(second.control().write_position(), 9);
        assert_eq!(second.control().write_slots().available(), 3);
    }

    #[test]
    fn live_region_rejects_other_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let _first = MappedRegion::open(dir.path(), "geom", 64, 4).unwrap();
        assert!(matches!(
            MappedRegion::open(dir.path(), "geom", 128, 4),
            Err(BusError::ConfigMismatch { .. })
        ));
        assert!(matches!(
            MappedRegion::open(dir.path(), "geom", 64, 8),
            Err(BusError::ConfigMismatch { .. })
        ));
    }

    #[test]
    fn last_opener_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let first = MappedRegion::open(dir.path(), "gone", 16, 1).unwrap();
        let second = MappedRegion::open(dir.path(), "gone", 16, 1).unwrap();
        let path = first.path().to_path_buf();

        drop(first);
        assert!(path.exists());
        drop(second);
        assert!(!path.exists());
    }

    #[test]
    fn stale_file_is_reformatted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("DCameraShm_stale"), vec![0xFF; 10]).unwrap();

        let region = MappedRegion::open(dir.path(), "stale", 32, 2).unwrap();
        let control = region.control();
        assert_eq!(control.read_position(), 0);
        assert_eq!(control.write_position(), 0);
        assert_eq!(control.write_slots().available(), 2);
    }
}
