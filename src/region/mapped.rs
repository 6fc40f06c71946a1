//! File-backed mapped region lifecycle.
//!
//! A [`MappedRegion`] owns one file descriptor and one mapping of the byte
//! range `[offset, offset + capacity)` of its backing file. The lifecycle is
//! `open` (open file, place advisory lock, size the file, map) and `close`
//! (flush, unmap, unlock, close descriptor), with `flush` and `remap`
//! available in between.
//!
//! `open` requires an unopened region; `flush`, `close`, `remap` and
//! `advise` require a mapped one. A failed step inside `open` does not roll
//! back the steps that already succeeded: a failed mmap leaves the
//! descriptor open and the lock held, and releasing them is deferred to
//! `Drop`. Every failure path emits one diagnostic through `tracing` before
//! returning.

use std::ffi::c_void;
use std::fs::{File, OpenOptions};
use std::num::NonZeroUsize;
use std::os::fd::{AsRawFd, IntoRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::ptr::NonNull;

use nix::errno::Errno;
use nix::sys::mman::{madvise, mmap, msync, munmap, MsFlags};
#[cfg(target_os = "linux")]
use nix::sys::mman::{mremap, MRemapFlags};
use tracing::{debug, error, warn};

use crate::error::{MapfileError, Result};

use super::config::{page_size, valid_path, Advice, MapConfig, SyncMode};

/// A live association between a byte range of a file and a range of process
/// virtual memory.
///
/// The region is move-only: the descriptor and the mapping are unique
/// resources, so the type is deliberately not `Clone`. Dropping a region
/// that is still mapped performs `close` and logs any failure instead of
/// panicking.
#[derive(Debug)]
pub struct MappedRegion {
    /// Immutable configuration captured at construction
    config: MapConfig,
    /// Current byte capacity of the mapping; updated by `remap`
    capacity_bytes: usize,
    /// Flush semantics used by the zero-argument `flush`
    sync: SyncMode,
    /// Backing file handle; held from open until close
    file: Option<File>,
    /// Mapping base address; Some iff the region is mapped
    address: Option<NonNull<c_void>>,
}

impl MappedRegion {
    /// Construct an unopened region from a validated configuration.
    ///
    /// Fails fast if the configuration is unusable (zero capacity,
    /// misaligned offset, or a path whose file and parent directory both
    /// do not exist). Does not touch the filesystem beyond the path check.
    pub fn new(config: MapConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            capacity_bytes: config.capacity,
            sync: config.sync,
            file: None,
            address: None,
            config,
        })
    }

    /// Open the backing file, lock it, size it, and map it.
    ///
    /// Performs the four steps in order and short-circuits on the first
    /// failure. Resources acquired by earlier steps of the same call are
    /// not released on failure; they are held until the region is dropped.
    pub fn open(&mut self) -> Result<NonNull<c_void>> {
        if self.address.is_some() {
            error!(path = %self.config.path.display(), "open rejected: region is already mapped");
            return Err(MapfileError::AlreadyMapped);
        }

        // The path may have disappeared since construction
        if !valid_path(&self.config.path) {
            error!(path = %self.config.path.display(), "open rejected: backing path is no longer valid");
            return Err(MapfileError::path(&self.config.path));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(self.config.writable)
            .create(self.config.create)
            .truncate(false)
            .mode(self.config.permissions)
            .open(&self.config.path)
            .map_err(|err| {
                error!(path = %self.config.path.display(), %err, "failed to open backing file");
                MapfileError::open(err)
            })?;

        match self.lock_size_map(&file) {
            Ok(address) => {
                debug!(
                    path = %self.config.path.display(),
                    capacity = self.capacity_bytes,
                    offset = self.config.offset,
                    address = ?address,
                    "mapped region opened"
                );
                self.file = Some(file);
                self.address = Some(address);
                Ok(address)
            }
            Err(err) => {
                // Keep the descriptor (and any lock on it) held; Drop
                // releases it. This mirrors the no-rollback contract.
                self.file = Some(file);
                Err(err)
            }
        }
    }

    /// Lock, size, and map an already-open backing file
    fn lock_size_map(&self, file: &File) -> Result<NonNull<c_void>> {
        let fd = file.as_raw_fd();

        if unsafe { libc::flock(fd, self.config.lock_operation()) } == -1 {
            let errno = Errno::last();
            error!(path = %self.config.path.display(), %errno, "failed to place advisory lock");
            return Err(MapfileError::lock(errno));
        }

        self.size_backing_file(file)?;

        let length = NonZeroUsize::new(self.capacity_bytes)
            .ok_or_else(|| MapfileError::invalid_parameter("capacity", "capacity is zero"))?;

        let address = unsafe {
            mmap(
                self.config.address_hint,
                length,
                self.config.prot_flags(),
                self.config.visibility.map_flags(),
                file,
                self.config.offset as libc::off_t,
            )
        }
        .map_err(|errno| {
            error!(
                path = %self.config.path.display(),
                capacity = self.capacity_bytes,
                offset = self.config.offset,
                %errno,
                "failed to map backing file"
            );
            MapfileError::map(self.capacity_bytes, self.config.offset as u64, errno)
        })?;

        Ok(address)
    }

    /// Bring the backing file to the length the mapping needs.
    ///
    /// With a zero offset the file is set to exactly the region capacity,
    /// truncating or extending as needed. With a non-zero offset the file
    /// is only ever extended, so disjoint regions of one file cannot
    /// truncate each other. Read-only regions never resize; they require
    /// the file to already cover the mapped range.
    fn size_backing_file(&self, file: &File) -> Result<()> {
        let target = (self.config.offset + self.capacity_bytes) as u64;
        let current = file
            .metadata()
            .map_err(|err| {
                error!(path = %self.config.path.display(), %err, "failed to stat backing file");
                MapfileError::resize(target, err)
            })?
            .len();

        if !self.config.writable {
            if current < target {
                let err = std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("backing file is {} bytes, mapped range needs {}", current, target),
                );
                error!(path = %self.config.path.display(), %err, "read-only region cannot resize backing file");
                return Err(MapfileError::resize(target, err));
            }
            return Ok(());
        }

        let must_resize = if self.config.offset == 0 {
            current != target
        } else {
            current < target
        };

        if must_resize {
            file.set_len(target).map_err(|err| {
                error!(path = %self.config.path.display(), target_len = target, %err, "failed to resize backing file");
                MapfileError::resize(target, err)
            })?;
        }

        Ok(())
    }

    /// Flush the whole mapped range using the stored sync semantics
    pub fn flush(&mut self) -> Result<()> {
        self.flush_range(0, self.capacity_bytes, self.sync)
    }

    /// Flush `len` bytes starting `offset` bytes into the mapping.
    ///
    /// `offset` must be page-aligned (msync requirement). On success the
    /// given `mode` becomes the new default for subsequent zero-argument
    /// flushes.
    pub fn flush_range(&mut self, offset: usize, len: usize, mode: SyncMode) -> Result<()> {
        let address = match self.address {
            Some(address) => address,
            None => {
                error!(path = %self.config.path.display(), "flush rejected: region is not mapped");
                return Err(MapfileError::NotMapped);
            }
        };

        if !valid_path(&self.config.path) {
            error!(path = %self.config.path.display(), "flush rejected: backing path is no longer valid");
            return Err(MapfileError::path(&self.config.path));
        }

        let end = offset.checked_add(len).filter(|end| *end <= self.capacity_bytes);
        if end.is_none() {
            return Err(MapfileError::invalid_parameter(
                "len",
                format!(
                    "range starting at {} with length {} exceeds region capacity {}",
                    offset, len, self.capacity_bytes
                ),
            ));
        }

        // msync rejects unaligned start addresses; fail deterministically
        // instead of surfacing the EINVAL as a sync failure
        let page = page_size();
        if offset % page != 0 {
            return Err(MapfileError::invalid_parameter(
                "offset",
                format!("offset {} is not aligned to the page size {}", offset, page),
            ));
        }

        // Within the mapping and derived from a non-null base
        let start =
            unsafe { NonNull::new_unchecked(address.as_ptr().cast::<u8>().add(offset).cast()) };

        if let Err(errno) = unsafe { msync(start, len, mode.ms_flags()) } {
            let start_addr = start.as_ptr() as usize;
            error!(
                path = %self.config.path.display(),
                range = %format!("{:#x}..{:#x}", start_addr, start_addr + len),
                %errno,
                "failed to synchronize mapped range"
            );
            return Err(MapfileError::sync(start_addr, len, errno));
        }

        self.sync = mode;
        Ok(())
    }

    /// Flush synchronously, unmap, unlock, and close the descriptor.
    ///
    /// The first failing step short-circuits and leaves the region in an
    /// indeterminate state; the caller can only drop it at that point. On
    /// success the region returns to the unopened state and can be opened
    /// again.
    pub fn close(&mut self) -> Result<()> {
        let address = match self.address {
            Some(address) => address,
            None => {
                error!(path = %self.config.path.display(), "close rejected: region is not mapped");
                return Err(MapfileError::NotMapped);
            }
        };

        if !valid_path(&self.config.path) {
            error!(path = %self.config.path.display(), "close rejected: backing path is no longer valid");
            return Err(MapfileError::path(&self.config.path));
        }

        // Teardown order: flush, unmap, unlock, close descriptor
        if let Err(errno) = unsafe { msync(address, self.capacity_bytes, MsFlags::MS_SYNC) } {
            let start = address.as_ptr() as usize;
            error!(path = %self.config.path.display(), %errno, "failed to flush region during close");
            return Err(MapfileError::sync(start, self.capacity_bytes, errno));
        }

        if let Err(errno) = unsafe { munmap(address, self.capacity_bytes) } {
            error!(path = %self.config.path.display(), %errno, "failed to unmap region");
            return Err(MapfileError::Unmap { source: errno });
        }
        self.address = None;

        let file = match self.file.take() {
            Some(file) => file,
            None => return Err(MapfileError::NotMapped),
        };

        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) } == -1 {
            let errno = Errno::last();
            error!(path = %self.config.path.display(), %errno, "failed to release advisory lock");
            // The descriptor stays owned so Drop can still release it
            self.file = Some(file);
            return Err(MapfileError::Unlock { source: errno });
        }

        let fd = file.into_raw_fd();
        if unsafe { libc::close(fd) } == -1 {
            let errno = Errno::last();
            error!(path = %self.config.path.display(), %errno, "failed to close backing file descriptor");
            return Err(MapfileError::Close { source: errno });
        }

        debug!(path = %self.config.path.display(), "mapped region closed");
        Ok(())
    }

    /// Resize the active mapping using the stored remap flags
    #[cfg(target_os = "linux")]
    pub fn remap(&mut self, new_capacity: usize) -> Result<NonNull<c_void>> {
        self.remap_with(new_capacity, self.config.remap_may_move)
    }

    /// Resize the active mapping, optionally allowing the kernel to move it.
    ///
    /// When growing, the backing file is extended first so the new tail of
    /// the mapping is backed by real file bytes. On success the stored
    /// address and capacity are updated; on failure the region state is
    /// unchanged.
    #[cfg(target_os = "linux")]
    pub fn remap_with(&mut self, new_capacity: usize, may_move: bool) -> Result<NonNull<c_void>> {
        let address = match self.address {
            Some(address) => address,
            None => {
                error!(path = %self.config.path.display(), "remap rejected: region is not mapped");
                return Err(MapfileError::NotMapped);
            }
        };

        if !valid_path(&self.config.path) {
            error!(path = %self.config.path.display(), "remap rejected: backing path is no longer valid");
            return Err(MapfileError::path(&self.config.path));
        }

        if new_capacity == 0 {
            return Err(MapfileError::invalid_parameter(
                "new_capacity",
                "region capacity must be greater than 0",
            ));
        }

        let target = self
            .config
            .offset
            .checked_add(new_capacity)
            .ok_or_else(|| {
                MapfileError::invalid_parameter("new_capacity", "offset + capacity overflows")
            })? as u64;

        if new_capacity > self.capacity_bytes {
            let file = match self.file.as_ref() {
                Some(file) => file,
                None => return Err(MapfileError::NotMapped),
            };
            file.set_len(target).map_err(|err| {
                error!(path = %self.config.path.display(), target_len = target, %err, "failed to extend backing file for remap");
                MapfileError::resize(target, err)
            })?;
        }

        let flags = if may_move {
            MRemapFlags::MREMAP_MAYMOVE
        } else {
            MRemapFlags::empty()
        };

        let new_address =
            unsafe { mremap(address, self.capacity_bytes, new_capacity, flags, None) }.map_err(
                |errno| {
                    error!(
                        path = %self.config.path.display(),
                        old_capacity = self.capacity_bytes,
                        new_capacity,
                        %errno,
                        "failed to remap region"
                    );
                    MapfileError::remap(new_capacity, errno)
                },
            )?;

        debug!(
            path = %self.config.path.display(),
            old_capacity = self.capacity_bytes,
            new_capacity,
            address = ?new_address,
            "region remapped"
        );
        self.address = Some(new_address);
        self.capacity_bytes = new_capacity;
        Ok(new_address)
    }

    /// Hint the kernel about the access pattern over the mapped range
    pub fn advise(&self, advice: Advice) -> Result<()> {
        let address = match self.address {
            Some(address) => address,
            None => {
                error!(path = %self.config.path.display(), "advise rejected: region is not mapped");
                return Err(MapfileError::NotMapped);
            }
        };

        unsafe { madvise(address, self.capacity_bytes, advice.mmap_advise()) }.map_err(|errno| {
            error!(path = %self.config.path.display(), %errno, "failed to advise kernel about mapped range");
            MapfileError::Advise { source: errno }
        })
    }

    /// The current mapping base address, or None while unopened
    pub fn address(&self) -> Option<NonNull<c_void>> {
        self.address
    }

    /// Whether the region currently holds an active mapping
    pub fn is_mapped(&self) -> bool {
        self.address.is_some()
    }

    /// The mapped range as a byte slice, or None while unopened
    pub fn as_slice(&self) -> Option<&[u8]> {
        self.address.map(|address| unsafe {
            std::slice::from_raw_parts(address.as_ptr().cast::<u8>(), self.capacity_bytes)
        })
    }

    /// The mapped range as a mutable byte slice.
    ///
    /// None while unopened, and None for read-only regions: the pages are
    /// mapped without PROT_WRITE, so handing out `&mut` would trap.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        if !self.config.writable {
            return None;
        }
        self.address.map(|address| unsafe {
            std::slice::from_raw_parts_mut(address.as_ptr().cast::<u8>(), self.capacity_bytes)
        })
    }

    /// Current byte capacity of the region
    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// Byte offset of the region within the backing file
    pub fn offset_bytes(&self) -> usize {
        self.config.offset
    }

    /// The backing file path
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// The flush semantics a zero-argument `flush` would use
    pub fn sync_mode(&self) -> SyncMode {
        self.sync
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if self.address.is_some() {
            if let Err(err) = self.close() {
                warn!(path = %self.config.path.display(), %err, "failed to close mapped region on drop");
            }
        }
        // A descriptor left over from a partially failed open is released
        // by the File handle dropping here.
    }
}

// The region owns its descriptor and mapping exclusively; moving it to
// another thread is sound. It is deliberately not Sync: concurrent access
// must be serialized by the caller.
unsafe impl Send for MappedRegion {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn region(dir: &TempDir, capacity: usize) -> MappedRegion {
        let config = MapConfig::new(dir.path().join("region.bin"), capacity);
        MappedRegion::new(config).unwrap()
    }

    #[test]
    fn test_open_requires_unopened() {
        let dir = TempDir::new().unwrap();
        let mut region = region(&dir, 4096);

        let first = region.open().unwrap();
        let err = region.open().unwrap_err();
        assert!(matches!(err, MapfileError::AlreadyMapped));
        // The existing mapping is untouched
        assert_eq!(region.address(), Some(first));
    }

    #[test]
    fn test_lifecycle_guards_require_mapped() {
        let dir = TempDir::new().unwrap();
        let mut region = region(&dir, 4096);

        assert!(matches!(region.flush(), Err(MapfileError::NotMapped)));
        assert!(matches!(region.close(), Err(MapfileError::NotMapped)));
        assert!(matches!(
            region.advise(Advice::Sequential),
            Err(MapfileError::NotMapped)
        ));
        #[cfg(target_os = "linux")]
        assert!(matches!(region.remap(8192), Err(MapfileError::NotMapped)));
    }

    #[test]
    fn test_accessors_while_unopened() {
        let dir = TempDir::new().unwrap();
        let mut region = region(&dir, 4096);

        assert!(!region.is_mapped());
        assert!(region.address().is_none());
        assert!(region.as_slice().is_none());
        assert!(region.as_mut_slice().is_none());
        assert_eq!(region.capacity_bytes(), 4096);
        assert_eq!(region.offset_bytes(), 0);
    }

    #[test]
    fn test_construction_rejects_parentless_path() {
        let dir = TempDir::new().unwrap();
        let config = MapConfig::new(dir.path().join("missing/region.bin"), 4096);
        let err = MappedRegion::new(config).unwrap_err();
        assert!(matches!(err, MapfileError::Path { .. }));
    }

    #[test]
    fn test_read_only_region_denies_mut_slice() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("region.bin");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();

        let config = MapConfig::new(&path, 4096)
            .with_create(false)
            .with_writable(false);
        let mut region = MappedRegion::new(config).unwrap();
        region.open().unwrap();

        assert!(region.as_slice().is_some());
        assert!(region.as_mut_slice().is_none());
        region.close().unwrap();
    }

    #[test]
    fn test_flush_range_bounds_check() {
        let dir = TempDir::new().unwrap();
        let mut region = region(&dir, 4096);
        region.open().unwrap();

        let err = region
            .flush_range(0, 8192, SyncMode::Asynchronous)
            .unwrap_err();
        assert!(matches!(err, MapfileError::InvalidParameter { .. }));
        region.close().unwrap();
    }

    #[test]
    fn test_flush_range_rejects_misaligned_offset() {
        let dir = TempDir::new().unwrap();
        let mut region = region(&dir, 8192);
        region.open().unwrap();

        // A misaligned start is rejected before the syscall, not reported
        // as a sync failure
        let err = region
            .flush_range(1, 4096, SyncMode::Asynchronous)
            .unwrap_err();
        assert!(matches!(err, MapfileError::InvalidParameter { .. }));
        region.close().unwrap();
    }

    #[test]
    fn test_flush_updates_stored_sync_mode() {
        let dir = TempDir::new().unwrap();
        let mut region = region(&dir, 4096);
        region.open().unwrap();

        assert_eq!(region.sync_mode(), SyncMode::Asynchronous);
        region
            .flush_range(0, 4096, SyncMode::Synchronous)
            .unwrap();
        assert_eq!(region.sync_mode(), SyncMode::Synchronous);
        region.close().unwrap();
    }
}
