//! Configuration types for mapped regions

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use nix::sys::mman::{MapFlags, MmapAdvise, MsFlags, ProtFlags};
use serde::{Deserialize, Serialize};

use crate::error::{MapfileError, Result};

/// Visibility of writes through the mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    /// Writes are carried through to the backing file (MAP_SHARED)
    Shared,
    /// Writes stay private to this process (MAP_PRIVATE, copy-on-write)
    Private,
}

impl Default for Visibility {
    fn default() -> Self {
        Self::Shared
    }
}

impl Visibility {
    pub(crate) fn map_flags(self) -> MapFlags {
        match self {
            Visibility::Shared => MapFlags::MAP_SHARED,
            Visibility::Private => MapFlags::MAP_PRIVATE,
        }
    }
}

/// Advisory lock mode placed on the backing file while mapped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockMode {
    /// Shared lock; other shared holders may map the file concurrently
    Shared,
    /// Exclusive lock; no other holder may lock the file
    Exclusive,
}

impl Default for LockMode {
    fn default() -> Self {
        Self::Shared
    }
}

/// When a flush is considered complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Flush returns once the write-back has completed (MS_SYNC)
    Synchronous,
    /// Flush schedules the write-back and returns immediately (MS_ASYNC)
    Asynchronous,
}

impl Default for SyncMode {
    fn default() -> Self {
        Self::Asynchronous
    }
}

impl SyncMode {
    pub(crate) fn ms_flags(self) -> MsFlags {
        match self {
            SyncMode::Synchronous => MsFlags::MS_SYNC,
            SyncMode::Asynchronous => MsFlags::MS_ASYNC,
        }
    }
}

/// Access-pattern hints forwarded to the kernel via madvise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Advice {
    /// No special expectations
    Normal,
    /// Expect random access; read-ahead is counterproductive
    Random,
    /// Expect sequential access; aggressive read-ahead pays off
    Sequential,
    /// The range will be needed soon
    WillNeed,
    /// The range will not be needed soon
    DontNeed,
}

impl Advice {
    pub(crate) fn mmap_advise(self) -> MmapAdvise {
        match self {
            Advice::Normal => MmapAdvise::MADV_NORMAL,
            Advice::Random => MmapAdvise::MADV_RANDOM,
            Advice::Sequential => MmapAdvise::MADV_SEQUENTIAL,
            Advice::WillNeed => MmapAdvise::MADV_WILLNEED,
            Advice::DontNeed => MmapAdvise::MADV_DONTNEED,
        }
    }
}

/// Configuration for a mapped region.
///
/// Captures everything `open` needs: the backing path, the byte geometry of
/// the mapping, and named options for each of the flag families the
/// lifecycle touches. The named options are translated to the underlying
/// bit patterns only at the syscall boundary.
#[derive(Debug, Clone)]
pub struct MapConfig {
    /// Backing file location; must exist or have an existing parent directory
    pub path: PathBuf,
    /// Size of the region in bytes
    pub capacity: usize,
    /// Start position within the file, in bytes; must be page-aligned
    pub offset: usize,
    /// Preferred virtual address for the mapping; None lets the OS choose
    pub address_hint: Option<NonZeroUsize>,
    /// Create the backing file if it does not exist
    pub create: bool,
    /// Unix permissions applied when the file is created
    pub permissions: u32,
    /// Open the file read-write and map it writable
    pub writable: bool,
    /// Whether writes through the mapping reach the backing file
    pub visibility: Visibility,
    /// Advisory lock mode held while the region is mapped
    pub lock: LockMode,
    /// Block waiting for the advisory lock rather than failing immediately
    pub lock_blocking: bool,
    /// Default flush completion semantics
    pub sync: SyncMode,
    /// Allow the kernel to move the mapping when remapping
    pub remap_may_move: bool,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            capacity: 0,
            offset: 0,
            address_hint: None,
            create: true,
            permissions: 0o644,
            writable: true,
            visibility: Visibility::default(),
            lock: LockMode::default(),
            lock_blocking: true,
            sync: SyncMode::default(),
            remap_may_move: true,
        }
    }
}

impl MapConfig {
    /// Create a configuration for `capacity` bytes backed by `path`
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity,
            ..Default::default()
        }
    }

    /// Set the byte offset of the mapping within the file
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Set the preferred virtual address for the mapping
    pub fn with_address_hint(mut self, hint: NonZeroUsize) -> Self {
        self.address_hint = Some(hint);
        self
    }

    /// Set whether the backing file is created if missing
    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Set the permissions used when the backing file is created
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Set whether the region is writable
    pub fn with_writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// Set the visibility of writes through the mapping
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Set the advisory lock mode
    pub fn with_lock(mut self, lock: LockMode) -> Self {
        self.lock = lock;
        self
    }

    /// Set whether lock acquisition blocks or fails immediately
    pub fn with_lock_blocking(mut self, blocking: bool) -> Self {
        self.lock_blocking = blocking;
        self
    }

    /// Set the default flush completion semantics
    pub fn with_sync(mut self, sync: SyncMode) -> Self {
        self.sync = sync;
        self
    }

    /// Set whether remapping may move the mapping
    pub fn with_remap_may_move(mut self, may_move: bool) -> Self {
        self.remap_may_move = may_move;
        self
    }

    /// Validate the configuration.
    ///
    /// Checks the invariants `open` relies on: non-zero capacity, a
    /// page-aligned offset, a usable path, and a flag combination the OS
    /// can honor. Run at region construction so misconfiguration surfaces
    /// before any syscall.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(MapfileError::invalid_parameter(
                "capacity",
                "region capacity must be greater than 0",
            ));
        }

        let page = page_size();
        if self.offset % page != 0 {
            return Err(MapfileError::invalid_parameter(
                "offset",
                format!(
                    "offset {} is not aligned to the page size {}",
                    self.offset, page
                ),
            ));
        }

        if self.create && !self.writable {
            return Err(MapfileError::invalid_parameter(
                "create",
                "creating the backing file requires a writable region",
            ));
        }

        if self.offset.checked_add(self.capacity).is_none() {
            return Err(MapfileError::invalid_parameter(
                "capacity",
                "offset + capacity overflows",
            ));
        }

        if !valid_path(&self.path) {
            return Err(MapfileError::path(&self.path));
        }

        Ok(())
    }

    pub(crate) fn prot_flags(&self) -> ProtFlags {
        if self.writable {
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE
        } else {
            ProtFlags::PROT_READ
        }
    }

    pub(crate) fn lock_operation(&self) -> libc::c_int {
        let mode = match self.lock {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        };
        if self.lock_blocking {
            mode
        } else {
            mode | libc::LOCK_NB
        }
    }
}

/// Check whether a path is usable as a mapping backing: either the path
/// itself exists, or its parent directory does (so the file can be created).
pub fn valid_path(path: &Path) -> bool {
    if path.exists() {
        return true;
    }

    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.exists(),
        _ => false,
    }
}

/// The system page size; mapping offsets must be multiples of this
pub fn page_size() -> usize {
    // sysconf(_SC_PAGESIZE) cannot fail on any supported platform
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
