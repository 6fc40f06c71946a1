//! Typed record view over a mapped region.
//!
//! [`RecordRegion<T>`] presents the [`MappedRegion`] lifecycle in units of a
//! fixed-size record type: a capacity of `n` records and an index of `i`
//! records become `n * size_of::<T>()` bytes at `i * size_of::<T>()`. It is
//! a unit-conversion adapter over a single embedded [`MappedRegion`], not a
//! second implementation of the lifecycle, so the two views cannot diverge.
//! Several regions with the same record type and disjoint index ranges form
//! a simple slab layout over one backing file.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::mem;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use bytemuck::Pod;

use crate::error::{MapfileError, Result};

use super::config::{Advice, MapConfig, SyncMode};
use super::mapped::MappedRegion;

/// A mapped region whose capacity and offset are expressed in records of a
/// fixed-size type `T` rather than bytes.
///
/// `T` must be plain old data ([`bytemuck::Pod`]): any bit pattern read
/// back from the file must be a valid `T`.
#[derive(Debug)]
pub struct RecordRegion<T> {
    inner: MappedRegion,
    _records: PhantomData<T>,
}

impl<T: Pod> RecordRegion<T> {
    /// Construct a region for `record_capacity` records at index 0 with
    /// default options
    pub fn new(path: impl Into<PathBuf>, record_capacity: usize) -> Result<Self> {
        Self::from_config(MapConfig::new(path, 0), record_capacity, 0)
    }

    /// Construct a region for `record_capacity` records starting at
    /// `record_index` with default options
    pub fn with_index(
        path: impl Into<PathBuf>,
        record_capacity: usize,
        record_index: usize,
    ) -> Result<Self> {
        Self::from_config(MapConfig::new(path, 0), record_capacity, record_index)
    }

    /// Construct a region from a full configuration.
    ///
    /// The configuration supplies the path and the flag options; its
    /// `capacity` and `offset` fields are replaced by the byte values
    /// derived from `record_capacity` and `record_index`.
    pub fn from_config(
        mut config: MapConfig,
        record_capacity: usize,
        record_index: usize,
    ) -> Result<Self> {
        let record_size = mem::size_of::<T>();
        if record_size == 0 {
            return Err(MapfileError::invalid_parameter(
                "T",
                "record type must not be zero-sized",
            ));
        }

        config.capacity = record_capacity.checked_mul(record_size).ok_or_else(|| {
            MapfileError::invalid_parameter(
                "record_capacity",
                "record capacity in bytes overflows",
            )
        })?;
        config.offset = record_index.checked_mul(record_size).ok_or_else(|| {
            MapfileError::invalid_parameter("record_index", "record offset in bytes overflows")
        })?;

        Ok(Self {
            inner: MappedRegion::new(config)?,
            _records: PhantomData,
        })
    }

    /// Open the backing file and map the record range
    pub fn open(&mut self) -> Result<NonNull<T>> {
        self.inner.open().map(NonNull::cast)
    }

    /// Flush all records using the stored sync semantics
    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    /// Flush `record_count` records starting at record `first` within the
    /// region; the starting record must fall on a page boundary
    pub fn flush_records(&mut self, first: usize, record_count: usize, mode: SyncMode) -> Result<()> {
        let record_size = mem::size_of::<T>();
        let offset = first.checked_mul(record_size).ok_or_else(|| {
            MapfileError::invalid_parameter("first", "record offset in bytes overflows")
        })?;
        let len = record_count.checked_mul(record_size).ok_or_else(|| {
            MapfileError::invalid_parameter("record_count", "record length in bytes overflows")
        })?;
        self.inner.flush_range(offset, len, mode)
    }

    /// Flush, unmap, unlock, and close; the region can be opened again
    pub fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    /// Resize the active mapping to hold `new_record_capacity` records
    #[cfg(target_os = "linux")]
    pub fn remap(&mut self, new_record_capacity: usize) -> Result<NonNull<T>> {
        let bytes = new_record_capacity
            .checked_mul(mem::size_of::<T>())
            .ok_or_else(|| {
                MapfileError::invalid_parameter(
                    "new_record_capacity",
                    "record capacity in bytes overflows",
                )
            })?;
        self.inner.remap(bytes).map(NonNull::cast)
    }

    /// Hint the kernel about the access pattern over the record range
    pub fn advise(&self, advice: Advice) -> Result<()> {
        self.inner.advise(advice)
    }

    /// The mapped records, or None while unopened
    pub fn records(&self) -> Option<&[T]> {
        self.inner
            .as_slice()
            .and_then(|bytes| bytemuck::try_cast_slice(bytes).ok())
    }

    /// The mapped records mutably; None while unopened or for read-only
    /// regions
    pub fn records_mut(&mut self) -> Option<&mut [T]> {
        self.inner
            .as_mut_slice()
            .and_then(|bytes| bytemuck::try_cast_slice_mut(bytes).ok())
    }

    /// The current mapping base as a record pointer, or None while unopened
    pub fn address(&self) -> Option<NonNull<T>> {
        self.inner.address().map(NonNull::cast)
    }

    /// Whether the region currently holds an active mapping
    pub fn is_mapped(&self) -> bool {
        self.inner.is_mapped()
    }

    /// Capacity of the region in records; derived from the byte view
    pub fn record_capacity(&self) -> usize {
        self.inner.capacity_bytes() / mem::size_of::<T>()
    }

    /// Start of the region in records; derived from the byte view
    pub fn record_index(&self) -> usize {
        self.inner.offset_bytes() / mem::size_of::<T>()
    }

    /// Size of one record in bytes
    pub fn record_size(&self) -> usize {
        mem::size_of::<T>()
    }

    /// Current byte capacity of the underlying mapping
    pub fn capacity_bytes(&self) -> usize {
        self.inner.capacity_bytes()
    }

    /// Byte offset of the underlying mapping within the backing file
    pub fn offset_bytes(&self) -> usize {
        self.inner.offset_bytes()
    }

    /// The backing file path
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// The underlying byte-oriented region
    pub fn as_bytes(&self) -> &MappedRegion {
        &self.inner
    }
}

// Keep the raw c_void address reachable for callers that interoperate with
// the byte-oriented API.
impl<T: Pod> RecordRegion<T> {
    /// The current mapping base as a raw address, or None while unopened
    pub fn raw_address(&self) -> Option<NonNull<c_void>> {
        self.inner.address()
    }
}
