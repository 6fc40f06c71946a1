//! # mapfile - Managed file-backed memory mappings
//!
//! mapfile wraps the open → lock → size → map lifecycle of a memory-mapped
//! backing file in an owned region type with orderly, crash-safe teardown
//! (flush → unmap → unlock → close), plus a typed variant that addresses the
//! mapping as a dense array of fixed-size records.
//!
//! ## Features
//!
//! - **Owned lifecycle**: one region owns one descriptor and one mapping;
//!   regions are move-only, and dropping a mapped region closes it
//! - **Structured configuration**: named options per flag family (lock mode,
//!   visibility, sync semantics, remap policy), translated to OS bit
//!   patterns only at the syscall boundary
//! - **Typed record regions**: capacity and offset in records instead of
//!   bytes; disjoint record slabs can share one backing file
//! - **Advisory locking**: cross-process coordination via flock, shared or
//!   exclusive, blocking or not
//! - **Explicit durability**: flush a sub-range or the whole region,
//!   synchronously or asynchronously
//!
//! ## Example
//!
//! ```no_run
//! use mapfile::{MapConfig, MappedRegion};
//!
//! # fn main() -> mapfile::Result<()> {
//! let mut region = MappedRegion::new(MapConfig::new("/tmp/t.bin", 4096))?;
//! region.open()?;
//! if let Some(bytes) = region.as_mut_slice() {
//!     bytes[0] = 0x42;
//! }
//! region.flush()?;
//! region.close()?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod region;

pub use error::{MapfileError, Result};
pub use region::{
    page_size, Advice, LockMode, MapConfig, MappedRegion, RecordRegion, SyncMode, Visibility,
};
