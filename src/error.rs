//! Error types and handling for mapfile

use std::path::PathBuf;

use nix::errno::Errno;

/// Result type alias for mapfile operations
pub type Result<T> = std::result::Result<T, MapfileError>;

/// Error taxonomy for the mapped-region lifecycle.
///
/// Every operating-system call a region performs (`open`, `flock`,
/// `ftruncate`, `mmap`, `msync`, `munmap`, `close`, `mremap`, `madvise`)
/// can fail independently and maps to its own variant, so callers can tell
/// exactly which step of the lifecycle went wrong.
#[derive(Debug, thiserror::Error)]
pub enum MapfileError {
    /// Neither the path nor its parent directory exists
    #[error("invalid path '{path}': file and parent directory do not exist")]
    Path { path: PathBuf },

    /// Invalid parameters or configuration
    #[error("invalid parameter: {parameter} - {message}")]
    InvalidParameter {
        parameter: &'static str,
        message: String,
    },

    /// The region is already mapped; `open` requires an unopened region
    #[error("region is already mapped; call remap to resize it")]
    AlreadyMapped,

    /// The region is not mapped; the operation requires an open mapping
    #[error("region is not mapped")]
    NotMapped,

    /// Opening the backing file failed
    #[error("failed to open backing file: {source}")]
    Open {
        #[source]
        source: std::io::Error,
    },

    /// Placing the advisory lock failed
    #[error("failed to lock backing file: {source}")]
    Lock {
        #[source]
        source: Errno,
    },

    /// Resizing the backing file failed
    #[error("failed to resize backing file to {bytes} bytes: {source}")]
    Resize {
        bytes: u64,
        #[source]
        source: std::io::Error,
    },

    /// The mmap call itself failed
    #[error("failed to map {bytes} bytes at file offset {offset}: {source}")]
    Map {
        bytes: usize,
        offset: u64,
        #[source]
        source: Errno,
    },

    /// Writing a mapped range back to the file failed
    #[error("failed to synchronize mapped range {range}: {source}")]
    Sync {
        range: String,
        #[source]
        source: Errno,
    },

    /// Unmapping the region failed
    #[error("failed to unmap region: {source}")]
    Unmap {
        #[source]
        source: Errno,
    },

    /// Releasing the advisory lock failed
    #[error("failed to unlock backing file: {source}")]
    Unlock {
        #[source]
        source: Errno,
    },

    /// Closing the file descriptor failed
    #[error("failed to close backing file descriptor: {source}")]
    Close {
        #[source]
        source: Errno,
    },

    /// Resizing or moving the active mapping failed
    #[error("failed to remap region to {bytes} bytes: {source}")]
    Remap {
        bytes: usize,
        #[source]
        source: Errno,
    },

    /// Advising the kernel about the mapped range failed
    #[error("failed to advise kernel about mapped range: {source}")]
    Advise {
        #[source]
        source: Errno,
    },
}

impl MapfileError {
    /// Create a path error
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path { path: path.into() }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter,
            message: message.into(),
        }
    }

    /// Create an open error from the underlying I/O error
    pub fn open(source: std::io::Error) -> Self {
        Self::Open { source }
    }

    /// Create a lock error from the underlying errno
    pub fn lock(source: Errno) -> Self {
        Self::Lock { source }
    }

    /// Create a resize error for a target length
    pub fn resize(bytes: u64, source: std::io::Error) -> Self {
        Self::Resize { bytes, source }
    }

    /// Create a map error for a byte range at a file offset
    pub fn map(bytes: usize, offset: u64, source: Errno) -> Self {
        Self::Map {
            bytes,
            offset,
            source,
        }
    }

    /// Create a sync error carrying a human-readable address range
    pub fn sync(start: usize, len: usize, source: Errno) -> Self {
        Self::Sync {
            range: format!("{:#x}..{:#x}", start, start + len),
            source,
        }
    }

    /// Create a remap error for a requested capacity
    pub fn remap(bytes: usize, source: Errno) -> Self {
        Self::Remap { bytes, source }
    }
}
