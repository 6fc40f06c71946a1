//! Mapped region management and operations

pub mod config;
pub mod mapped;
pub mod records;

pub use config::{page_size, valid_path, Advice, LockMode, MapConfig, SyncMode, Visibility};
pub use mapped::MappedRegion;
pub use records::RecordRegion;
