//! Integration tests for the mapped region lifecycle

use mapfile::{LockMode, MapConfig, MapfileError, MappedRegion, SyncMode};
use tempfile::TempDir;

#[cfg(test)]
mod tests {
    use super::*;

    /// Route the crate's diagnostics through a real subscriber; repeated
    /// calls are fine, only the first installs it
    fn init_diagnostics() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn fresh_region(dir: &TempDir, name: &str, capacity: usize) -> MappedRegion {
        MappedRegion::new(MapConfig::new(dir.path().join(name), capacity)).unwrap()
    }

    #[test]
    fn test_open_maps_and_sizes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("region.bin");
        let mut region = MappedRegion::new(MapConfig::new(&path, 4096)).unwrap();

        let address = region.open().unwrap();
        assert_eq!(region.address(), Some(address));
        assert!(region.is_mapped());

        // The backing file was created and sized to cover the mapped range
        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, 4096);

        region.close().unwrap();
    }

    #[test]
    fn test_open_rejected_while_mapped() {
        init_diagnostics();
        let dir = TempDir::new().unwrap();
        let mut region = fresh_region(&dir, "region.bin", 4096);

        let address = region.open().unwrap();
        assert!(matches!(region.open(), Err(MapfileError::AlreadyMapped)));
        assert_eq!(region.address(), Some(address));

        region.close().unwrap();
    }

    #[test]
    fn test_close_reopen_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut region = fresh_region(&dir, "region.bin", 4096);

        region.open().unwrap();
        region.close().unwrap();
        assert!(region.address().is_none());
        assert!(!region.is_mapped());

        // A closed region can be opened again
        region.open().unwrap();
        assert!(region.is_mapped());
        region.close().unwrap();
    }

    #[test]
    fn test_operations_rejected_while_unopened() {
        init_diagnostics();
        let dir = TempDir::new().unwrap();
        let mut region = fresh_region(&dir, "region.bin", 4096);

        assert!(matches!(region.flush(), Err(MapfileError::NotMapped)));
        assert!(matches!(region.close(), Err(MapfileError::NotMapped)));
    }

    #[test]
    fn test_construction_fails_for_parentless_path() {
        let dir = TempDir::new().unwrap();
        let config = MapConfig::new(dir.path().join("no/such/dir/region.bin"), 4096);
        assert!(matches!(
            MappedRegion::new(config),
            Err(MapfileError::Path { .. })
        ));
    }

    #[test]
    fn test_durability_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.bin");

        let mut writer = MappedRegion::new(MapConfig::new(&path, 4096)).unwrap();
        writer.open().unwrap();
        writer.as_mut_slice().unwrap()[0] = 0x42;
        writer.flush().unwrap();
        writer.close().unwrap();

        // A fresh region over the same file and offset observes the write
        let mut reader = MappedRegion::new(MapConfig::new(&path, 4096)).unwrap();
        reader.open().unwrap();
        assert_eq!(reader.as_slice().unwrap()[0], 0x42);
        reader.close().unwrap();
    }

    #[test]
    fn test_drop_closes_and_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dropped.bin");

        {
            let mut region = MappedRegion::new(MapConfig::new(&path, 4096)).unwrap();
            region.open().unwrap();
            region.as_mut_slice().unwrap()[7] = 0x99;
            // No explicit close; Drop performs it
        }

        let mut region = MappedRegion::new(MapConfig::new(&path, 4096)).unwrap();
        region.open().unwrap();
        assert_eq!(region.as_slice().unwrap()[7], 0x99);
        region.close().unwrap();
    }

    #[test]
    fn test_exclusive_nonblocking_lock_conflict() {
        init_diagnostics();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locked.bin");

        let exclusive = |path: &std::path::Path| {
            MapConfig::new(path, 4096)
                .with_lock(LockMode::Exclusive)
                .with_lock_blocking(false)
        };

        let mut holder = MappedRegion::new(exclusive(&path)).unwrap();
        holder.open().unwrap();

        // A second exclusive non-blocking lock on the same file fails
        let mut contender = MappedRegion::new(exclusive(&path)).unwrap();
        assert!(matches!(contender.open(), Err(MapfileError::Lock { .. })));

        holder.close().unwrap();
    }

    #[test]
    fn test_read_only_over_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("existing.bin");
        let mut contents = vec![0u8; 4096];
        contents[100] = 0x7f;
        std::fs::write(&path, &contents).unwrap();

        let config = MapConfig::new(&path, 4096)
            .with_create(false)
            .with_writable(false);
        let mut region = MappedRegion::new(config).unwrap();
        region.open().unwrap();

        assert_eq!(region.as_slice().unwrap()[100], 0x7f);
        // The file was not resized
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);

        region.close().unwrap();
    }

    #[test]
    fn test_read_only_rejects_short_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, vec![0u8; 1024]).unwrap();

        let config = MapConfig::new(&path, 4096)
            .with_create(false)
            .with_writable(false);
        let mut region = MappedRegion::new(config).unwrap();
        assert!(matches!(region.open(), Err(MapfileError::Resize { .. })));
    }

    #[test]
    fn test_flush_range_synchronous() {
        let dir = TempDir::new().unwrap();
        let mut region = fresh_region(&dir, "region.bin", 8192);

        region.open().unwrap();
        region.as_mut_slice().unwrap()[0] = 1;
        region.flush_range(0, 4096, SyncMode::Synchronous).unwrap();
        assert_eq!(region.sync_mode(), SyncMode::Synchronous);
        region.close().unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_remap_grows_and_preserves_prefix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("grow.bin");
        let mut region = MappedRegion::new(MapConfig::new(&path, 4096)).unwrap();

        region.open().unwrap();
        for (i, byte) in region.as_mut_slice().unwrap().iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }

        region.remap(8192).unwrap();
        assert_eq!(region.capacity_bytes(), 8192);
        assert!(region.is_mapped());

        // The overlapping prefix survives the remap
        let bytes = region.as_slice().unwrap();
        for (i, byte) in bytes.iter().take(4096).enumerate() {
            assert_eq!(*byte, (i % 251) as u8);
        }

        // The backing file grew with the mapping; the new tail is writable
        assert!(std::fs::metadata(&path).unwrap().len() >= 8192);
        region.as_mut_slice().unwrap()[8191] = 0xaa;

        region.close().unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_remap_shrinks() {
        let dir = TempDir::new().unwrap();
        let mut region = fresh_region(&dir, "shrink.bin", 8192);

        region.open().unwrap();
        region.remap(4096).unwrap();
        assert_eq!(region.capacity_bytes(), 4096);
        region.close().unwrap();
    }

    #[test]
    fn test_advise_over_mapped_range() {
        let dir = TempDir::new().unwrap();
        let mut region = fresh_region(&dir, "advised.bin", 4096);

        region.open().unwrap();
        region.advise(mapfile::Advice::Sequential).unwrap();
        region.advise(mapfile::Advice::Normal).unwrap();
        region.close().unwrap();
    }
}
