use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use mapfile::{MapConfig, MappedRegion, SyncMode};
use tempfile::TempDir;

fn benchmark_open_close_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("MappedRegion");

    for size in [4096usize, 65536, 1048576].iter() {
        group.bench_with_input(BenchmarkId::new("open_close", size), size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let mut region =
                MappedRegion::new(MapConfig::new(dir.path().join("bench.bin"), size)).unwrap();

            b.iter(|| {
                region.open().unwrap();
                region.close().unwrap();
            });
        });
    }

    group.finish();
}

fn benchmark_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("MappedRegion");

    for size in [4096usize, 65536, 1048576].iter() {
        group.bench_with_input(BenchmarkId::new("write_flush", size), size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let mut region =
                MappedRegion::new(MapConfig::new(dir.path().join("bench.bin"), size)).unwrap();
            region.open().unwrap();

            b.iter(|| {
                let bytes = region.as_mut_slice().unwrap();
                bytes[0] = bytes[0].wrapping_add(1);
                bytes[size - 1] = bytes[size - 1].wrapping_add(1);
                region.flush_range(0, size, SyncMode::Asynchronous).unwrap();
            });

            region.close().unwrap();
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_open_close_cycle, benchmark_flush);
criterion_main!(benches);
