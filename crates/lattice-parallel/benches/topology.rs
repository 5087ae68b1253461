use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lattice_parallel::{CartesianGrid, ProcessTopology};
use lattice_types::{GlobalRank, ModelArchitecture};

fn benchmark_topology(c: &mut Criterion) {
    let model = ModelArchitecture {
        head_num: 96,
        size_per_head: 128,
        vocab_size: 51200,
        decoder_layers: 96,
    };

    let mut group = c.benchmark_group("topology");

    group.bench_function("locate_rank_8x8", |b| {
        b.iter(|| {
            for rank in 0..64 {
                let topology =
                    ProcessTopology::new(64, GlobalRank::new(black_box(rank)), 8, 8).unwrap();
                black_box(topology.coordinates());
            }
        })
    });

    group.bench_function("shard_config_8x8", |b| {
        let topology = ProcessTopology::new(64, GlobalRank::new(37), 8, 8).unwrap();
        b.iter(|| black_box(topology.shard_config(black_box(&model), 2048).unwrap()))
    });

    group.bench_function("grid_sub_color_key", |b| {
        let grid = CartesianGrid::new(8, 8).unwrap();
        b.iter(|| {
            for rank in 0..64 {
                black_box(grid.sub_color_key(black_box(rank), [false, true]).unwrap());
                black_box(grid.sub_color_key(black_box(rank), [true, false]).unwrap());
            }
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_topology);
criterion_main!(benches);
