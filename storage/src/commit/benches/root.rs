use criterion::{criterion_group, Criterion};
use lanes_storage::commit::CommitTree;
use lanes_utils::Sha256;
use rand::{rngs::StdRng, SeedableRng};

fn bench_root(c: &mut Criterion) {
    for shards in [1, 4, 16, 64, 256, 1024] {
        let mut sampler = StdRng::seed_from_u64(0);
        let leaves: Vec<_> = (0..shards).map(|_| Sha256::random(&mut sampler)).collect();
        c.bench_function(&format!("{}/shards={}", module_path!(), shards), |b| {
            b.iter_batched(
                || leaves.clone(),
                CommitTree::new,
                criterion::BatchSize::SmallInput,
            )
        });
    }
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_root
}
