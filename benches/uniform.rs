use criterion::{criterion_group, criterion_main, Criterion};
use frayed_ribbon::{choose_salt, UniformBuilder, UniformMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/* Retry with derived salts until a build lands, like any real caller */
fn build_retrying(
    keys: &[u64],
    values: &[u64],
    threads: usize,
    base_salt: u64,
) -> (UniformMap, usize) {
    for attempt in 0..256 {
        let salt = choose_salt(Some(base_salt), attempt);
        let mut builder = UniformBuilder::new(keys.len(), 8, salt).unwrap();
        for (k, v) in keys.iter().zip(values) {
            builder.insert(&k.to_le_bytes(), *v).unwrap();
        }
        if let Ok(map) = builder.build(threads) {
            return (map, attempt + 1);
        }
    }
    panic!("256 salts in a row failed");
}

criterion_group! {
    name = benches;
    config = Criterion::default();
    targets = criterion_benchmark
}
fn criterion_benchmark(crit: &mut Criterion) {
    let sizes = vec![1000usize, 10000, 100000];
    let nbits = 8;
    let mask = if nbits == 64 { !0 } else { (1u64 << nbits) - 1 };
    for size in sizes {
        /* It's fine to use the same keys every time, due to the salted hash */
        let mut seed = [0u8; 32];
        seed[0..4].copy_from_slice(&(size as u32).to_le_bytes());
        let mut rng: StdRng = SeedableRng::from_seed(seed);
        let keys: Vec<u64> = (0..size).map(|_| rng.gen::<u64>()).collect();
        let values: Vec<u64> = (0..size).map(|_| rng.gen::<u64>() & mask).collect();
        let base_salt = u64::from_le_bytes(seed[0..8].try_into().unwrap());

        /* Find a salt that solves this key set, and report how long that took */
        let (umap, tries) = build_retrying(&keys, &values, 0, base_salt);
        println!("Size {}: solved on try {} of 256", size, tries);

        /* Bench building, reusing one arena across trials.  The salt is
         * known to work, so every iteration measures a full solve. */
        let mut builder = UniformBuilder::new(size, nbits, umap.salt()).unwrap();
        crit.bench_function(&format!("uniform build {}", size), |crit| {
            crit.iter(|| {
                builder.reset();
                for (k, v) in keys.iter().zip(&values) {
                    builder.insert(&k.to_le_bytes(), *v).unwrap();
                }
                assert!(builder.build(0).is_ok());
            })
        });

        /* Bench the threaded solve on the same workload */
        crit.bench_function(&format!("uniform build {} threaded", size), |crit| {
            crit.iter(|| {
                builder.reset();
                for (k, v) in keys.iter().zip(&values) {
                    builder.insert(&k.to_le_bytes(), *v).unwrap();
                }
                assert!(builder.build(4).is_ok());
            })
        });

        /* Bench querying */
        let mut qi = 0;
        crit.bench_function(&format!("uniform query {}", size), |crit| {
            crit.iter(|| {
                assert_eq!(umap.query(&keys[qi].to_le_bytes()), values[qi]);
                qi = (qi + 1) % keys.len();
            })
        });
    }
}

criterion_main!(benches);
