// Copyright 2026 strata Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! micro benchmark for the strata in-memory lru engine

use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use strata_memory::LruCache;

const CAPACITY: usize = 10_000;
const KEY_SPACE: u64 = 20_000;
const OPS: usize = 100_000;

fn keys(seed: u64) -> Vec<u64> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..OPS).map(|_| rng.random_range(0..KEY_SPACE)).collect()
}

fn bench_put(c: &mut Criterion) {
    let keys = keys(42);
    c.bench_function("lru put", |b| {
        let cache = LruCache::<u64, u64>::new(CAPACITY).unwrap();
        b.iter(|| {
            for &key in keys.iter() {
                black_box(cache.put(key, key));
            }
        })
    });
}

fn bench_get_or_put(c: &mut Criterion) {
    let keys = keys(4242);
    c.bench_function("lru get or put", |b| {
        let cache = LruCache::<u64, Arc<Vec<u8>>>::builder(CAPACITY * 64)
            .with_weighter(|v: &Arc<Vec<u8>>| v.len())
            .build()
            .unwrap();
        let value = Arc::new(vec![0u8; 64]);
        b.iter(|| {
            for &key in keys.iter() {
                if cache.get(&key).is_none() {
                    cache.put(key, value.clone());
                }
            }
        })
    });
}

fn bench_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("lru concurrent get or put");
    for threads in [1, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            let cache = LruCache::<u64, u64>::new(CAPACITY).unwrap();
            let keys = Arc::new(keys(threads as u64));
            b.iter(|| {
                std::thread::scope(|s| {
                    for t in 0..threads {
                        let cache = &cache;
                        let keys = &keys;
                        s.spawn(move || {
                            for &key in keys.iter().skip(t).step_by(threads) {
                                if cache.get(&key).is_none() {
                                    cache.put(key, key);
                                }
                            }
                        });
                    }
                })
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_put, bench_get_or_put, bench_concurrent);
criterion_main!(benches);
