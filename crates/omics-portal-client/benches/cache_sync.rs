// SPDX-License-Identifier: Apache-2.0

use criterion::{criterion_group, criterion_main, Criterion};
use omics_portal_client::cache::{EntityCache, EntityFetcher, ExpressionFetcher};
use omics_portal_client::{FakePortalApi, PortalApi, RetryPolicy};
use omics_portal_model::{DatasetId, EntityKey, EntityKind, ExpressionVector};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn keys(count: usize) -> Vec<EntityKey> {
    let dataset = DatasetId::parse("bench").expect("dataset");
    (0..count)
        .map(|i| EntityKey::parse(&dataset, EntityKind::Gene, &format!("GENE{i}")).expect("key"))
        .collect()
}

fn cache() -> EntityCache<ExpressionVector> {
    let api: Arc<dyn PortalApi> = Arc::new(FakePortalApi::default());
    let fetcher: Arc<dyn EntityFetcher<ExpressionVector>> = Arc::new(ExpressionFetcher(api));
    EntityCache::new("expression", fetcher).with_retry(RetryPolicy::no_retry())
}

fn bench_sync_hits(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let cache = cache();
    let keys = keys(200);
    rt.block_on(cache.sync(&keys));
    c.bench_function("entity_cache_sync_200_hits", |b| {
        b.iter(|| rt.block_on(cache.sync(&keys)))
    });
}

fn bench_fetch_then_prune(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let keys = keys(50);
    let keep: HashSet<_> = keys.iter().take(5).cloned().collect();
    c.bench_function("entity_cache_fetch_50_prune_to_5", |b| {
        b.iter(|| {
            rt.block_on(async {
                let cache = cache();
                cache.sync(&keys).await;
                cache.evict(&keep).await
            })
        })
    });
}

criterion_group!(benches, bench_sync_hits, bench_fetch_then_prune);
criterion_main!(benches);
