use arbor_cache::{
    HierarchyConfig, HierarchyContext, RemoteTenantService, TenantHierarchyApi,
    TenantHierarchyCache,
};
use arbor_test_utils::fixtures::chain;
use arbor_test_utils::{tenant, StaticTenantDirectory};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::Arc;

const DEPTH: u128 = 8;

fn warm_cache(rt: &tokio::runtime::Runtime) -> TenantHierarchyCache {
    let remote: Arc<dyn RemoteTenantService> = Arc::new(StaticTenantDirectory::new(chain(DEPTH)));
    rt.block_on(async {
        let cache = TenantHierarchyCache::pooled(
            &HierarchyContext::new(),
            remote,
            HierarchyConfig::default(),
        )
        .expect("build cache");
        cache
            .ancestors(&HierarchyContext::new(), tenant(DEPTH))
            .await
            .expect("warm cache");
        cache
    })
}

fn bench_cache_hits(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let cache = warm_cache(&rt);
    let ctx = HierarchyContext::new();

    c.bench_function("hierarchy/ancestors_hit", |b| {
        b.to_async(&rt).iter(|| async {
            let chain = cache
                .ancestors(&ctx, black_box(tenant(DEPTH)))
                .await
                .expect("cached ancestors");
            black_box(chain.len());
        });
    });

    c.bench_function("hierarchy/parent_hit", |b| {
        b.to_async(&rt).iter(|| async {
            let parent = cache
                .parent(&ctx, black_box(tenant(DEPTH)))
                .await
                .expect("cached parent");
            black_box(parent);
        });
    });

    c.bench_function("hierarchy/root_hit", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(cache.root(&ctx).await.expect("cached root"));
        });
    });
}

criterion_group!(benches, bench_cache_hits);
criterion_main!(benches);
