use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;

use forgemarket_core::{CancellationFlag, CustomerId, ProductId, StoreId, TenantId, UserId};
use forgemarket_infra::{
    ConcurrencyRetry, InMemoryInventoryStore, RetryPolicy, StockReservationManager,
};
use forgemarket_inventory::{
    InventoryConfig, ProductStock, ReserveItem, ReserveStock, StockUpdateType, UpdateStock,
};

fn setup() -> (
    Arc<StockReservationManager<InMemoryInventoryStore>>,
    TenantId,
    ProductId,
) {
    let store = InMemoryInventoryStore::new();
    let tenant_id = TenantId::new();
    let product =
        ProductStock::new(ProductId::new(), tenant_id, StoreId::new(), 1_000_000).unwrap();
    let product_id = product.product_id;
    store.insert_product(product);

    let manager = StockReservationManager::new(
        store,
        InventoryConfig::default(),
        ConcurrencyRetry::new(RetryPolicy::fixed(3, Duration::from_millis(1))),
    );
    (Arc::new(manager), tenant_id, product_id)
}

fn bench_reserve_release_cycle(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (manager, tenant_id, product_id) = setup();
    let customer_id = CustomerId::new();
    let cancel = CancellationFlag::new();

    let mut group = c.benchmark_group("reservation");
    group.throughput(Throughput::Elements(1));
    group.bench_function("reserve_release_cycle", |b| {
        b.iter(|| {
            rt.block_on(async {
                let receipt = manager
                    .reserve_stock(
                        ReserveStock {
                            tenant_id,
                            customer_id,
                            items: vec![ReserveItem {
                                product_id,
                                quantity: 1,
                            }],
                            ttl: None,
                            external_reference: None,
                        },
                        &cancel,
                    )
                    .await
                    .unwrap();
                manager
                    .release_reservation(tenant_id, receipt.group_id, "bench", &cancel)
                    .await
                    .unwrap();
            })
        })
    });
    group.finish();
}

fn bench_direct_update(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (manager, tenant_id, product_id) = setup();
    let actor = UserId::new();
    let cancel = CancellationFlag::new();

    c.bench_function("update_stock_correction", |b| {
        b.iter(|| {
            rt.block_on(async {
                manager
                    .update_stock(
                        UpdateStock {
                            tenant_id,
                            product_id,
                            quantity: 500_000,
                            update_type: StockUpdateType::Correction,
                            reason: "bench".to_string(),
                            actor,
                        },
                        &cancel,
                    )
                    .await
                    .unwrap()
            })
        })
    });
}

fn bench_backoff_math(c: &mut Criterion) {
    let policy = RetryPolicy::exponential(
        10,
        Duration::from_millis(25),
        Duration::from_secs(2),
    );

    let mut group = c.benchmark_group("retry_backoff");
    for attempt in [1u32, 5, 10] {
        group.bench_with_input(
            BenchmarkId::from_parameter(attempt),
            &attempt,
            |b, &attempt| b.iter(|| black_box(policy.delay_for_attempt(black_box(attempt)))),
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_reserve_release_cycle,
    bench_direct_update,
    bench_backoff_math
);
criterion_main!(benches);
