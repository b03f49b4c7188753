use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use flowmgr_core::{
    orchestration::{
        RouterDefaultStack,
        api::{
            CacheRequest, CommandData, Destination, Envelope, TransactionRequest,
            TransactionResponse,
        },
        config::OrchestratorConfig,
        infrastructure::{
            flow::{Flow, FlowPair},
            rules::OperationKind,
        },
        init_orchestrator,
        services::{
            cache::FlowCacheService, resources::ResourcePool, transaction::TransactionService,
        },
    },
    transport::nop::{BusNop, PathNop},
};
use tower::Service;

fn create_test_flow(index: u32) -> Flow {
    Flow::new(format!("flow-{index}"), 10000, "", "sw-a", index, 0, "sw-b", index, 0)
}

fn create_test_router() -> RouterDefaultStack<BusNop, PathNop> {
    init_orchestrator(OrchestratorConfig::default(), BusNop, PathNop).0
}

fn command(command: CommandData) -> Envelope {
    Envelope::command(Destination::Orchestrator, Some("bench".into()), command)
}

// Service Benchmarks
fn bench_cache_insert(c: &mut Criterion) {
    c.bench_function("cache_insert", |b| {
        b.to_async(tokio::runtime::Runtime::new().unwrap()).iter(|| async {
            let mut cache = FlowCacheService::default();
            let forward = create_test_flow(0);
            let pair = FlowPair::new(forward.clone(), forward.reverse());

            let _ = black_box(cache.call(CacheRequest::Insert(pair)).await);
        });
    });
}

fn bench_transaction_begin_confirm(c: &mut Criterion) {
    c.bench_function("transaction_begin_confirm", |b| {
        b.to_async(tokio::runtime::Runtime::new().unwrap()).iter(|| async {
            let mut transactions = TransactionService::default();
            if let Ok(TransactionResponse::Begun(transaction_id)) =
                transactions
                    .call(TransactionRequest::Begin {
                        flow_id: "flow-0".into(),
                        operation: OperationKind::Install,
                        expected: 1,
                    })
                    .await
            {
                let _ = black_box(
                    transactions
                        .call(TransactionRequest::Confirm { flow_id: "flow-0".into(), transaction_id })
                        .await,
                );
            }
        });
    });
}

fn bench_resources_allocate_release(c: &mut Criterion) {
    c.bench_function("resources_allocate_release", |b| {
        let pool = ResourcePool::default();
        b.iter(|| {
            let _ = black_box(pool.allocate("flow-0"));
            pool.release("flow-0");
        });
    });
}

// Router Benchmarks
fn bench_router_create(c: &mut Criterion) {
    c.bench_function("router_create", |b| {
        b.to_async(tokio::runtime::Runtime::new().unwrap()).iter_batched(
            create_test_router,
            |mut router| async move {
                let _ = black_box(router.call(command(CommandData::FlowCreate(create_test_flow(0)))).await);
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_router_status(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut router = create_test_router();
    runtime.block_on(async {
        let _ = router.call(command(CommandData::FlowCreate(create_test_flow(0)))).await;
    });

    c.bench_function("router_status", |b| {
        b.to_async(&runtime).iter(|| {
            let mut router = router.clone();
            async move {
                let _ = black_box(
                    router.call(command(CommandData::FlowStatus { flow_id: "flow-0".into() })).await,
                );
            }
        });
    });
}

fn bench_router_lifecycle_stress(c: &mut Criterion) {
    let flows_count = 100;

    c.bench_function("router_lifecycle_stress", |b| {
        b.to_async(tokio::runtime::Runtime::new().unwrap()).iter_batched(
            create_test_router,
            |mut router| async move {
                // Create, update and delete flows sharing the same switches
                for index in 0..flows_count {
                    let flow = create_test_flow(index);
                    let _ = router.call(command(CommandData::FlowCreate(flow.clone()))).await;
                    let _ = router.call(command(CommandData::FlowUpdate(flow))).await;
                }
                let _ = black_box(router.call(command(CommandData::FlowsGet { filter: None })).await);
                for index in 0..flows_count {
                    let _ = router
                        .call(command(CommandData::FlowDelete { flow_id: format!("flow-{index}") }))
                        .await;
                }
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    service_benches,
    bench_cache_insert,
    bench_transaction_begin_confirm,
    bench_resources_allocate_release,
);

criterion_group!(router_benches, bench_router_create, bench_router_status, bench_router_lifecycle_stress);

criterion_main!(service_benches, router_benches);
