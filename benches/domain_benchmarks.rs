use chrono::{Duration, Utc};
use criterion::{Criterion, criterion_group, criterion_main};
use ledger_core::domain::{
    Asset, CreateWalletAddressRequest, PagePlan, PaginationWindow, SortOrder, apply_keyset,
};
use std::hint::black_box;
use validator::Validate;

fn assets(n: usize) -> Vec<Asset> {
    let base = Utc::now();
    (0..n)
        .map(|i| Asset {
            id: format!("asset-{i:06}"),
            code: "USD".to_string(),
            scale: 2,
            withdrawal_threshold: None,
            liquidity_threshold: None,
            created_at: base + Duration::milliseconds(i as i64),
        })
        .collect()
}

fn bench_page_plan(c: &mut Criterion) {
    let window = PaginationWindow::before("asset-000500", 20);

    c.bench_function("page_plan_from_window", |b| {
        b.iter(|| PagePlan::from_window(black_box(&window), SortOrder::Desc))
    });
}

fn bench_apply_keyset(c: &mut Criterion) {
    let items = assets(1_000);
    let forward =
        PagePlan::from_window(&PaginationWindow::after("asset-000500", 20), SortOrder::Asc)
            .unwrap();
    let backward =
        PagePlan::from_window(&PaginationWindow::before("asset-000500", 20), SortOrder::Desc)
            .unwrap();

    c.bench_function("apply_keyset_forward_1000", |b| {
        b.iter(|| apply_keyset(black_box(&items), black_box(&forward)))
    });
    c.bench_function("apply_keyset_backward_1000", |b| {
        b.iter(|| apply_keyset(black_box(&items), black_box(&backward)))
    });
}

fn bench_validation(c: &mut Criterion) {
    let request = CreateWalletAddressRequest {
        asset_id: "asset-1".to_string(),
        url: "https://wallet.example.com/alice".to_string(),
        public_name: Some("Alice".to_string()),
    };

    c.bench_function("validate_wallet_address_request", |b| {
        b.iter(|| {
            let _ = black_box(&request).validate();
        })
    });
}

criterion_group!(benches, bench_page_plan, bench_apply_keyset, bench_validation);
criterion_main!(benches);
