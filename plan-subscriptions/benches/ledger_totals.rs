use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use plan_subscriptions::{
    Amount, FeatureId, Interval, LedgerSummary, Period, SubscriptionId, Supplement, Usage,
};

fn ledger_totals_benchmark(c: &mut Criterion) {
    let subscription_id = SubscriptionId::generate();
    let feature_id = FeatureId::generate();
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    // 10k alternating consumption and refund rows
    let usages: Vec<Usage> = (0..10_000i64)
        .map(|i| {
            let used = if i % 10 == 0 { -2 } else { 3 };
            Usage::new(
                subscription_id.clone(),
                feature_id.clone(),
                Amount::from_int(used),
                start + Duration::minutes(i),
            )
        })
        .collect();
    let supplements: Vec<Supplement> = (0..100i64)
        .map(|i| {
            Supplement::new(
                subscription_id.clone(),
                feature_id.clone(),
                Amount::from_int(50),
                Amount::from_int(1),
                start + Duration::hours(i),
            )
        })
        .collect();

    c.bench_function("ledger_summary_10k_rows", |b| {
        b.iter(|| {
            LedgerSummary::from_rows(
                black_box(Amount::from_int(100_000)),
                black_box(&usages),
                black_box(&supplements),
            )
            .and_then(|summary| summary.remaining())
        })
    });

    c.bench_function("monthly_period_chain_120", |b| {
        b.iter(|| {
            let mut period = Period::new(black_box(start), Interval::Month, 1).unwrap();
            for _ in 0..120 {
                period = period.next().unwrap();
            }
            period.end()
        })
    });
}

criterion_group!(benches, ledger_totals_benchmark);
criterion_main!(benches);
