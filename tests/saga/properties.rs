//! 流程级性质：余额非负、结算幂等、状态单调、缓存降级

use std::sync::Arc;

use transaction_service::models::TransactionStatus;
use walletwave_shared::cache::MemoryCache;
use walletwave_shared::kafka::topics;
use walletwave_shared::test_utils::UnavailableCache;

use crate::harness::Saga;

#[tokio::test]
async fn test_balances_never_go_negative() {
    let mut saga = Saga::new();
    let asha = saga.register("Asha").await;
    let bo = saga.register("Bo").await;
    let cy = saga.register("Cy").await;

    let mut submitted = Vec::new();
    for (sender, receiver, amount) in [
        (asha, bo, 40),
        (asha, cy, 40),
        (asha, bo, 40),
        (bo, asha, 140),
        (cy, bo, 140),
        (bo, cy, 1),
    ] {
        submitted.push(saga.submit(sender, receiver, amount).await.external_id);
    }
    let report = saga.pump().await;
    assert!(report.failures.is_empty(), "{:?}", report.failures);

    for wallet in saga.wallets.wallets() {
        assert!(wallet.balance >= 0, "owner {} 余额为负: {}", wallet.owner_id, wallet.balance);
    }
    let total: i64 = saga.wallets.wallets().iter().map(|w| w.balance).sum();
    assert_eq!(total, 300);

    let mut statuses = Vec::new();
    for external_id in &submitted {
        statuses.push(saga.transaction(external_id).await.status);
    }
    assert_eq!(
        statuses,
        vec![
            TransactionStatus::Success,
            TransactionStatus::Success,
            TransactionStatus::Failed,
            TransactionStatus::Success,
            TransactionStatus::Success,
            TransactionStatus::Success,
        ]
    );
    assert_eq!(saga.balance(asha).await, 160);
    assert_eq!(saga.balance(bo).await, 139);
    assert_eq!(saga.balance(cy).await, 1);
}

#[tokio::test]
async fn test_duplicate_settlement_is_ignored() {
    let mut saga = Saga::new();
    let asha = saga.register("Asha").await;
    let bo = saga.register("Bo").await;
    let tx = saga.submit(asha, bo, 50).await;
    saga.pump().await;

    let notifications_before = saga.inbox.len();
    let failures = saga.redeliver(topics::TRANSFER_SETTLED, 0).await;

    assert!(failures.is_empty());
    assert_eq!(saga.bus.count(topics::NOTIFICATION_REQUESTED), 0);
    saga.pump().await;
    assert_eq!(saga.inbox.len(), notifications_before);
    assert_eq!(saga.transaction(&tx.external_id).await.status, TransactionStatus::Success);
}

#[tokio::test]
async fn test_duplicate_initiation_does_not_debit_twice() {
    let mut saga = Saga::new();
    let asha = saga.register("Asha").await;
    let bo = saga.register("Bo").await;
    let tx = saga.submit(asha, bo, 50).await;
    saga.pump().await;

    let failures = saga.redeliver(topics::TRANSFER_INITIATED, 0).await;
    assert!(failures.is_empty());
    let report = saga.pump().await;

    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(saga.balance(asha).await, 50);
    assert_eq!(saga.balance(bo).await, 150);
    assert_eq!(saga.wallets.entry_count(), 1);
    assert_eq!(saga.transfer_notifications(asha).await.len(), 1);
    assert_eq!(saga.transaction(&tx.external_id).await.status, TransactionStatus::Success);
}

#[tokio::test]
async fn test_terminal_status_never_changes() {
    let mut saga = Saga::new();
    let asha = saga.register("Asha").await;
    let bo = saga.register("Bo").await;

    let ok = saga.submit(asha, bo, 50).await;
    saga.pump().await;
    saga.set_balance(asha, 0).await;
    let rejected = saga.submit(asha, bo, 50).await;
    saga.pump().await;

    // 成功结算后再收到失败结算，反之亦然
    let settled = saga.delivered(topics::TRANSFER_SETTLED);
    let mut flipped_to_failed = settled[0].json();
    flipped_to_failed["outcome"] = "failed".into();
    let mut flipped_to_success = settled[1].json();
    flipped_to_success["outcome"] = "success".into();

    for (key, payload) in [
        (&ok.external_id, flipped_to_failed),
        (&rejected.external_id, flipped_to_success),
    ] {
        let msg = walletwave_shared::kafka::ConsumerMessage::json(
            topics::TRANSFER_SETTLED,
            key,
            &payload,
        )
        .unwrap();
        assert!(saga.deliver(&msg).await.is_empty());
    }

    assert_eq!(saga.transaction(&ok.external_id).await.status, TransactionStatus::Success);
    assert_eq!(
        saga.transaction(&rejected.external_id).await.status,
        TransactionStatus::Failed
    );
}

#[tokio::test]
async fn test_flow_works_without_cache() {
    let mut saga = Saga::with_cache(Arc::new(UnavailableCache));
    let asha = saga.register("Asha").await;
    let bo = saga.register("Bo").await;

    let tx = saga.submit(asha, bo, 25).await;
    let report = saga.pump().await;

    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(saga.transaction(&tx.external_id).await.status, TransactionStatus::Success);
    assert_eq!(saga.balance(asha).await, 75);
    assert_eq!(saga.balance(bo).await, 125);
    assert_eq!(
        saga.transfer_notifications(bo).await[0].message,
        "You received $25 from Asha."
    );
}

#[tokio::test]
async fn test_reads_survive_cache_flush() {
    let cache = MemoryCache::new();
    let mut saga = Saga::with_cache(Arc::new(cache.clone()));
    let asha = saga.register("Asha").await;
    let bo = saga.register("Bo").await;
    saga.submit(asha, bo, 60).await;
    saga.pump().await;

    cache.clear();

    assert_eq!(saga.balance(asha).await, 40);
    assert_eq!(saga.balance(bo).await, 160);
    assert_eq!(saga.users.get_profile(bo).await.unwrap().name, "Bo");
    assert!(cache.contains("wallet:1"));
}
