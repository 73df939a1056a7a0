//! 端到端场景

use serde_json::json;
use transaction_service::models::TransactionStatus;
use walletwave_shared::dlq::DeadLetterMessage;
use walletwave_shared::events::{SettlementOutcome, TransferSettled};
use walletwave_shared::kafka::{ConsumerMessage, topics};

use crate::harness::Saga;

#[tokio::test]
async fn test_registration_opens_wallet_and_welcomes() {
    let mut saga = Saga::new();
    let asha = saga.register("Asha").await;

    assert_eq!(saga.balance(asha).await, 100);
    let inbox = saga.notifications.list_by_owner(asha).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].message, "Welcome to WalletWave, Asha! 🎉");
}

#[tokio::test]
async fn test_successful_transfer() {
    let mut saga = Saga::new();
    let asha = saga.register("Asha").await;
    let bo = saga.register("Bo").await;
    saga.set_balance(bo, 0).await;

    let tx = saga.submit(asha, bo, 50).await;
    assert_eq!(tx.status, TransactionStatus::Pending);

    let report = saga.pump().await;
    assert!(report.failures.is_empty(), "{:?}", report.failures);

    assert_eq!(saga.transaction(&tx.external_id).await.status, TransactionStatus::Success);
    assert_eq!(saga.balance(asha).await, 50);
    assert_eq!(saga.balance(bo).await, 50);

    let debit = saga.transfer_notifications(asha).await;
    let credit = saga.transfer_notifications(bo).await;
    assert_eq!(debit.len() + credit.len(), 2);
    assert_eq!(debit[0].message, "Your payment of $50 to Bo was SUCCESSFUL.");
    assert_eq!(credit[0].message, "You received $50 from Asha.");
}

#[tokio::test]
async fn test_insufficient_balance_fails_without_moving_money() {
    let mut saga = Saga::new();
    let asha = saga.register("Asha").await;
    let bo = saga.register("Bo").await;
    saga.set_balance(asha, 10).await;

    let tx = saga.submit(asha, bo, 50).await;
    saga.pump().await;

    let settled: TransferSettled = saga.delivered(topics::TRANSFER_SETTLED)[0].decode();
    assert_eq!(settled.outcome, SettlementOutcome::Failed);
    assert_eq!(settled.reason.as_deref(), Some("insufficient balance"));

    assert_eq!(saga.transaction(&tx.external_id).await.status, TransactionStatus::Failed);
    assert_eq!(saga.balance(asha).await, 10);
    assert_eq!(saga.balance(bo).await, 100);

    let notified = saga.transfer_notifications(asha).await;
    assert_eq!(notified.len(), 1);
    assert!(notified[0].message.contains("insufficient balance"));
    assert!(saga.transfer_notifications(bo).await.is_empty());
}

#[tokio::test]
async fn test_rejected_transfer_redelivered_after_funding_stays_failed() {
    let mut saga = Saga::new();
    let asha = saga.register("Asha").await;
    let bo = saga.register("Bo").await;
    saga.set_balance(asha, 10).await;
    let tx = saga.submit(asha, bo, 50).await;
    saga.pump().await;

    saga.set_balance(asha, 500).await;
    let failures = saga.redeliver(topics::TRANSFER_INITIATED, 0).await;
    assert!(failures.is_empty(), "{failures:?}");
    let report = saga.pump().await;
    assert!(report.failures.is_empty(), "{:?}", report.failures);

    let settled = saga.delivered(topics::TRANSFER_SETTLED);
    assert_eq!(settled.len(), 2);
    let replayed: TransferSettled = settled[1].decode();
    assert_eq!(replayed.outcome, SettlementOutcome::Failed);
    assert_eq!(replayed.reason.as_deref(), Some("insufficient balance"));

    assert_eq!(saga.transaction(&tx.external_id).await.status, TransactionStatus::Failed);
    assert_eq!(saga.balance(asha).await, 500);
    assert_eq!(saga.balance(bo).await, 100);
}

#[tokio::test]
async fn test_receiver_without_wallet_fails() {
    let mut saga = Saga::new();
    let asha = saga.register("Asha").await;

    let tx = saga.submit(asha, 404, 50).await;
    saga.pump().await;

    let settled: TransferSettled = saga.delivered(topics::TRANSFER_SETTLED)[0].decode();
    assert_eq!(settled.reason.as_deref(), Some("receiver wallet not found"));
    assert_eq!(saga.transaction(&tx.external_id).await.status, TransactionStatus::Failed);
    assert_eq!(saga.balance(asha).await, 100);
}

#[tokio::test]
async fn test_settlement_missing_sender_forces_failure() {
    let mut saga = Saga::new();
    let asha = saga.register("Asha").await;
    let bo = saga.register("Bo").await;

    let tx = saga.submit(asha, bo, 50).await;
    // 丢弃 transfer.initiated，模拟上游直接发来一条残缺的结算事件
    saga.bus.drain();

    let msg = ConsumerMessage::json(
        topics::TRANSFER_SETTLED,
        &tx.external_id,
        &json!({
            "externalId": &tx.external_id,
            "receiver": bo,
            "amount": 50,
            "outcome": "success"
        }),
    )
    .unwrap();
    let failures = saga.deliver(&msg).await;

    assert_eq!(failures.len(), 1);
    assert_eq!(saga.transaction(&tx.external_id).await.status, TransactionStatus::Failed);

    let dead: DeadLetterMessage =
        saga.dead_letters.published(topics::DEAD_LETTER_QUEUE)[0].decode();
    assert_eq!(dead.source_topic, topics::TRANSFER_SETTLED);
    assert_eq!(dead.source_service, "transaction-service");

    assert_eq!(saga.balance(asha).await, 100);
    assert_eq!(saga.bus.count(topics::NOTIFICATION_REQUESTED), 0);
}

#[tokio::test]
async fn test_mark_all_read_with_nothing_unread() {
    let mut saga = Saga::new();
    let asha = saga.register("Asha").await;

    assert_eq!(saga.notifications.mark_all_read(asha).await.unwrap(), 1);
    let writes = saga.inbox.write_count();

    assert_eq!(saga.notifications.mark_all_read(asha).await.unwrap(), 0);
    assert_eq!(saga.inbox.write_count(), writes);
}

#[tokio::test]
async fn test_malformed_initiation_is_dead_lettered() {
    let saga = Saga::new();
    let msg = ConsumerMessage::json(
        topics::TRANSFER_INITIATED,
        "tx-bad",
        &json!({"externalId": "tx-bad", "sender": 1, "receiver": 2, "amount": "fifty"}),
    )
    .unwrap();

    let failures = saga.deliver(&msg).await;

    assert!(failures.is_empty());
    assert_eq!(saga.dead_letters.count(topics::DEAD_LETTER_QUEUE), 1);
    assert_eq!(saga.wallets.entry_count(), 0);
}

#[tokio::test]
async fn test_reconciliation_recovers_lost_initiation() {
    let mut saga = Saga::new();
    let asha = saga.register("Asha").await;
    let bo = saga.register("Bo").await;

    saga.bus.set_failing(true);
    let tx = saga.submit(asha, bo, 30).await;
    saga.bus.set_failing(false);
    assert_eq!(saga.pump().await.delivered, 0);
    assert_eq!(saga.transaction(&tx.external_id).await.status, TransactionStatus::Pending);

    let republished = saga
        .orchestrator
        .reconcile_pending(std::time::Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(republished, 1);

    saga.pump().await;
    assert_eq!(saga.transaction(&tx.external_id).await.status, TransactionStatus::Success);
    assert_eq!(saga.balance(asha).await, 70);
    assert_eq!(saga.balance(bo).await, 130);
}
