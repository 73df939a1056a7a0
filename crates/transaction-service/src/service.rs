//! 交易编排服务
//!
//! - `submit`：校验请求 -> 落库为 PENDING -> 尽力发布 `transfer.initiated`
//! - `on_settled`：按 externalId 查找交易 -> 已是终态则忽略 -> 推进到终态 -> 发布 `notification.requested`
//! - `reconcile_pending`：重新发布长时间停留在 PENDING 的交易，补偿发布失败
//!
//! 发布失败不会回滚交易：交易记录才是客户端可见状态的权威来源。

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use walletwave_shared::config::SagaConfig;
use walletwave_shared::error::WaveError;
use walletwave_shared::events::{
    FinalStatus, NotificationRequested, TransferInitiated, TransferSettled,
};
use walletwave_shared::kafka::{EventPublisher, publish_json, topics};
use walletwave_shared::observability::metrics::{record_settlement, record_transfer_submitted};

use crate::error::{OrchestratorError, Result};
use crate::models::{
    NewTransaction, SettlementResult, Transaction, TransactionStatus, TransferRequest,
};
use crate::repository::TransactionRepository;

/// 单次对账最多处理的交易数
const RECONCILE_BATCH_SIZE: i64 = 500;

pub struct TransactionService {
    repo: Arc<dyn TransactionRepository>,
    publisher: Arc<dyn EventPublisher>,
    comment_max_len: usize,
}

impl TransactionService {
    pub fn new(
        repo: Arc<dyn TransactionRepository>,
        publisher: Arc<dyn EventPublisher>,
        config: &SagaConfig,
    ) -> Self {
        Self {
            repo,
            publisher,
            comment_max_len: config.comment_max_len,
        }
    }

    /// 受理转账请求
    ///
    /// 返回的交易始终是 PENDING；`transfer.initiated` 发布失败只记录日志。
    #[instrument(skip(self, request), fields(sender = ?request.sender, receiver = ?request.receiver))]
    pub async fn submit(&self, request: TransferRequest) -> Result<Transaction> {
        let new = self.validate(request)?;
        let tx = self.repo.insert(&new).await?;
        record_transfer_submitted();

        info!(
            external_id = %tx.external_id,
            amount = tx.amount,
            "转账已受理"
        );

        if let Err(e) = self.publish_initiated(&tx).await {
            warn!(
                external_id = %tx.external_id,
                error = %e,
                "发布 transfer.initiated 失败，交易保持 PENDING 等待对账"
            );
        }
        Ok(tx)
    }

    /// 处理账本的结算结果
    #[instrument(skip(self, event), fields(external_id = %event.external_id, outcome = %event.outcome))]
    pub async fn on_settled(&self, event: &TransferSettled) -> Result<SettlementResult> {
        let tx = self
            .repo
            .find_by_external_id(&event.external_id)
            .await?
            .ok_or_else(|| OrchestratorError::UnknownTransaction {
                external_id: event.external_id.clone(),
            })?;

        if tx.status.is_terminal() {
            info!(status = tx.status.as_str(), "交易已是终态，忽略重复结算");
            return Ok(SettlementResult::AlreadySettled(tx));
        }

        let Some((sender, receiver)) = event.parties() else {
            let reason = match (event.sender, event.receiver) {
                (None, None) => "缺少 sender 和 receiver",
                (None, _) => "缺少 sender",
                _ => "缺少 receiver",
            };
            if self
                .repo
                .finalize(&event.external_id, TransactionStatus::Failed)
                .await?
                .is_some()
            {
                record_settlement(TransactionStatus::Failed.as_str());
            }
            error!(reason, "结算事件缺少交易双方，交易已置为 FAILED");
            return Err(OrchestratorError::MalformedEvent {
                external_id: event.external_id.clone(),
                reason: reason.to_string(),
            });
        };

        let final_status = FinalStatus::from(event.outcome);
        let Some(finalized) = self
            .repo
            .finalize(&event.external_id, TransactionStatus::from(final_status))
            .await?
        else {
            // 并发投递的同一结算已抢先推进
            let current = self
                .repo
                .find_by_external_id(&event.external_id)
                .await?
                .unwrap_or(tx);
            info!(status = current.status.as_str(), "交易已被并发结算，忽略");
            return Ok(SettlementResult::AlreadySettled(current));
        };

        record_settlement(finalized.status.as_str());
        info!(status = finalized.status.as_str(), "交易已结算");

        let mut request =
            NotificationRequested::from_settlement(event, sender, receiver, final_status);
        request.amount = finalized.amount;

        if let Err(e) = publish_json(
            self.publisher.as_ref(),
            topics::NOTIFICATION_REQUESTED,
            &request.external_id,
            &request,
        )
        .await
        {
            warn!(error = %e, "发布 notification.requested 失败");
        }

        Ok(SettlementResult::Finalized(finalized))
    }

    /// 按 externalId 查询交易
    pub async fn get(&self, external_id: &str) -> Result<Transaction> {
        self.repo
            .find_by_external_id(external_id)
            .await?
            .ok_or_else(|| OrchestratorError::UnknownTransaction {
                external_id: external_id.to_string(),
            })
    }

    /// 用户参与的全部交易，最新的在前
    pub async fn list_by_participant(&self, owner_id: i64) -> Result<Vec<Transaction>> {
        Ok(self.repo.list_by_participant(owner_id).await?)
    }

    /// 重新发布 PENDING 超过 `older_than` 的交易，返回成功发布的数量
    ///
    /// 账本按 externalId 幂等，重复发布不会重复扣款。
    pub async fn reconcile_pending(&self, older_than: Duration) -> Result<usize> {
        let age = TimeDelta::from_std(older_than)
            .map_err(|e| WaveError::Internal(format!("对账时长超出范围: {e}")))?;
        let stale = self
            .repo
            .list_stale_pending(Utc::now() - age, RECONCILE_BATCH_SIZE)
            .await?;

        let mut republished = 0;
        for tx in &stale {
            match self.publish_initiated(tx).await {
                Ok(()) => republished += 1,
                Err(e) => warn!(
                    external_id = %tx.external_id,
                    error = %e,
                    "对账重新发布失败"
                ),
            }
        }

        if !stale.is_empty() {
            info!(found = stale.len(), republished, "PENDING 交易对账完成");
        }
        Ok(republished)
    }

    fn validate(&self, request: TransferRequest) -> Result<NewTransaction> {
        let (Some(sender), Some(receiver)) = (request.sender, request.receiver) else {
            return Err(OrchestratorError::InvalidRequest(
                "付款方和收款方不能为空".to_string(),
            ));
        };
        if sender <= 0 || receiver <= 0 {
            return Err(OrchestratorError::InvalidRequest(format!(
                "账户 ID 必须为正数: sender={sender}, receiver={receiver}"
            )));
        }
        if sender == receiver {
            return Err(OrchestratorError::InvalidRequest(
                "不能向自己转账".to_string(),
            ));
        }
        if request.amount <= 0 {
            return Err(OrchestratorError::InvalidRequest(format!(
                "amount 必须为正数: {}",
                request.amount
            )));
        }

        let comment = request.comment.filter(|c| !c.trim().is_empty());
        if let Some(comment) = &comment
            && comment.chars().count() > self.comment_max_len
        {
            return Err(OrchestratorError::InvalidRequest(format!(
                "备注长度不能超过 {} 个字符",
                self.comment_max_len
            )));
        }

        Ok(NewTransaction {
            external_id: Uuid::new_v4().to_string(),
            sender,
            receiver,
            amount: request.amount,
            comment,
        })
    }

    async fn publish_initiated(&self, tx: &Transaction) -> walletwave_shared::error::Result<()> {
        let event = TransferInitiated {
            external_id: tx.external_id.clone(),
            sender: tx.sender,
            receiver: tx.receiver,
            amount: tx.amount,
        };
        publish_json(
            self.publisher.as_ref(),
            topics::TRANSFER_INITIATED,
            &event.external_id,
            &event,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemoryTransactionRepository, MockTransactionRepository};
    use walletwave_shared::events::SettlementOutcome;
    use walletwave_shared::test_utils::RecordingPublisher;

    fn fixture() -> (
        TransactionService,
        Arc<InMemoryTransactionRepository>,
        Arc<RecordingPublisher>,
    ) {
        let repo = Arc::new(InMemoryTransactionRepository::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let service = TransactionService::new(repo.clone(), publisher.clone(), &SagaConfig::default());
        (service, repo, publisher)
    }

    fn request(sender: i64, receiver: i64, amount: i64) -> TransferRequest {
        TransferRequest {
            sender: Some(sender),
            receiver: Some(receiver),
            amount,
            comment: Some("dinner".to_string()),
        }
    }

    fn settled(tx: &Transaction, outcome: SettlementOutcome) -> TransferSettled {
        TransferSettled {
            external_id: tx.external_id.clone(),
            sender: Some(tx.sender),
            receiver: Some(tx.receiver),
            amount: tx.amount,
            outcome,
            sender_wallet_id: None,
            receiver_wallet_id: None,
            reason: match outcome {
                SettlementOutcome::Success => None,
                SettlementOutcome::Failed => Some("insufficient balance".to_string()),
            },
        }
    }

    #[tokio::test]
    async fn test_submit_persists_pending_and_publishes() {
        let (service, _, publisher) = fixture();

        let tx = service.submit(request(1, 2, 50)).await.unwrap();

        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(Uuid::parse_str(&tx.external_id).is_ok());

        let sent = publisher.published(topics::TRANSFER_INITIATED);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].key, tx.external_id);
        let event: TransferInitiated = sent[0].decode();
        assert_eq!((event.sender, event.receiver, event.amount), (1, 2, 50));
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_requests() {
        let (service, repo, publisher) = fixture();

        let cases = vec![
            TransferRequest {
                sender: None,
                ..request(1, 2, 50)
            },
            TransferRequest {
                receiver: None,
                ..request(1, 2, 50)
            },
            request(1, 2, 0),
            request(1, 2, -5),
            request(3, 3, 10),
            TransferRequest {
                comment: Some("x".repeat(256)),
                ..request(1, 2, 50)
            },
        ];

        for case in cases {
            let result = service.submit(case.clone()).await;
            assert!(
                matches!(result, Err(OrchestratorError::InvalidRequest(_))),
                "应拒绝 {case:?}"
            );
        }

        assert!(repo.all().is_empty());
        assert!(publisher.all().is_empty());

        let ok = TransferRequest {
            comment: Some("x".repeat(255)),
            ..request(1, 2, 50)
        };
        tokio_test::assert_ok!(service.submit(ok).await);
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_transaction_pending() {
        let (service, repo, publisher) = fixture();
        publisher.set_failing(true);

        let tx = service.submit(request(1, 2, 50)).await.unwrap();

        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(repo.all().len(), 1);

        // 对账任务补发
        publisher.set_failing(false);
        let republished = service.reconcile_pending(Duration::ZERO).await.unwrap();
        assert_eq!(republished, 1);
        assert_eq!(publisher.count(topics::TRANSFER_INITIATED), 1);
    }

    #[tokio::test]
    async fn test_settlement_finalizes_and_requests_notification() {
        let (service, _, publisher) = fixture();
        let tx = service.submit(request(1, 2, 50)).await.unwrap();

        let result = service
            .on_settled(&settled(&tx, SettlementOutcome::Failed))
            .await
            .unwrap();

        assert!(matches!(result, SettlementResult::Finalized(_)));
        assert_eq!(result.transaction().status, TransactionStatus::Failed);

        let requests = publisher.published(topics::NOTIFICATION_REQUESTED);
        assert_eq!(requests.len(), 1);
        let request: NotificationRequested = requests[0].decode();
        assert_eq!(request.owner_id, 1);
        assert_eq!(request.status, FinalStatus::Failed);
        assert_eq!(request.reason.as_deref(), Some("insufficient balance"));
    }

    #[tokio::test]
    async fn test_duplicate_settlement_is_absorbed() {
        let (service, _, publisher) = fixture();
        let tx = service.submit(request(1, 2, 50)).await.unwrap();
        let event = settled(&tx, SettlementOutcome::Success);

        service.on_settled(&event).await.unwrap();
        let again = service.on_settled(&event).await.unwrap();
        // 相反结果的迟到事件也不能改变终态
        let late = service
            .on_settled(&settled(&tx, SettlementOutcome::Failed))
            .await
            .unwrap();

        assert!(matches!(again, SettlementResult::AlreadySettled(_)));
        assert!(matches!(late, SettlementResult::AlreadySettled(_)));
        assert_eq!(
            service.get(&tx.external_id).await.unwrap().status,
            TransactionStatus::Success
        );
        assert_eq!(publisher.count(topics::NOTIFICATION_REQUESTED), 1);
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let (service, _, publisher) = fixture();
        let tx = Transaction {
            id: 0,
            external_id: "ghost".to_string(),
            sender: 1,
            receiver: 2,
            amount: 5,
            comment: None,
            status: TransactionStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let result = service
            .on_settled(&settled(&tx, SettlementOutcome::Success))
            .await;

        assert!(matches!(
            result,
            Err(OrchestratorError::UnknownTransaction { .. })
        ));
        assert!(publisher.all().is_empty());
        assert!(matches!(
            service.get("ghost").await,
            Err(OrchestratorError::UnknownTransaction { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_settlement_forces_failed() {
        let (service, _, publisher) = fixture();
        let tx = service.submit(request(1, 2, 50)).await.unwrap();
        let mut event = settled(&tx, SettlementOutcome::Success);
        event.sender = None;

        let result = service.on_settled(&event).await;

        assert!(matches!(
            result,
            Err(OrchestratorError::MalformedEvent { .. })
        ));
        assert_eq!(
            service.get(&tx.external_id).await.unwrap().status,
            TransactionStatus::Failed
        );
        assert_eq!(publisher.count(topics::NOTIFICATION_REQUESTED), 0);
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mut repo = MockTransactionRepository::new();
        repo.expect_find_by_external_id()
            .returning(|_| Err(WaveError::Database(sqlx::Error::PoolTimedOut)));
        repo.expect_finalize().never();

        let service = TransactionService::new(
            Arc::new(repo),
            Arc::new(RecordingPublisher::new()),
            &SagaConfig::default(),
        );
        let event = TransferSettled {
            external_id: "tx-1".to_string(),
            sender: Some(1),
            receiver: Some(2),
            amount: 5,
            outcome: SettlementOutcome::Success,
            sender_wallet_id: None,
            receiver_wallet_id: None,
            reason: None,
        };

        let err = service.on_settled(&event).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_list_by_participant() {
        let (service, _, _) = fixture();
        service.submit(request(1, 2, 10)).await.unwrap();
        service.submit(request(2, 3, 10)).await.unwrap();
        service.submit(request(3, 4, 10)).await.unwrap();

        assert_eq!(service.list_by_participant(2).await.unwrap().len(), 2);
        assert_eq!(service.list_by_participant(9).await.unwrap().len(), 0);
    }
}
