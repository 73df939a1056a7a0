//! 交易仓储
//!
//! 终态推进使用带条件的 UPDATE（`WHERE status = 'PENDING'`），
//! 并发到达的两条结算事件只有一条能生效。

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::PgPool;
use walletwave_shared::error::{Result, WaveError};

use crate::models::{NewTransaction, Transaction, TransactionStatus};

/// 交易仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn insert(&self, new: &NewTransaction) -> Result<Transaction>;

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Transaction>>;

    /// PENDING -> 终态，交易已是终态或不存在时返回 `None`
    async fn finalize(
        &self,
        external_id: &str,
        status: TransactionStatus,
    ) -> Result<Option<Transaction>>;

    /// 创建时间早于 `older_than` 的 PENDING 交易，按创建时间升序
    async fn list_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>>;

    /// 作为付款方或收款方参与的交易，最新的在前
    async fn list_by_participant(&self, owner_id: i64) -> Result<Vec<Transaction>>;
}

// ==================== PostgreSQL 实现 ====================

pub struct PgTransactionRepository {
    pool: PgPool,
}

impl PgTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionRepository for PgTransactionRepository {
    async fn insert(&self, new: &NewTransaction) -> Result<Transaction> {
        let tx = sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions (external_id, sender, receiver, amount, comment, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            RETURNING id, external_id, sender, receiver, amount, comment, status, created_at, updated_at
            "#,
        )
        .bind(&new.external_id)
        .bind(new.sender)
        .bind(new.receiver)
        .bind(new.amount)
        .bind(&new.comment)
        .bind(TransactionStatus::Pending)
        .fetch_one(&self.pool)
        .await?;

        Ok(tx)
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Transaction>> {
        let tx = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT id, external_id, sender, receiver, amount, comment, status, created_at, updated_at
            FROM transactions
            WHERE external_id = $1
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tx)
    }

    async fn finalize(
        &self,
        external_id: &str,
        status: TransactionStatus,
    ) -> Result<Option<Transaction>> {
        if !status.is_terminal() {
            return Err(WaveError::Validation(format!(
                "只能推进到终态: {}",
                status.as_str()
            )));
        }

        let tx = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET status = $2, updated_at = NOW()
            WHERE external_id = $1 AND status = 'PENDING'
            RETURNING id, external_id, sender, receiver, amount, comment, status, created_at, updated_at
            "#,
        )
        .bind(external_id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tx)
    }

    async fn list_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>> {
        let txs = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT id, external_id, sender, receiver, amount, comment, status, created_at, updated_at
            FROM transactions
            WHERE status = 'PENDING' AND created_at <= $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(txs)
    }

    async fn list_by_participant(&self, owner_id: i64) -> Result<Vec<Transaction>> {
        let txs = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT id, external_id, sender, receiver, amount, comment, status, created_at, updated_at
            FROM transactions
            WHERE sender = $1 OR receiver = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(txs)
    }
}

// ==================== 内存实现 ====================

/// 内存交易仓储，开发环境与跨服务流程测试使用
#[derive(Default)]
pub struct InMemoryTransactionRepository {
    transactions: DashMap<String, Transaction>,
    next_id: AtomicI64,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Transaction> {
        let mut txs: Vec<_> = self.transactions.iter().map(|t| t.value().clone()).collect();
        txs.sort_by_key(|t| t.id);
        txs
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn insert(&self, new: &NewTransaction) -> Result<Transaction> {
        if self.transactions.contains_key(&new.external_id) {
            return Err(WaveError::Validation(format!(
                "external_id 重复: {}",
                new.external_id
            )));
        }

        let now = Utc::now();
        let tx = Transaction {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            external_id: new.external_id.clone(),
            sender: new.sender,
            receiver: new.receiver,
            amount: new.amount,
            comment: new.comment.clone(),
            status: TransactionStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.transactions.insert(tx.external_id.clone(), tx.clone());
        Ok(tx)
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Transaction>> {
        Ok(self.transactions.get(external_id).map(|t| t.clone()))
    }

    async fn finalize(
        &self,
        external_id: &str,
        status: TransactionStatus,
    ) -> Result<Option<Transaction>> {
        if !status.is_terminal() {
            return Err(WaveError::Validation(format!(
                "只能推进到终态: {}",
                status.as_str()
            )));
        }

        let Some(mut tx) = self.transactions.get_mut(external_id) else {
            return Ok(None);
        };
        if tx.status.is_terminal() {
            return Ok(None);
        }

        tx.status = status;
        tx.updated_at = Utc::now();
        Ok(Some(tx.clone()))
    }

    async fn list_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>> {
        let mut txs: Vec<_> = self
            .transactions
            .iter()
            .filter(|t| t.status == TransactionStatus::Pending && t.created_at <= older_than)
            .map(|t| t.value().clone())
            .collect();
        txs.sort_by_key(|t| (t.created_at, t.id));
        txs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(txs)
    }

    async fn list_by_participant(&self, owner_id: i64) -> Result<Vec<Transaction>> {
        let mut txs: Vec<_> = self
            .transactions
            .iter()
            .filter(|t| t.sender == owner_id || t.receiver == owner_id)
            .map(|t| t.value().clone())
            .collect();
        txs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(txs)
    }
}
