//! 钱包仓储
//!
//! 提供 PostgreSQL 与内存两种实现。余额只通过相对调整修改，扣款带余额守卫，
//! 数据库 CHECK (balance >= 0) 兜底。每个 externalId 的结算结果（成功或拒绝）都写入
//! 账本流水，之后的重复投递只读这份记录。

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use sqlx::PgPool;
use tracing::{debug, info};
use walletwave_shared::cache_aside::DurableSource;
use walletwave_shared::error::{Result, WaveError};

use crate::models::{Currency, LedgerEntry, TransferApplication, Wallet};

/// 钱包仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn find_by_owner(&self, owner_id: i64) -> Result<Option<Wallet>>;

    /// 为用户开户，已有钱包时返回 `None` 且不做任何修改
    async fn create_if_absent(
        &self,
        owner_id: i64,
        opening_balance: i64,
        currency: Currency,
    ) -> Result<Option<Wallet>>;

    /// 在一个事务内记录入账流水、扣款、入账
    async fn apply_transfer(
        &self,
        external_id: &str,
        sender_wallet_id: i64,
        receiver_wallet_id: i64,
        amount: i64,
    ) -> Result<TransferApplication>;

    /// 查询某个 externalId 已记录的结算结果
    async fn find_entry(&self, external_id: &str) -> Result<Option<LedgerEntry>>;

    /// 记录一次被拒绝的转账
    ///
    /// 该 externalId 已有流水时不做修改，返回先前记录的那一条。
    async fn record_rejection(
        &self,
        external_id: &str,
        amount: i64,
        reason: &str,
    ) -> Result<LedgerEntry>;
}

// ==================== PostgreSQL 实现 ====================

pub struct PgWalletRepository {
    pool: PgPool,
}

impl PgWalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WalletRepository for PgWalletRepository {
    async fn find_by_owner(&self, owner_id: i64) -> Result<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(
            r#"
            SELECT id, owner_id, balance, currency, created_at, updated_at
            FROM wallets
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    async fn create_if_absent(
        &self,
        owner_id: i64,
        opening_balance: i64,
        currency: Currency,
    ) -> Result<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(
            r#"
            INSERT INTO wallets (owner_id, balance, currency, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            ON CONFLICT (owner_id) DO NOTHING
            RETURNING id, owner_id, balance, currency, created_at, updated_at
            "#,
        )
        .bind(owner_id)
        .bind(opening_balance)
        .bind(currency)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    async fn apply_transfer(
        &self,
        external_id: &str,
        sender_wallet_id: i64,
        receiver_wallet_id: i64,
        amount: i64,
    ) -> Result<TransferApplication> {
        let mut tx = self.pool.begin().await?;

        // 1. 入账流水，external_id 唯一
        let recorded = sqlx::query(
            r#"
            INSERT INTO wallet_ledger_entries
                (external_id, sender_wallet_id, receiver_wallet_id, amount, outcome, created_at)
            VALUES ($1, $2, $3, $4, 'success', NOW())
            ON CONFLICT (external_id) DO NOTHING
            "#,
        )
        .bind(external_id)
        .bind(sender_wallet_id)
        .bind(receiver_wallet_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        if recorded.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(TransferApplication::Duplicate);
        }

        // 2. 带余额守卫的扣款
        let debited = sqlx::query(
            r#"
            UPDATE wallets
            SET balance = balance - $2, updated_at = NOW()
            WHERE id = $1 AND balance >= $2
            "#,
        )
        .bind(sender_wallet_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        if debited.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(TransferApplication::InsufficientBalance);
        }

        // 3. 入账
        let credited = sqlx::query(
            r#"
            UPDATE wallets
            SET balance = balance + $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(receiver_wallet_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        if credited.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(WaveError::not_found("Wallet", receiver_wallet_id));
        }

        tx.commit().await?;
        debug!(external_id, amount, "转账已入账");
        Ok(TransferApplication::Applied)
    }

    async fn find_entry(&self, external_id: &str) -> Result<Option<LedgerEntry>> {
        let entry = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT external_id, sender_wallet_id, receiver_wallet_id, amount, outcome, reason, created_at
            FROM wallet_ledger_entries
            WHERE external_id = $1
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn record_rejection(
        &self,
        external_id: &str,
        amount: i64,
        reason: &str,
    ) -> Result<LedgerEntry> {
        let inserted = sqlx::query_as::<_, LedgerEntry>(
            r#"
            INSERT INTO wallet_ledger_entries (external_id, amount, outcome, reason, created_at)
            VALUES ($1, $2, 'failed', $3, NOW())
            ON CONFLICT (external_id) DO NOTHING
            RETURNING external_id, sender_wallet_id, receiver_wallet_id, amount, outcome, reason, created_at
            "#,
        )
        .bind(external_id)
        .bind(amount)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(entry) = inserted {
            debug!(external_id, reason, "已记录拒绝流水");
            return Ok(entry);
        }

        // 并发投递已先写入流水，以先写入的为准
        self.find_entry(external_id).await?.ok_or_else(|| {
            WaveError::Internal(format!("账本流水冲突但查询不到记录: {external_id}"))
        })
    }
}

// ==================== 内存实现 ====================

/// 内存钱包仓储
///
/// 开发环境与跨服务流程测试使用。`apply_transfer` 与 `record_rejection` 在同一把锁内完成，
/// 与数据库事务一样保证扣款和入账同时生效，且每个 externalId 只结算一次。
#[derive(Default)]
pub struct InMemoryWalletRepository {
    wallets: DashMap<i64, Wallet>,
    entries: DashMap<String, LedgerEntry>,
    next_id: AtomicI64,
    apply_lock: Mutex<()>,
}

impl InMemoryWalletRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接设置余额，仅用于构造测试场景
    pub fn set_balance(&self, owner_id: i64, balance: i64) {
        if let Some(mut wallet) = self.wallets.get_mut(&owner_id) {
            wallet.balance = balance;
            wallet.updated_at = Utc::now();
        }
    }

    pub fn balance_of(&self, owner_id: i64) -> Option<i64> {
        self.wallets.get(&owner_id).map(|w| w.balance)
    }

    pub fn wallets(&self) -> Vec<Wallet> {
        self.wallets.iter().map(|w| w.value().clone()).collect()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    fn owner_of(&self, wallet_id: i64) -> Option<i64> {
        self.wallets
            .iter()
            .find(|w| w.id == wallet_id)
            .map(|w| w.owner_id)
    }
}

#[async_trait]
impl WalletRepository for InMemoryWalletRepository {
    async fn find_by_owner(&self, owner_id: i64) -> Result<Option<Wallet>> {
        Ok(self.wallets.get(&owner_id).map(|w| w.clone()))
    }

    async fn create_if_absent(
        &self,
        owner_id: i64,
        opening_balance: i64,
        currency: Currency,
    ) -> Result<Option<Wallet>> {
        let entry = match self.wallets.entry(owner_id) {
            Entry::Occupied(_) => return Ok(None),
            Entry::Vacant(entry) => entry,
        };

        let now = Utc::now();
        let wallet = Wallet {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            owner_id,
            balance: opening_balance,
            currency,
            created_at: now,
            updated_at: now,
        };
        entry.insert(wallet.clone());
        info!(owner_id, wallet_id = wallet.id, "内存钱包已创建");
        Ok(Some(wallet))
    }

    async fn apply_transfer(
        &self,
        external_id: &str,
        sender_wallet_id: i64,
        receiver_wallet_id: i64,
        amount: i64,
    ) -> Result<TransferApplication> {
        let _guard = self.apply_lock.lock();

        if self.entries.contains_key(external_id) {
            return Ok(TransferApplication::Duplicate);
        }

        let sender = self
            .owner_of(sender_wallet_id)
            .ok_or_else(|| WaveError::not_found("Wallet", sender_wallet_id))?;
        let receiver = self
            .owner_of(receiver_wallet_id)
            .ok_or_else(|| WaveError::not_found("Wallet", receiver_wallet_id))?;

        let available = self.balance_of(sender).unwrap_or_default();
        if available < amount {
            return Ok(TransferApplication::InsufficientBalance);
        }

        let now = Utc::now();
        if let Some(mut wallet) = self.wallets.get_mut(&sender) {
            wallet.balance -= amount;
            wallet.updated_at = now;
        }
        if let Some(mut wallet) = self.wallets.get_mut(&receiver) {
            wallet.balance += amount;
            wallet.updated_at = now;
        }
        self.entries.insert(
            external_id.to_string(),
            LedgerEntry::applied(external_id, sender_wallet_id, receiver_wallet_id, amount),
        );

        Ok(TransferApplication::Applied)
    }

    async fn find_entry(&self, external_id: &str) -> Result<Option<LedgerEntry>> {
        Ok(self.entries.get(external_id).map(|e| e.clone()))
    }

    async fn record_rejection(
        &self,
        external_id: &str,
        amount: i64,
        reason: &str,
    ) -> Result<LedgerEntry> {
        let _guard = self.apply_lock.lock();

        let entry = self
            .entries
            .entry(external_id.to_string())
            .or_insert_with(|| LedgerEntry::rejected(external_id, amount, reason));
        Ok(entry.clone())
    }
}

// ==================== 旁路缓存数据源 ====================

/// 钱包的持久化数据源，供 `CacheAside<Wallet>` 回源
pub struct WalletSource {
    repo: Arc<dyn WalletRepository>,
}

impl WalletSource {
    pub fn new(repo: Arc<dyn WalletRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl DurableSource<Wallet> for WalletSource {
    async fn load(&self, owner_id: i64) -> Result<Option<Wallet>> {
        self.repo.find_by_owner(owner_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (InMemoryWalletRepository, Wallet, Wallet) {
        let repo = InMemoryWalletRepository::new();
        let a = repo
            .create_if_absent(1, 100, Currency::Usd)
            .await
            .unwrap()
            .unwrap();
        let b = repo
            .create_if_absent(2, 0, Currency::Usd)
            .await
            .unwrap()
            .unwrap();
        (repo, a, b)
    }

    #[tokio::test]
    async fn test_create_if_absent_is_idempotent() {
        let (repo, a, _) = seeded().await;

        let again = repo.create_if_absent(1, 500, Currency::Eur).await.unwrap();
        assert!(again.is_none());

        let stored = repo.find_by_owner(1).await.unwrap().unwrap();
        assert_eq!(stored, a);
        assert_eq!(stored.balance, 100);
    }

    #[tokio::test]
    async fn test_apply_transfer_moves_funds_once() {
        let (repo, a, b) = seeded().await;

        let first = repo.apply_transfer("tx-1", a.id, b.id, 30).await.unwrap();
        let second = repo.apply_transfer("tx-1", a.id, b.id, 30).await.unwrap();

        assert_eq!(first, TransferApplication::Applied);
        assert_eq!(second, TransferApplication::Duplicate);
        assert_eq!(repo.balance_of(1), Some(70));
        assert_eq!(repo.balance_of(2), Some(30));
        assert_eq!(repo.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_apply_transfer_guards_balance() {
        let (repo, a, b) = seeded().await;

        let result = repo.apply_transfer("tx-2", a.id, b.id, 101).await.unwrap();

        assert_eq!(result, TransferApplication::InsufficientBalance);
        assert_eq!(repo.balance_of(1), Some(100));
        assert_eq!(repo.balance_of(2), Some(0));
        assert_eq!(repo.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_rejection_blocks_later_application() {
        let (repo, a, b) = seeded().await;

        let rejected = repo
            .record_rejection("tx-3", 150, "insufficient balance")
            .await
            .unwrap();
        assert_eq!(rejected.outcome, "failed");

        // 余额补足后同一 externalId 也不会再入账
        repo.set_balance(1, 500);
        let result = repo.apply_transfer("tx-3", a.id, b.id, 150).await.unwrap();

        assert_eq!(result, TransferApplication::Duplicate);
        assert_eq!(repo.balance_of(1), Some(500));
        assert_eq!(repo.balance_of(2), Some(0));
        assert_eq!(repo.find_entry("tx-3").await.unwrap(), Some(rejected));
    }

    #[tokio::test]
    async fn test_record_rejection_keeps_first_outcome() {
        let (repo, a, b) = seeded().await;
        repo.apply_transfer("tx-4", a.id, b.id, 10).await.unwrap();

        let entry = repo
            .record_rejection("tx-4", 10, "receiver wallet not found")
            .await
            .unwrap();

        assert_eq!(entry.outcome, "success");
        assert_eq!(entry.sender_wallet_id, Some(a.id));
        assert!(entry.reason.is_none());
        assert_eq!(repo.entry_count(), 1);
        assert!(repo.find_entry("tx-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wallet_source_reads_repository() {
        let (repo, a, _) = seeded().await;
        let source = WalletSource::new(Arc::new(repo));

        assert_eq!(source.load(1).await.unwrap(), Some(a));
        assert!(source.load(99).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_pg_apply_transfer() {
        use walletwave_shared::database::Database;
        use walletwave_shared::test_utils::{test_database_config, test_owner_id};

        let db = Database::connect(&test_database_config()).await.unwrap();
        db.run_migrations().await.unwrap();
        let repo = PgWalletRepository::new(db.pool().clone());

        let (owner_a, owner_b) = (test_owner_id(), test_owner_id());
        let a = repo
            .create_if_absent(owner_a, 100, Currency::Usd)
            .await
            .unwrap()
            .unwrap();
        let b = repo
            .create_if_absent(owner_b, 0, Currency::Usd)
            .await
            .unwrap()
            .unwrap();

        let external_id = format!("pg-test-{owner_a}");
        assert_eq!(
            repo.apply_transfer(&external_id, a.id, b.id, 40).await.unwrap(),
            TransferApplication::Applied
        );
        assert_eq!(
            repo.apply_transfer(&external_id, a.id, b.id, 40).await.unwrap(),
            TransferApplication::Duplicate
        );
        assert_eq!(repo.find_by_owner(owner_a).await.unwrap().unwrap().balance, 60);
        assert_eq!(repo.find_by_owner(owner_b).await.unwrap().unwrap().balance, 40);

        let rejected_id = format!("pg-test-rejected-{owner_a}");
        let rejected = repo
            .record_rejection(&rejected_id, 1000, "insufficient balance")
            .await
            .unwrap();
        assert_eq!(rejected.outcome, "failed");
        assert_eq!(
            repo.apply_transfer(&rejected_id, a.id, b.id, 10).await.unwrap(),
            TransferApplication::Duplicate
        );
        let again = repo
            .record_rejection(&rejected_id, 1000, "sender wallet not found")
            .await
            .unwrap();
        assert_eq!(again.reason.as_deref(), Some("insufficient balance"));
    }
}
