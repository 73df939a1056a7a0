//! 账本服务
//!
//! 处理流程（`transfer.initiated`）：
//! 1. 账本流水里已有该 externalId 的结果时，原样重新发布，到此结束
//! 2. 通过旁路缓存解析付款方、收款方钱包
//! 3. 按顺序校验：付款方钱包存在 -> 收款方钱包存在 -> 余额充足
//! 4. 任一校验失败先记录拒绝流水，再发布 `transfer.settled{failed, reason}`，不修改任何余额
//! 5. 校验通过后在一个数据库事务内扣款、入账
//! 6. 从数据库重新读取两个钱包覆盖缓存，再发布 `transfer.settled{success}`
//!
//! 每个 externalId 只结算一次：重复投递既不会重复扣款，也不会让已拒绝的转账在余额补足后入账。

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};
use walletwave_shared::cache::ProjectionCache;
use walletwave_shared::cache_aside::CacheAside;
use walletwave_shared::config::LedgerConfig;
use walletwave_shared::error::WaveError;
use walletwave_shared::events::{OwnerRegistered, TransferInitiated, TransferSettled};
use walletwave_shared::kafka::{EventPublisher, publish_json, topics};
use walletwave_shared::observability::metrics::{record_ledger_rejection, record_settlement};

use crate::error::{LedgerError, Result};
use crate::models::{Balance, Currency, LedgerEntry, TransferApplication, Wallet};
use crate::repository::{WalletRepository, WalletSource};

pub const REASON_SENDER_NOT_FOUND: &str = "sender wallet not found";
pub const REASON_RECEIVER_NOT_FOUND: &str = "receiver wallet not found";
pub const REASON_INSUFFICIENT_BALANCE: &str = "insufficient balance";

pub struct LedgerService {
    repo: Arc<dyn WalletRepository>,
    wallets: CacheAside<Wallet>,
    publisher: Arc<dyn EventPublisher>,
    opening_balance: i64,
    default_currency: Currency,
}

impl LedgerService {
    pub fn new(
        repo: Arc<dyn WalletRepository>,
        cache: Arc<dyn ProjectionCache>,
        publisher: Arc<dyn EventPublisher>,
        config: &LedgerConfig,
        cache_ttl: Duration,
    ) -> Result<Self> {
        let default_currency = Currency::from_str(&config.default_currency)?;
        let wallets = CacheAside::new(cache, Arc::new(WalletSource::new(repo.clone())), cache_ttl);

        Ok(Self {
            repo,
            wallets,
            publisher,
            opening_balance: config.opening_balance,
            default_currency,
        })
    }

    /// 新用户注册后开户，已有钱包时跳过
    #[instrument(skip(self), fields(owner_id = event.owner_id))]
    pub async fn on_owner_registered(&self, event: &OwnerRegistered) -> Result<()> {
        let created = self
            .repo
            .create_if_absent(event.owner_id, self.opening_balance, self.default_currency)
            .await?;

        match created {
            Some(wallet) => {
                let wallet = self.wallets.put(async move { Ok(wallet) }).await?;
                info!(
                    wallet_id = wallet.id,
                    balance = wallet.balance,
                    currency = %wallet.currency,
                    "钱包已创建"
                );
            }
            None => info!("钱包已存在，跳过开户"),
        }
        Ok(())
    }

    /// 处理转账请求，返回已发布的结算事件
    #[instrument(skip(self), fields(external_id = %event.external_id))]
    pub async fn on_transfer_initiated(&self, event: &TransferInitiated) -> Result<TransferSettled> {
        if let Some(entry) = self.repo.find_entry(&event.external_id).await? {
            return self.replay(event, &entry).await;
        }

        let Some(sender) = self.wallets.get(event.sender).await? else {
            return self.reject(event, REASON_SENDER_NOT_FOUND).await;
        };
        let Some(receiver) = self.wallets.get(event.receiver).await? else {
            return self.reject(event, REASON_RECEIVER_NOT_FOUND).await;
        };
        if sender.balance < event.amount {
            return self.reject(event, REASON_INSUFFICIENT_BALANCE).await;
        }

        let application = self
            .repo
            .apply_transfer(&event.external_id, sender.id, receiver.id, event.amount)
            .await?;

        match application {
            TransferApplication::Applied => {
                self.wallets.refresh(event.sender).await?;
                self.wallets.refresh(event.receiver).await?;
                info!(
                    sender = event.sender,
                    receiver = event.receiver,
                    amount = event.amount,
                    "转账已入账"
                );
            }
            TransferApplication::Duplicate => {
                // 并发投递抢先结算，以它记录的结果为准
                let entry = self.repo.find_entry(&event.external_id).await?.ok_or_else(|| {
                    WaveError::Internal(format!("账本流水缺失: {}", event.external_id))
                })?;
                return self.replay(event, &entry).await;
            }
            TransferApplication::InsufficientBalance => {
                // 缓存中的余额已过期，刷新后按余额不足拒绝
                self.wallets.refresh(event.sender).await?;
                return self.reject(event, REASON_INSUFFICIENT_BALANCE).await;
            }
        }

        let settled = TransferSettled::success(event, sender.id, receiver.id);
        self.publish(&settled).await?;
        record_settlement(settled.outcome.as_str());
        Ok(settled)
    }

    /// 查询余额
    pub async fn get_balance(&self, owner_id: i64) -> Result<Balance> {
        self.wallets
            .get(owner_id)
            .await?
            .map(|wallet| Balance::from(&wallet))
            .ok_or(LedgerError::WalletNotFound { owner_id })
    }

    async fn reject(&self, event: &TransferInitiated, reason: &str) -> Result<TransferSettled> {
        let entry = self
            .repo
            .record_rejection(&event.external_id, event.amount, reason)
            .await?;
        if entry.settlement_outcome().is_success() || entry.reason.as_deref() != Some(reason) {
            return self.replay(event, &entry).await;
        }

        warn!(
            sender = event.sender,
            receiver = event.receiver,
            amount = event.amount,
            reason,
            "转账被拒绝"
        );
        record_ledger_rejection(reason);

        let settled = TransferSettled::failed(event, reason);
        self.publish(&settled).await?;
        record_settlement(settled.outcome.as_str());
        Ok(settled)
    }

    /// 按账本流水中记录的结果重新发布，不再校验余额
    async fn replay(&self, event: &TransferInitiated, entry: &LedgerEntry) -> Result<TransferSettled> {
        let settled = entry.to_settlement(event);
        info!(outcome = %settled.outcome, "转账此前已结算，按记录重新发布");

        self.publish(&settled).await?;
        record_settlement(settled.outcome.as_str());
        Ok(settled)
    }

    async fn publish(&self, settled: &TransferSettled) -> Result<()> {
        publish_json(
            self.publisher.as_ref(),
            topics::TRANSFER_SETTLED,
            &settled.external_id,
            settled,
        )
        .await?;
        Ok(())
    }
}
