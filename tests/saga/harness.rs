//! 进程内装配与事件泵

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notification_worker::models::{Notification, NotificationCategory};
use notification_worker::profiles::Profile as DisplayProfile;
use notification_worker::repository::InMemoryNotificationRepository;
use notification_worker::service::NotificationService;
use transaction_service::models::{Transaction, TransferRequest};
use transaction_service::repository::InMemoryTransactionRepository;
use transaction_service::service::TransactionService;
use user_service::models::NewProfile;
use user_service::repository::{InMemoryProfileRepository, ProfileRepository};
use user_service::service::UserService;
use wallet_service::repository::InMemoryWalletRepository;
use wallet_service::service::LedgerService;
use walletwave_shared::cache::{CacheKey, MemoryCache, ProjectionCache};
use walletwave_shared::cache_aside::DurableSource;
use walletwave_shared::config::{LedgerConfig, SagaConfig};
use walletwave_shared::dlq::DlqProducer;
use walletwave_shared::error::Result;
use walletwave_shared::kafka::{ConsumerMessage, topics};
use walletwave_shared::retry::RetryPolicy;
use walletwave_shared::test_utils::{PublishedMessage, RecordingPublisher};

const CACHE_TTL: Duration = Duration::from_secs(60);

/// 通知服务读取的显示名来自 user-service 的资料表
struct RegisteredProfiles(Arc<InMemoryProfileRepository>);

#[async_trait]
impl DurableSource<DisplayProfile> for RegisteredProfiles {
    async fn load(&self, owner_id: i64) -> Result<Option<DisplayProfile>> {
        let profile = self.0.find_by_owner(owner_id).await?;
        Ok(profile.map(|p| DisplayProfile {
            owner_id: p.owner_id,
            name: p.name,
            email: p.email,
            phone: p.phone,
            age: p.age,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }))
    }
}

/// 一次事件泵的结果
#[derive(Debug, Default)]
pub struct PumpReport {
    pub delivered: usize,
    /// 处理方返回的错误
    pub failures: Vec<String>,
}

pub struct Saga {
    pub bus: Arc<RecordingPublisher>,
    pub dead_letters: Arc<RecordingPublisher>,
    pub cache: Arc<dyn ProjectionCache>,
    pub users: UserService,
    pub orchestrator: TransactionService,
    pub transactions: Arc<InMemoryTransactionRepository>,
    pub ledger: LedgerService,
    pub wallets: Arc<InMemoryWalletRepository>,
    pub notifications: NotificationService,
    pub inbox: Arc<InMemoryNotificationRepository>,
    ledger_dlq: DlqProducer,
    orchestrator_dlq: DlqProducer,
    notification_dlq: DlqProducer,
    policy: RetryPolicy,
    /// 已投递过的所有消息，按投递顺序
    pub history: Vec<PublishedMessage>,
}

impl Saga {
    pub fn new() -> Self {
        Self::with_cache(Arc::new(MemoryCache::new()))
    }

    pub fn with_cache(cache: Arc<dyn ProjectionCache>) -> Self {
        let bus = Arc::new(RecordingPublisher::new());
        let dead_letters = Arc::new(RecordingPublisher::new());

        let profiles = Arc::new(InMemoryProfileRepository::new());
        let users = UserService::new(profiles.clone(), cache.clone(), bus.clone(), CACHE_TTL);

        let transactions = Arc::new(InMemoryTransactionRepository::new());
        let orchestrator =
            TransactionService::new(transactions.clone(), bus.clone(), &SagaConfig::default());

        let wallets = Arc::new(InMemoryWalletRepository::new());
        let ledger = match LedgerService::new(
            wallets.clone(),
            cache.clone(),
            bus.clone(),
            &LedgerConfig::default(),
            CACHE_TTL,
        ) {
            Ok(ledger) => ledger,
            Err(e) => panic!("账本服务初始化失败: {e}"),
        };

        let inbox = Arc::new(InMemoryNotificationRepository::new());
        let notifications = NotificationService::new(
            inbox.clone(),
            cache.clone(),
            Arc::new(RegisteredProfiles(profiles)),
            CACHE_TTL,
        );

        Self {
            ledger_dlq: DlqProducer::new(dead_letters.clone(), "wallet-service"),
            orchestrator_dlq: DlqProducer::new(dead_letters.clone(), "transaction-service"),
            notification_dlq: DlqProducer::new(dead_letters.clone(), "notification-worker"),
            bus,
            dead_letters,
            cache,
            users,
            orchestrator,
            transactions,
            ledger,
            wallets,
            notifications,
            inbox,
            policy: RetryPolicy::none(),
            history: Vec::new(),
        }
    }

    /// 注册用户并让开户、欢迎通知全部完成
    pub async fn register(&mut self, name: &str) -> i64 {
        let profile = self
            .users
            .register(NewProfile {
                name: name.to_string(),
                email: Some(format!("{}@example.com", name.to_lowercase())),
                phone: None,
                age: 30,
            })
            .await
            .unwrap();
        let report = self.pump().await;
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        profile.owner_id
    }

    /// 直接改写数据库余额，并让缓存失效
    pub async fn set_balance(&self, owner_id: i64, balance: i64) {
        self.wallets.set_balance(owner_id, balance);
        let _ = self
            .cache
            .delete(&CacheKey::projection("wallet", owner_id))
            .await;
    }

    pub async fn submit(&self, sender: i64, receiver: i64, amount: i64) -> Transaction {
        self.orchestrator
            .submit(TransferRequest {
                sender: Some(sender),
                receiver: Some(receiver),
                amount,
                comment: None,
            })
            .await
            .unwrap()
    }

    /// 反复投递总线上的消息，直到没有新消息产生
    pub async fn pump(&mut self) -> PumpReport {
        let mut report = PumpReport::default();
        loop {
            let batch = self.bus.drain();
            if batch.is_empty() {
                return report;
            }
            for published in batch {
                let msg = published.to_consumer_message();
                self.history.push(published);
                report.delivered += 1;
                report.failures.extend(self.deliver(&msg).await);
            }
        }
    }

    /// 投递单条消息给所有订阅了该 topic 的服务，返回处理错误
    pub async fn deliver(&self, msg: &ConsumerMessage) -> Vec<String> {
        let mut failures = Vec::new();
        match msg.topic.as_str() {
            topics::OWNER_REGISTERED => {
                if let Err(e) = wallet_service::consumer::handle_message(
                    &self.ledger,
                    &self.ledger_dlq,
                    &self.policy,
                    msg,
                )
                .await
                {
                    failures.push(e.to_string());
                }
                if let Err(e) = notification_worker::consumer::handle_message(
                    &self.notifications,
                    &self.notification_dlq,
                    &self.policy,
                    msg,
                )
                .await
                {
                    failures.push(e.to_string());
                }
            }
            topics::TRANSFER_INITIATED => {
                if let Err(e) = wallet_service::consumer::handle_message(
                    &self.ledger,
                    &self.ledger_dlq,
                    &self.policy,
                    msg,
                )
                .await
                {
                    failures.push(e.to_string());
                }
            }
            topics::TRANSFER_SETTLED => {
                if let Err(e) = transaction_service::consumer::handle_message(
                    &self.orchestrator,
                    &self.orchestrator_dlq,
                    &self.policy,
                    msg,
                )
                .await
                {
                    failures.push(e.to_string());
                }
            }
            topics::NOTIFICATION_REQUESTED => {
                if let Err(e) = notification_worker::consumer::handle_message(
                    &self.notifications,
                    &self.notification_dlq,
                    &self.policy,
                    msg,
                )
                .await
                {
                    failures.push(e.to_string());
                }
            }
            other => panic!("没有服务订阅 topic: {other}"),
        }
        failures
    }

    /// 重新投递历史上某个 topic 的第 n 条消息
    pub async fn redeliver(&self, topic: &str, index: usize) -> Vec<String> {
        let msg = self
            .history
            .iter()
            .filter(|m| m.topic == topic)
            .nth(index)
            .unwrap_or_else(|| panic!("{topic} 上没有第 {index} 条消息"))
            .to_consumer_message();
        self.deliver(&msg).await
    }

    /// 历史上某个 topic 的全部消息
    pub fn delivered(&self, topic: &str) -> Vec<PublishedMessage> {
        self.history
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub async fn transaction(&self, external_id: &str) -> Transaction {
        self.orchestrator.get(external_id).await.unwrap()
    }

    pub async fn balance(&self, owner_id: i64) -> i64 {
        self.ledger.get_balance(owner_id).await.unwrap().balance
    }

    /// 某用户收到的转账类通知，最新的在前
    pub async fn transfer_notifications(&self, owner_id: i64) -> Vec<Notification> {
        self.notifications
            .list_by_owner(owner_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|n| n.category == NotificationCategory::Transaction)
            .collect()
    }
}
