//! 共享库
//!
//! 各服务共用的基础设施：配置、错误、Redis 缓存与旁路缓存存储、Kafka 收发、
//! 事件契约、死信队列、重试、数据库连接与可观测性。

pub mod cache;
pub mod cache_aside;
pub mod config;
pub mod database;
pub mod dlq;
pub mod error;
pub mod events;
pub mod kafka;
pub mod observability;
pub mod retry;
pub mod test_utils;
