//! 转账交易编排服务
//!
//! 持有交易记录的完整生命周期：受理转账请求并落库为 PENDING，发布 `transfer.initiated`；
//! 消费账本的 `transfer.settled` 把交易推进到 SUCCESS / FAILED，再发布 `notification.requested`。
//! 状态只允许 PENDING -> 终态，重复投递的结算事件在这里被吸收。

pub mod consumer;
pub mod error;
pub mod models;
pub mod repository;
pub mod service;
