//! 钱包账本服务
//!
//! 持有所有钱包余额。消费 `owner.registered` 为新用户开户，消费 `transfer.initiated`
//! 校验并原子地完成扣款与入账，再以 `transfer.settled` 发布结算结果。
//! 余额读取走旁路缓存，数据库始终是唯一权威。

pub mod consumer;
pub mod error;
pub mod models;
pub mod repository;
pub mod service;
