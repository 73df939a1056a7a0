//! 通知工作者服务
//!
//! 消费 `owner.registered` 与 `notification.requested`，通过旁路缓存解析用户显示名，
//! 生成站内通知并落库。每条通知带去重键，重复投递的事件不会产生第二条通知。
//! 同时提供收件箱查询与已读标记。

pub mod consumer;
pub mod error;
pub mod models;
pub mod profiles;
pub mod repository;
pub mod service;
pub mod templates;
