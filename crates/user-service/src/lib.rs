//! 用户资料服务
//!
//! 负责用户注册与资料维护，是 `owner.registered` 事件的生产者。
//! 资料写入 `owner_profiles` 表后同步覆盖 `profile:{ownerId}` 缓存，
//! 通知服务解析显示名时读取的就是这份缓存。

pub mod error;
pub mod models;
pub mod repository;
pub mod service;
