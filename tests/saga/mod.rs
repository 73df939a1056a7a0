//! 跨服务转账流程测试
//!
//! 四个服务在同一进程内装配，事件通过内存总线按顺序投递，
//! 覆盖注册开户、转账成功 / 失败、结算幂等、缓存降级等完整链路。

mod harness;
mod properties;
mod scenarios;
