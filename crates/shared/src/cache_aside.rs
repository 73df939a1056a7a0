//! 旁路缓存存储
//!
//! 钱包余额与用户资料共用的读穿透 / 写后刷新模式：
//! - 读：先查缓存，未命中时读数据库并回填，不缓存"不存在"的结果
//! - 写：先落库，成功后再覆盖缓存
//!
//! 缓存不可用时所有操作退化为直接访问数据库，结果不受影响。

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use tracing::{debug, warn};

use crate::cache::{CacheKey, ProjectionCache};
use crate::error::Result;
use crate::observability::metrics::record_cache_lookup;

/// 可缓存的记录
pub trait CacheProjection: Serialize + DeserializeOwned + Send + Sync {
    /// 实体类型，作为缓存 key 的前缀
    const ENTITY: &'static str;

    fn owner_id(&self) -> i64;

    fn cache_key(&self) -> String {
        CacheKey::projection(Self::ENTITY, self.owner_id())
    }
}

/// 持久化数据源
///
/// 数据库是唯一权威数据，缓存内容都由这里派生。
#[async_trait]
pub trait DurableSource<T>: Send + Sync {
    async fn load(&self, owner_id: i64) -> Result<Option<T>>;
}

/// 旁路缓存存储
pub struct CacheAside<T> {
    cache: Arc<dyn ProjectionCache>,
    source: Arc<dyn DurableSource<T>>,
    ttl: Duration,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for CacheAside<T> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            source: self.source.clone(),
            ttl: self.ttl,
            _marker: PhantomData,
        }
    }
}

impl<T: CacheProjection> CacheAside<T> {
    pub fn new(
        cache: Arc<dyn ProjectionCache>,
        source: Arc<dyn DurableSource<T>>,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            source,
            ttl,
            _marker: PhantomData,
        }
    }

    /// 读取记录
    ///
    /// 缓存异常或缓存内容无法解析时按未命中处理；数据库错误向上传播。
    pub async fn get(&self, owner_id: i64) -> Result<Option<T>> {
        let key = CacheKey::projection(T::ENTITY, owner_id);

        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(record) => {
                    debug!(key = %key, "缓存命中");
                    record_cache_lookup(T::ENTITY, "hit");
                    return Ok(Some(record));
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "缓存内容无法解析，回源数据库");
                    record_cache_lookup(T::ENTITY, "error");
                }
            },
            Ok(None) => {
                debug!(key = %key, "缓存未命中，回源数据库");
                record_cache_lookup(T::ENTITY, "miss");
            }
            Err(e) => {
                warn!(key = %key, error = %e, "缓存不可用，回源数据库");
                record_cache_lookup(T::ENTITY, "error");
            }
        }

        let record = self.source.load(owner_id).await?;
        if let Some(record) = &record {
            self.write_cache(record).await;
        }
        Ok(record)
    }

    /// 先执行持久化写入，成功后覆盖缓存
    ///
    /// 写入失败时缓存保持原样。
    pub async fn put<Fut>(&self, durable_write: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let record = durable_write.await?;
        self.write_cache(&record).await;
        Ok(record)
    }

    /// 从数据库重新读取并覆盖缓存
    ///
    /// 余额等相对更新之后调用，保证缓存不会继续提供更新前的值。
    pub async fn refresh(&self, owner_id: i64) -> Result<Option<T>> {
        let record = self.source.load(owner_id).await?;
        match &record {
            Some(record) => self.write_cache(record).await,
            None => self.evict(owner_id).await,
        }
        Ok(record)
    }

    /// 删除缓存条目
    pub async fn evict(&self, owner_id: i64) {
        let key = CacheKey::projection(T::ENTITY, owner_id);
        if let Err(e) = self.cache.delete(&key).await {
            warn!(key = %key, error = %e, "删除缓存失败");
        }
    }

    /// 回填缓存；写入失败时删除旧条目，避免继续提供更新前的值
    async fn write_cache(&self, record: &T) {
        let key = record.cache_key();
        let written = match serde_json::to_string(record) {
            Ok(raw) => self.cache.set(&key, &raw, self.ttl).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = written {
            warn!(key = %key, error = %e, "写入缓存失败，删除旧条目，后续读取将回源数据库");
            if let Err(e) = self.cache.delete(&key).await {
                warn!(key = %key, error = %e, "删除缓存失败");
            }
        }
    }
}
