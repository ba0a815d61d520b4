//! TTL 缓存
//!
//! 通用的过期键值存储。读取采用惰性过期：过期条目一律视为不存在，
//! 物理删除可以发生在读取时，也可以推迟到后台清扫

use crate::sweep::Sweepable;
use cuba_common::SharedClock;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

struct CacheEntry<V> {
    value: V,
    expires_at_ms: u64,
}

/// 进程内 TTL 缓存
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    clock: SharedClock,
}

impl<V> TtlCache<V> {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// 插入或覆盖，`expires_at = now + ttl`
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let expires_at_ms = self
            .clock
            .now_ms()
            .saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));

        self.entries
            .write()
            .insert(key.into(), CacheEntry { value, expires_at_ms });
    }

    /// 删除条目
    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// 当前物理存储的条目数（含未被清扫的过期条目）
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// 移除所有过期条目，返回移除数量
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at_ms);
        before - entries.len()
    }
}

impl<V: Clone> TtlCache<V> {
    /// 读取未过期的值
    ///
    /// 读取不改变过期时间。过期条目顺手移除
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_ms();

        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if now < entry.expires_at_ms => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // 已过期：升级为写锁移除，重新校验避免读写间隙里条目被覆盖
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(key) {
            if now < entry.expires_at_ms {
                return Some(entry.value.clone());
            }
            entries.remove(key);
        }
        None
    }
}

impl<V: Send + Sync> Sweepable for TtlCache<V> {
    fn name(&self) -> &'static str {
        "ttl_cache"
    }

    fn sweep(&self) -> usize {
        self.sweep_expired()
    }
}
