//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 存储抽象层
//!
//! 定义共享键值存储接口和内存实现。
//!
//! 引擎只依赖 [`Storage`] trait，所有需要原子性的多步操作（带TTL的整条记录写入、
//! 仅在键存在时自增、带避让的加锁、比较后删除、批量成员检查）都是单个存储原语，
//! 换用一致性更强的后端时无需修改引擎。

use crate::error::StorageError;
use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// 带避让加锁的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAttempt {
    /// 获取成功
    Acquired,
    /// 锁已被他人持有
    Busy,
    /// 避让键存在，本轮未尝试获取
    Deferred,
}

/// 存储接口
#[async_trait]
pub trait Storage: Send + Sync {
    /// 获取值
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// 设置值
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>)
        -> Result<(), StorageError>;

    /// 删除值
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// 键是否存在
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// 剩余存活时间，键不存在或未设置过期时返回None
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StorageError>;

    /// 获取整条Hash记录，键不存在时返回空表
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StorageError>;

    /// 原子地替换整条Hash记录并设置TTL
    async fn hset_all(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Option<Duration>,
    ) -> Result<(), StorageError>;

    /// 仅在键存在时写入字段（保留原TTL），返回是否写入
    async fn hset_if_exists(
        &self,
        key: &str,
        fields: &[(&str, String)],
    ) -> Result<bool, StorageError>;

    /// 仅在键存在时自增字段（保留原TTL），键不存在时返回None
    async fn hincr_by(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<Option<i64>, StorageError>;

    /// 集合添加成员，返回是否新增
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StorageError>;

    /// 集合移除成员，返回是否移除
    async fn srem(&self, key: &str, member: &str) -> Result<bool, StorageError>;

    /// 是否为集合成员
    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StorageError>;

    /// 原子地批量检查集合成员，结果顺序与输入一致
    async fn smismember(&self, key: &str, members: &[&str]) -> Result<Vec<bool>, StorageError>;

    /// SET NX PX
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StorageError>;

    /// 原子地：`blocker` 存在则避让，否则 SET NX PX
    async fn set_nx_unless(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        blocker: &str,
    ) -> Result<LockAttempt, StorageError>;

    /// 值相等时删除，返回是否删除
    async fn compare_and_delete(&self, key: &str, value: &str) -> Result<bool, StorageError>;
}

/// 内存中的值
#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(AHashMap<String, String>),
    Set(AHashSet<String>),
}

/// 内存条目（包含值和过期时间）
#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// 过期时刻，溢出时视为不过期
fn deadline(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

fn wrong_type(key: &str) -> StorageError {
    StorageError::QueryError(format!("WRONGTYPE: {}", key))
}

/// 内存存储实现
///
/// 所有操作共享一把互斥锁，与Redis单线程执行命令和脚本的语义一致。
/// 过期基于tokio时钟，测试中可以用暂停的时钟推进TTL。
#[derive(Default)]
pub struct MemoryStorage {
    data: Mutex<AHashMap<String, Entry>>,
}

impl MemoryStorage {
    /// 创建新的内存存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 未过期的键数量
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.data
            .lock()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    /// 在持锁状态下执行，先清除已过期的目标键
    fn with_live<T>(&self, keys: &[&str], f: impl FnOnce(&mut AHashMap<String, Entry>) -> T) -> T {
        let now = Instant::now();
        let mut data = self.data.lock();
        for key in keys {
            if data.get(*key).is_some_and(|entry| entry.is_expired(now)) {
                data.remove(*key);
            }
        }
        f(&mut *data)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_live(&[key], |data| match data.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let expires_at = ttl.and_then(deadline);
        self.data.lock().insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at,
            },
        );
        trace!("SET key={}, ttl={:?}", key, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.data.lock().remove(key);
        trace!("DEL key={}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.with_live(&[key], |data| data.contains_key(key)))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StorageError> {
        let now = Instant::now();
        Ok(self.with_live(&[key], |data| {
            data.get(key)
                .and_then(|entry| entry.expires_at)
                .map(|at| at.saturating_duration_since(now))
        }))
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StorageError> {
        self.with_live(&[key], |data| match data.get(key) {
            None => Ok(HashMap::new()),
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn hset_all(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let hash = fields
            .iter()
            .map(|(field, value)| (field.to_string(), value.clone()))
            .collect();
        let expires_at = ttl.and_then(deadline);
        self.data.lock().insert(
            key.to_string(),
            Entry {
                value: Value::Hash(hash),
                expires_at,
            },
        );
        trace!("HSETALL key={}, fields={}, ttl={:?}", key, fields.len(), ttl);
        Ok(())
    }

    async fn hset_if_exists(
        &self,
        key: &str,
        fields: &[(&str, String)],
    ) -> Result<bool, StorageError> {
        self.with_live(&[key], |data| match data.get_mut(key) {
            None => Ok(false),
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => {
                for (field, value) in fields {
                    hash.insert(field.to_string(), value.clone());
                }
                Ok(true)
            }
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn hincr_by(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<Option<i64>, StorageError> {
        self.with_live(&[key], |data| match data.get_mut(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => {
                let current = match hash.get(field) {
                    Some(raw) => raw.parse::<i64>().map_err(|_| {
                        StorageError::QueryError(format!("字段不是整数: {}.{}", key, field))
                    })?,
                    None => 0,
                };
                let next = current + delta;
                hash.insert(field.to_string(), next.to_string());
                Ok(Some(next))
            }
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StorageError> {
        self.with_live(&[key], |data| {
            let entry = data.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Set(AHashSet::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Set(set) => Ok(set.insert(member.to_string())),
                _ => Err(wrong_type(key)),
            }
        })
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StorageError> {
        self.with_live(&[key], |data| {
            let (removed, now_empty) = match data.get_mut(key) {
                None => return Ok(false),
                Some(Entry {
                    value: Value::Set(set),
                    ..
                }) => (set.remove(member), set.is_empty()),
                Some(_) => return Err(wrong_type(key)),
            };
            // 空集合在Redis中即为不存在
            if now_empty {
                data.remove(key);
            }
            Ok(removed)
        })
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StorageError> {
        self.with_live(&[key], |data| match data.get(key) {
            None => Ok(false),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.contains(member)),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn smismember(&self, key: &str, members: &[&str]) -> Result<Vec<bool>, StorageError> {
        self.with_live(&[key], |data| match data.get(key) {
            None => Ok(vec![false; members.len()]),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(members.iter().map(|m| set.contains(*m)).collect()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StorageError> {
        let expires_at = deadline(ttl);
        Ok(self.with_live(&[key], |data| {
            if data.contains_key(key) {
                return false;
            }
            data.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at,
                },
            );
            true
        }))
    }

    async fn set_nx_unless(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        blocker: &str,
    ) -> Result<LockAttempt, StorageError> {
        let expires_at = deadline(ttl);
        Ok(self.with_live(&[key, blocker], |data| {
            if data.contains_key(blocker) {
                return LockAttempt::Deferred;
            }
            if data.contains_key(key) {
                return LockAttempt::Busy;
            }
            data.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at,
                },
            );
            LockAttempt::Acquired
        }))
    }

    async fn compare_and_delete(&self, key: &str, value: &str) -> Result<bool, StorageError> {
        Ok(self.with_live(&[key], |data| {
            let matches = matches!(
                data.get(key),
                Some(Entry { value: Value::Str(current), .. }) if current == value
            );
            if matches {
                data.remove(key);
            }
            matches
        }))
    }
}
