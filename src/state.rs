//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 共享状态读写
//!
//! 计数器、探测记录和半开集合的读-改-写操作。
//! 记录总是连同TTL整条写入；原地自增只作用于仍然存在的记录，过期的记录不会被复活。
//! 调用方负责在相应的分布式锁内执行这些操作。

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::constants::{
    FIELD_ERRORS, FIELD_PROBES, FIELD_PROBE_CORRECT, FIELD_PROBE_ERRORS, FIELD_STATE, FIELD_TOTAL,
};
use crate::error::{StorageError, TripGateError};
use crate::keys::ResourceKeys;
use crate::storage::Storage;

/// 计数器阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterPhase {
    Closed,
    Open,
}

impl CounterPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            CounterPhase::Closed => "closed",
            CounterPhase::Open => "open",
        }
    }
}

impl fmt::Display for CounterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CounterPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(CounterPhase::Closed),
            "open" => Ok(CounterPhase::Open),
            other => Err(format!("未知的计数器状态: {}", other)),
        }
    }
}

/// 计数器记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterState {
    /// 窗口内请求数
    pub total: u64,
    /// 窗口内失败数
    pub errors: u64,
    /// 阶段
    pub phase: CounterPhase,
}

impl CounterState {
    pub fn closed(total: u64, errors: u64) -> Self {
        Self {
            total,
            errors,
            phase: CounterPhase::Closed,
        }
    }

    pub fn open(total: u64, errors: u64) -> Self {
        Self {
            total,
            errors,
            phase: CounterPhase::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.phase == CounterPhase::Open
    }

    fn to_fields(self) -> [(&'static str, String); 3] {
        [
            (FIELD_TOTAL, self.total.to_string()),
            (FIELD_ERRORS, self.errors.to_string()),
            (FIELD_STATE, self.phase.as_str().to_string()),
        ]
    }

    fn from_fields(key: &str, fields: &HashMap<String, String>) -> Result<Self, TripGateError> {
        Ok(Self {
            total: parse_record_field(key, fields, FIELD_TOTAL)?,
            errors: parse_record_field(key, fields, FIELD_ERRORS)?,
            phase: parse_record_field(key, fields, FIELD_STATE)?,
        })
    }
}

/// 半开探测记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProbeState {
    /// 已放行的探测请求数
    pub probes: u64,
    /// 失败的探测数
    pub probe_errors: u64,
    /// 成功的探测数
    pub probe_correct: u64,
}

impl ProbeState {
    fn to_fields(self) -> [(&'static str, String); 3] {
        [
            (FIELD_PROBES, self.probes.to_string()),
            (FIELD_PROBE_ERRORS, self.probe_errors.to_string()),
            (FIELD_PROBE_CORRECT, self.probe_correct.to_string()),
        ]
    }

    fn from_fields(key: &str, fields: &HashMap<String, String>) -> Result<Self, TripGateError> {
        Ok(Self {
            probes: parse_record_field(key, fields, FIELD_PROBES)?,
            probe_errors: parse_record_field(key, fields, FIELD_PROBE_ERRORS)?,
            probe_correct: parse_record_field(key, fields, FIELD_PROBE_CORRECT)?,
        })
    }
}

fn parse_record_field<T>(
    key: &str,
    fields: &HashMap<String, String>,
    name: &str,
) -> Result<T, TripGateError>
where
    T: FromStr,
{
    fields
        .get(name)
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| {
            TripGateError::StoreUnavailable(StorageError::QueryError(format!(
                "记录损坏: key={}, field={}",
                key, name
            )))
        })
}

/// 状态存储
#[derive(Clone)]
pub struct StateStore {
    storage: Arc<dyn Storage>,
}

impl StateStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// 读取计数器，不存在时返回None
    pub async fn load_counter(
        &self,
        keys: &ResourceKeys,
    ) -> Result<Option<CounterState>, TripGateError> {
        let fields = self.storage.hget_all(&keys.counter).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        CounterState::from_fields(&keys.counter, &fields).map(Some)
    }

    /// 整条写入计数器
    pub async fn write_counter(
        &self,
        keys: &ResourceKeys,
        state: CounterState,
        ttl: Duration,
    ) -> Result<(), TripGateError> {
        trace!("写入计数器: key={}, state={:?}, ttl={:?}", keys.counter, state, ttl);
        self.storage
            .hset_all(&keys.counter, &state.to_fields(), Some(ttl))
            .await?;
        Ok(())
    }

    /// 计数器字段自增，记录已过期时不做任何事
    pub async fn incr_counter(
        &self,
        keys: &ResourceKeys,
        field: &str,
    ) -> Result<Option<u64>, TripGateError> {
        let value = self.storage.hincr_by(&keys.counter, field, 1).await?;
        Ok(value.map(|v| v.max(0) as u64))
    }

    /// 清零连续错误数
    pub async fn reset_errors(&self, keys: &ResourceKeys) -> Result<bool, TripGateError> {
        Ok(self
            .storage
            .hset_if_exists(&keys.counter, &[(FIELD_ERRORS, "0".to_string())])
            .await?)
    }

    /// 计数器剩余TTL
    pub async fn counter_ttl(
        &self,
        keys: &ResourceKeys,
    ) -> Result<Option<Duration>, TripGateError> {
        Ok(self.storage.ttl(&keys.counter).await?)
    }

    /// 读取探测记录，不存在时返回None
    pub async fn load_probe(
        &self,
        keys: &ResourceKeys,
    ) -> Result<Option<ProbeState>, TripGateError> {
        let fields = self.storage.hget_all(&keys.probe).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        ProbeState::from_fields(&keys.probe, &fields).map(Some)
    }

    /// 整条写入探测记录
    pub async fn write_probe(
        &self,
        keys: &ResourceKeys,
        state: ProbeState,
        ttl: Duration,
    ) -> Result<(), TripGateError> {
        trace!("写入探测记录: key={}, state={:?}, ttl={:?}", keys.probe, state, ttl);
        self.storage
            .hset_all(&keys.probe, &state.to_fields(), Some(ttl))
            .await?;
        Ok(())
    }

    /// 探测字段自增，记录已过期时不做任何事
    pub async fn incr_probe(
        &self,
        keys: &ResourceKeys,
        field: &str,
    ) -> Result<Option<u64>, TripGateError> {
        let value = self.storage.hincr_by(&keys.probe, field, 1).await?;
        Ok(value.map(|v| v.max(0) as u64))
    }

    pub async fn delete_probe(&self, keys: &ResourceKeys) -> Result<(), TripGateError> {
        Ok(self.storage.delete(&keys.probe).await?)
    }

    /// 是否处于半开集合
    pub async fn is_half_open(&self, keys: &ResourceKeys) -> Result<bool, TripGateError> {
        Ok(self
            .storage
            .sismember(&keys.half_open_set, &keys.resource)
            .await?)
    }

    /// 加入半开集合
    pub async fn enter_half_open(&self, keys: &ResourceKeys) -> Result<(), TripGateError> {
        self.storage
            .sadd(&keys.half_open_set, &keys.resource)
            .await?;
        Ok(())
    }

    /// 移出半开集合
    pub async fn leave_half_open(&self, keys: &ResourceKeys) -> Result<(), TripGateError> {
        self.storage
            .srem(&keys.half_open_set, &keys.resource)
            .await?;
        Ok(())
    }

    /// 批量检查半开集合成员
    pub async fn half_open_batch(
        &self,
        half_open_set: &str,
        resources: &[&str],
    ) -> Result<Vec<bool>, TripGateError> {
        Ok(self.storage.smismember(half_open_set, resources).await?)
    }
}
