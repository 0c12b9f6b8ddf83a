//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 错误类型定义
//!
//! 使用thiserror定义所有错误类型。

use thiserror::Error;

/// TripGate 错误类型
#[derive(Error, Debug)]
pub enum TripGateError {
    /// 资源配置缺失（未注册或字段不完整）
    #[error("资源配置缺失: {0}")]
    ConfigMissing(String),

    /// 未知的规则类型
    #[error("未知的规则类型: {0}")]
    InvalidRuleKind(String),

    /// 获取分布式锁超时
    #[error("获取{lock}超时: resource={resource}, attempts={attempts}")]
    LockTimeout {
        resource: String,
        lock: &'static str,
        attempts: u32,
    },

    /// 重复反馈
    #[error("请勿重复反馈: {0}")]
    DuplicateFeedback(String),

    /// 存储不可用
    #[error("存储不可用: {0}")]
    StoreUnavailable(#[from] StorageError),

    /// 非法资源标识
    #[error("非法资源标识: {0}")]
    InvalidResourceId(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),
}

/// 存储错误
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    /// 连接错误
    #[error("连接错误: {0}")]
    ConnectionError(String),

    /// 查询错误
    #[error("查询错误: {0}")]
    QueryError(String),

    /// 超时错误
    #[error("超时错误: {0}")]
    TimeoutError(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
            StorageError::ConnectionError(err.to_string())
        } else if err.is_timeout() {
            StorageError::TimeoutError(err.to_string())
        } else {
            StorageError::QueryError(err.to_string())
        }
    }
}

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CircuitState {
    /// 关闭状态（正常）
    Closed,
    /// 打开状态（熔断）
    Open,
    /// 半开状态（探测）
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}
