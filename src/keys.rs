//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 存储键生成
//!
//! 根据命名空间和资源标识推导所有存储键，无状态、纯函数。
//!
//! 键格式为 `{namespace}:{role}:{{resource}}`，花括号是Redis Cluster的hash tag，
//! 保证同一资源的所有键落在同一个slot上（多键Lua脚本的前提）。

use crate::constants::{DEFAULT_NAMESPACE, MAX_KEY_COMPONENT_LENGTH};
use crate::error::TripGateError;

/// 验证键组件
///
/// # 参数
/// - `component`: 资源标识或命名空间
///
/// # 返回
/// - `Ok(())`: 验证通过
/// - `Err(String)`: 失败原因
fn validate_key_component(component: &str) -> Result<(), String> {
    if component.is_empty() {
        return Err("键组件不能为空".to_string());
    }

    if component.chars().count() > MAX_KEY_COMPONENT_LENGTH {
        return Err(format!(
            "键组件长度超过限制（最大 {} 字符）",
            MAX_KEY_COMPONENT_LENGTH
        ));
    }

    // 分隔符、hash tag和通配符会破坏键的唯一性
    if component
        .chars()
        .any(|c| matches!(c, ':' | '{' | '}' | '*' | '?') || c.is_whitespace() || c.is_control())
    {
        return Err(format!("键组件包含非法字符: {}", component));
    }

    Ok(())
}

/// 验证资源标识
pub fn validate_resource_id(resource: &str) -> Result<(), TripGateError> {
    validate_key_component(resource).map_err(TripGateError::InvalidResourceId)
}

/// 键生成器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    namespace: String,
}

impl Default for KeySchema {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl KeySchema {
    /// 创建新的键生成器
    pub fn new(namespace: impl Into<String>) -> Result<Self, TripGateError> {
        let namespace = namespace.into();
        validate_key_component(&namespace)
            .map_err(|e| TripGateError::ConfigError(format!("非法命名空间: {}", e)))?;
        Ok(Self { namespace })
    }

    /// 命名空间
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn resource_key(&self, role: &str, resource: &str) -> String {
        format!("{}:{}:{{{}}}", self.namespace, role, resource)
    }

    /// 计数器键
    pub fn counter_key(&self, resource: &str) -> String {
        self.resource_key("counter", resource)
    }

    /// 资源配置键
    pub fn config_key(&self, resource: &str) -> String {
        self.resource_key("config", resource)
    }

    /// 半开探测键
    pub fn probe_key(&self, resource: &str) -> String {
        self.resource_key("probe", resource)
    }

    /// 准入锁键
    pub fn admission_lock_key(&self, resource: &str) -> String {
        self.resource_key("admission_lock", resource)
    }

    /// 反馈锁键
    pub fn feedback_lock_key(&self, resource: &str) -> String {
        self.resource_key("feedback_lock", resource)
    }

    /// 半开集合键（命名空间内共享）
    pub fn half_open_set_key(&self) -> String {
        format!("{}:half_open", self.namespace)
    }

    /// 一次性生成某资源的全部键
    pub fn for_resource(&self, resource: &str) -> Result<ResourceKeys, TripGateError> {
        validate_resource_id(resource)?;
        Ok(ResourceKeys {
            resource: resource.to_string(),
            counter: self.counter_key(resource),
            config: self.config_key(resource),
            probe: self.probe_key(resource),
            admission_lock: self.admission_lock_key(resource),
            feedback_lock: self.feedback_lock_key(resource),
            half_open_set: self.half_open_set_key(),
        })
    }
}

/// 单个资源的全部键
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceKeys {
    pub resource: String,
    pub counter: String,
    pub config: String,
    pub probe: String,
    pub admission_lock: String,
    pub feedback_lock: String,
    pub half_open_set: String,
}
