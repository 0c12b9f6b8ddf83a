//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 资源配置注册表
//!
//! 注册时写入一条完整的配置记录，准入和反馈每次调用都从存储读取。

use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{ResourceConfig, ResourceRule};
use crate::error::TripGateError;
use crate::keys::{validate_resource_id, KeySchema};
use crate::storage::Storage;

/// 配置注册表
#[derive(Clone)]
pub struct Registry {
    storage: Arc<dyn Storage>,
    keys: KeySchema,
}

impl Registry {
    /// 创建注册表
    pub fn new(storage: Arc<dyn Storage>, keys: KeySchema) -> Self {
        Self { storage, keys }
    }

    /// 注册资源，重复注册会覆盖旧配置
    pub async fn register(
        &self,
        resource: &str,
        config: &ResourceConfig,
    ) -> Result<(), TripGateError> {
        validate_resource_id(resource)?;
        config.validate().map_err(|e| {
            TripGateError::ConfigError(format!("资源 {} 配置无效: {}", resource, e))
        })?;

        let fields = config.to_fields();
        self.storage
            .hset_all(&self.keys.config_key(resource), &fields, None)
            .await?;

        info!(
            "注册资源: resource={}, kind={}, threshold={}",
            resource, config.rule_kind, config.critical_threshold
        );
        Ok(())
    }

    /// 按配置文件中的规则注册
    pub async fn register_rule(&self, rule: &ResourceRule) -> Result<(), TripGateError> {
        let config = rule.to_config()?;
        self.register(&rule.resource, &config).await
    }

    /// 资源是否已注册
    pub async fn exists(&self, resource: &str) -> Result<bool, TripGateError> {
        validate_resource_id(resource)?;
        Ok(self.storage.exists(&self.keys.config_key(resource)).await?)
    }

    /// 读取资源配置
    pub async fn load(&self, resource: &str) -> Result<ResourceConfig, TripGateError> {
        let fields = self
            .storage
            .hget_all(&self.keys.config_key(resource))
            .await?;
        let config = ResourceConfig::from_fields(resource, &fields)?;
        debug!("读取配置: resource={}, kind={}", resource, config.rule_kind);
        Ok(config)
    }
}
