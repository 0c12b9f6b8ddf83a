//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Governor 主控制器
//!
//! 组合配置注册表、状态存储、分布式锁、准入引擎和反馈引擎，
//! 是调用方唯一需要接触的入口。所有状态都保存在共享存储中，
//! 多个进程各自持有一个 Governor 即可共享同一份熔断决策。

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::admission::AdmissionEngine;
use crate::config::{GovernorConfig, ResourceConfig, ResourceRule};
use crate::error::{CircuitState, TripGateError};
use crate::feedback::FeedbackEngine;
use crate::keys::{validate_resource_id, KeySchema};
use crate::lock::LockManager;
use crate::registry::Registry;
use crate::state::{CounterState, ProbeState, StateStore};
use crate::storage::Storage;
use crate::token::{
    Admission, AdmissionToken, CorrelationIdGenerator, DefaultCorrelationIdGenerator, Outcome,
};

/// 资源状态快照
///
/// 无锁读取，仅供观察。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub resource: String,
    pub state: CircuitState,
    /// 计数器记录
    pub counter: Option<CounterState>,
    /// 熔断剩余时间
    pub open_remaining: Option<Duration>,
    /// 当前探测窗口的计数
    pub probe: Option<ProbeState>,
}

/// Governor 主控制器
pub struct Governor {
    /// 配置
    config: GovernorConfig,
    /// 键生成器
    keys: KeySchema,
    /// 配置注册表
    registry: Registry,
    /// 状态存储
    state: StateStore,
    /// 准入引擎
    admission: AdmissionEngine,
    /// 反馈引擎
    feedback: FeedbackEngine,
    /// 关联ID生成器
    id_generator: Arc<dyn CorrelationIdGenerator>,
}

impl Governor {
    /// 创建新的 Governor 实例
    pub fn new(config: GovernorConfig, storage: Arc<dyn Storage>) -> Result<Self, TripGateError> {
        config.validate()?;

        let keys = KeySchema::new(config.namespace.as_str())?;
        let registry = Registry::new(storage.clone(), keys.clone());
        let state = StateStore::new(storage.clone());
        let locks = LockManager::new(
            storage,
            config.admission_lock.clone(),
            config.feedback_lock.clone(),
        );

        info!("创建Governor, namespace={}", keys.namespace());

        Ok(Self {
            admission: AdmissionEngine::new(registry.clone(), state.clone(), locks.clone()),
            feedback: FeedbackEngine::new(registry.clone(), state.clone(), locks),
            config,
            keys,
            registry,
            state,
            id_generator: Arc::new(DefaultCorrelationIdGenerator),
        })
    }

    /// 替换关联ID生成器
    pub fn with_id_generator(mut self, generator: Arc<dyn CorrelationIdGenerator>) -> Self {
        self.id_generator = generator;
        self
    }

    /// 当前配置
    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// 键生成器
    pub fn key_schema(&self) -> &KeySchema {
        &self.keys
    }

    /// 注册资源
    #[instrument(skip(self, config))]
    pub async fn register(
        &self,
        resource: &str,
        config: &ResourceConfig,
    ) -> Result<(), TripGateError> {
        self.registry.register(resource, config).await
    }

    /// 按配置文件中的规则注册资源
    #[instrument(skip(self, rule), fields(resource = %rule.resource))]
    pub async fn register_rule(&self, rule: &ResourceRule) -> Result<(), TripGateError> {
        self.registry.register_rule(rule).await
    }

    /// 注册配置中声明的全部资源，返回注册数量
    pub async fn register_configured_resources(&self) -> Result<usize, TripGateError> {
        for rule in &self.config.resources {
            self.registry.register_rule(rule).await?;
        }
        Ok(self.config.resources.len())
    }

    /// 资源是否已注册
    pub async fn is_configured(&self, resource: &str) -> Result<bool, TripGateError> {
        self.registry.exists(resource).await
    }

    /// 请求准入
    ///
    /// 被放行的非QPS请求会带上令牌，业务执行完毕后通过 [`Governor::resolve`] 反馈结果。
    #[instrument(skip(self))]
    pub async fn admit(&self, resource: &str) -> Result<Admission, TripGateError> {
        let keys = self.keys.for_resource(resource)?;
        let correlation_id = self.id_generator.generate();
        self.admission.admit(&keys, correlation_id).await
    }

    /// 反馈执行结果
    ///
    /// 每个令牌只能反馈一次，重复反馈返回 [`TripGateError::DuplicateFeedback`]。
    #[instrument(
        skip(self, token),
        fields(resource = %token.resource(), correlation_id = %token.correlation_id())
    )]
    pub async fn resolve(
        &self,
        token: &AdmissionToken,
        outcome: Outcome,
    ) -> Result<(), TripGateError> {
        let keys = self.keys.for_resource(token.resource())?;
        self.feedback.resolve(&keys, token, outcome).await
    }

    /// 资源状态快照
    pub async fn state(&self, resource: &str) -> Result<CircuitSnapshot, TripGateError> {
        let keys = self.keys.for_resource(resource)?;
        let counter = self.state.load_counter(&keys).await?;
        let probe = self.state.load_probe(&keys).await?;

        let (state, open_remaining) = if counter.is_some_and(|c| c.is_open()) {
            (CircuitState::Open, self.state.counter_ttl(&keys).await?)
        } else if self.state.is_half_open(&keys).await? {
            (CircuitState::HalfOpen, None)
        } else {
            (CircuitState::Closed, None)
        };

        Ok(CircuitSnapshot {
            resource: resource.to_string(),
            state,
            counter,
            open_remaining,
            probe,
        })
    }

    /// 资源是否处于半开集合
    pub async fn is_half_open(&self, resource: &str) -> Result<bool, TripGateError> {
        let keys = self.keys.for_resource(resource)?;
        self.state.is_half_open(&keys).await
    }

    /// 批量检查半开集合，结果顺序与输入一致
    pub async fn half_open_batch(&self, resources: &[&str]) -> Result<Vec<bool>, TripGateError> {
        for resource in resources {
            validate_resource_id(resource)?;
        }
        self.state
            .half_open_batch(&self.keys.half_open_set_key(), resources)
            .await
    }
}
