//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 准入决策
//!
//! 在准入锁内读取配置和计数器，决定放行或拒绝：
//!
//! - **QPS**: 窗口内请求数超过阈值即拒绝，不发令牌
//! - **异常比例/连续错误**: 熔断中拒绝；半开状态下按探测配额放行；其余情况放行并发令牌

use tracing::{debug, trace};

use crate::config::{ResourceConfig, RuleKind};
use crate::constants::{FIELD_PROBES, FIELD_TOTAL};
use crate::error::TripGateError;
use crate::keys::ResourceKeys;
use crate::lock::LockManager;
use crate::registry::Registry;
use crate::state::{CounterState, ProbeState, StateStore};
use crate::telemetry::{self, MetricEvent};
use crate::token::Admission;

/// 准入决策引擎
#[derive(Clone)]
pub struct AdmissionEngine {
    registry: Registry,
    state: StateStore,
    locks: LockManager,
}

impl AdmissionEngine {
    pub fn new(registry: Registry, state: StateStore, locks: LockManager) -> Self {
        Self {
            registry,
            state,
            locks,
        }
    }

    /// 判断请求是否放行
    pub async fn admit(
        &self,
        keys: &ResourceKeys,
        correlation_id: String,
    ) -> Result<Admission, TripGateError> {
        let admission = self
            .locks
            .with_admission_lock(keys, || self.decide(keys, correlation_id))
            .await?;

        if admission.allowed {
            trace!(
                "放行: resource={}, kind={}, correlation_id={}",
                keys.resource,
                admission.rule_kind,
                admission.correlation_id
            );
            telemetry::record(MetricEvent::Admitted);
        } else {
            debug!(
                "拒绝: resource={}, kind={}, correlation_id={}",
                keys.resource, admission.rule_kind, admission.correlation_id
            );
            telemetry::record(MetricEvent::Rejected);
        }

        Ok(admission)
    }

    async fn decide(
        &self,
        keys: &ResourceKeys,
        correlation_id: String,
    ) -> Result<Admission, TripGateError> {
        let config = self.registry.load(&keys.resource).await?;
        let counter = self.state.load_counter(keys).await?;

        match config.rule_kind {
            RuleKind::Qps => self.decide_qps(keys, &config, counter, correlation_id).await,
            RuleKind::AbnormalRatio | RuleKind::ContinuousError => {
                self.decide_breaker(keys, &config, counter, correlation_id)
                    .await
            }
        }
    }

    async fn decide_qps(
        &self,
        keys: &ResourceKeys,
        config: &ResourceConfig,
        counter: Option<CounterState>,
        correlation_id: String,
    ) -> Result<Admission, TripGateError> {
        let Some(counter) = counter else {
            self.state
                .write_counter(keys, CounterState::closed(1, 0), config.window())
                .await?;
            return Ok(Admission::allowed(RuleKind::Qps, correlation_id));
        };

        if (counter.total + 1) as f64 > config.critical_threshold {
            return Ok(Admission::rejected(RuleKind::Qps, correlation_id));
        }

        // 窗口恰好在读取后过期，视为新窗口
        if self.state.incr_counter(keys, FIELD_TOTAL).await?.is_none() {
            self.state
                .write_counter(keys, CounterState::closed(1, 0), config.window())
                .await?;
        }
        Ok(Admission::allowed(RuleKind::Qps, correlation_id))
    }

    async fn decide_breaker(
        &self,
        keys: &ResourceKeys,
        config: &ResourceConfig,
        counter: Option<CounterState>,
        correlation_id: String,
    ) -> Result<Admission, TripGateError> {
        let kind = config.rule_kind;

        if counter.is_some_and(|c| c.is_open()) {
            return Ok(Admission::rejected(kind, correlation_id));
        }

        if !self.state.is_half_open(keys).await? {
            return Ok(Admission::allowed_with_token(
                &keys.resource,
                kind,
                correlation_id,
            ));
        }

        let first_probe = ProbeState {
            probes: 1,
            ..Default::default()
        };

        match self.state.load_probe(keys).await? {
            None => {
                if config.max_probes < 1 {
                    return Ok(Admission::rejected(kind, correlation_id));
                }
                self.state
                    .write_probe(keys, first_probe, config.probe_window())
                    .await?;
            }
            Some(probe) => {
                if probe.probes + 1 > config.max_probes {
                    return Ok(Admission::rejected(kind, correlation_id));
                }
                if self.state.incr_probe(keys, FIELD_PROBES).await?.is_none() {
                    self.state
                        .write_probe(keys, first_probe, config.probe_window())
                        .await?;
                }
            }
        }

        debug!(
            "半开探测放行: resource={}, correlation_id={}",
            keys.resource, correlation_id
        );
        Ok(Admission::allowed_with_token(
            &keys.resource,
            kind,
            correlation_id,
        ))
    }
}
