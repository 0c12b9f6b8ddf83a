//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 反馈处理
//!
//! 业务执行完毕后根据结果更新计数器和探测记录，在反馈锁内完成。
//!
//! # 状态转换
//!
//! - 关闭状态下失败次数达到阈值 → 熔断，加入半开集合
//! - 半开探测成功比例达到恢复比例 → 删除探测记录，移出半开集合
//! - 半开探测失败比例超过 `1 - recover_ratio` → 重新熔断

use tracing::{debug, info, warn};

use crate::config::{ResourceConfig, RuleKind};
use crate::constants::{FIELD_ERRORS, FIELD_PROBE_CORRECT, FIELD_PROBE_ERRORS, FIELD_TOTAL};
use crate::error::TripGateError;
use crate::keys::ResourceKeys;
use crate::lock::LockManager;
use crate::registry::Registry;
use crate::state::{CounterState, ProbeState, StateStore};
use crate::telemetry::{self, MetricEvent};
use crate::token::{AdmissionToken, Outcome};

/// 反馈引擎
#[derive(Clone)]
pub struct FeedbackEngine {
    registry: Registry,
    state: StateStore,
    locks: LockManager,
}

impl FeedbackEngine {
    pub fn new(registry: Registry, state: StateStore, locks: LockManager) -> Self {
        Self {
            registry,
            state,
            locks,
        }
    }

    /// 上报执行结果
    ///
    /// 获取反馈锁超时时令牌保持未使用，调用方可以重试。
    pub async fn resolve(
        &self,
        keys: &ResourceKeys,
        token: &AdmissionToken,
        outcome: Outcome,
    ) -> Result<(), TripGateError> {
        if token.rule_kind() == RuleKind::Qps {
            return Ok(());
        }

        self.locks
            .with_feedback_lock(keys, || async {
                if token.consume() {
                    return Err(TripGateError::DuplicateFeedback(
                        token.correlation_id().to_string(),
                    ));
                }
                self.apply(keys, token.correlation_id(), outcome).await
            })
            .await
    }

    async fn apply(
        &self,
        keys: &ResourceKeys,
        correlation_id: &str,
        outcome: Outcome,
    ) -> Result<(), TripGateError> {
        let config = self.registry.load(&keys.resource).await?;
        if config.rule_kind == RuleKind::Qps {
            debug!(
                "资源已改为QPS规则，忽略反馈: resource={}, correlation_id={}",
                keys.resource, correlation_id
            );
            return Ok(());
        }

        let counter = self.state.load_counter(keys).await?;
        let probe = self.state.load_probe(keys).await?;

        if counter.is_some_and(|c| c.is_open()) {
            debug!(
                "熔断中，忽略反馈: resource={}, correlation_id={}",
                keys.resource, correlation_id
            );
            return Ok(());
        }

        match (outcome, probe) {
            (Outcome::Success, Some(probe)) => {
                self.probe_success(keys, &config, probe, correlation_id)
                    .await
            }
            (Outcome::Failure, Some(probe)) => {
                self.probe_failure(keys, &config, probe, correlation_id)
                    .await
            }
            (Outcome::Success, None) => self.closed_success(keys, &config, counter).await,
            (Outcome::Failure, None) => {
                self.closed_failure(keys, &config, counter, correlation_id)
                    .await
            }
        }
    }

    async fn probe_success(
        &self,
        keys: &ResourceKeys,
        config: &ResourceConfig,
        probe: ProbeState,
        correlation_id: &str,
    ) -> Result<(), TripGateError> {
        let ratio = (probe.probe_correct + 1) as f64 / config.max_probes as f64;
        if ratio >= config.recover_ratio {
            self.state.delete_probe(keys).await?;
            self.state.leave_half_open(keys).await?;
            info!(
                "熔断恢复: resource={}, correlation_id={}",
                keys.resource, correlation_id
            );
            telemetry::record(MetricEvent::Recover);
        } else {
            self.state.incr_probe(keys, FIELD_PROBE_CORRECT).await?;
        }
        Ok(())
    }

    async fn probe_failure(
        &self,
        keys: &ResourceKeys,
        config: &ResourceConfig,
        probe: ProbeState,
        correlation_id: &str,
    ) -> Result<(), TripGateError> {
        let ratio = (probe.probe_errors + 1) as f64 / config.max_probes as f64;
        if ratio > 1.0 - config.recover_ratio {
            self.state
                .write_counter(keys, CounterState::open(0, 0), config.open_duration())
                .await?;
            self.state.delete_probe(keys).await?;
            warn!(
                "探测失败，重新熔断: resource={}, correlation_id={}",
                keys.resource, correlation_id
            );
            telemetry::record(MetricEvent::Reopen);
        } else {
            self.state.incr_probe(keys, FIELD_PROBE_ERRORS).await?;
        }
        Ok(())
    }

    async fn closed_success(
        &self,
        keys: &ResourceKeys,
        config: &ResourceConfig,
        counter: Option<CounterState>,
    ) -> Result<(), TripGateError> {
        if counter.is_none() {
            return self
                .state
                .write_counter(keys, CounterState::closed(1, 0), config.window())
                .await;
        }

        // 读取之后计数器可能已过期，此时开启新窗口
        if self.state.incr_counter(keys, FIELD_TOTAL).await?.is_none() {
            return self
                .state
                .write_counter(keys, CounterState::closed(1, 0), config.window())
                .await;
        }
        if config.rule_kind == RuleKind::ContinuousError {
            self.state.reset_errors(keys).await?;
        }
        Ok(())
    }

    async fn closed_failure(
        &self,
        keys: &ResourceKeys,
        config: &ResourceConfig,
        counter: Option<CounterState>,
        correlation_id: &str,
    ) -> Result<(), TripGateError> {
        let total = counter.map(|c| c.total).unwrap_or(0);

        if total + 1 < config.min_samples {
            return match counter {
                None => {
                    self.state
                        .write_counter(keys, CounterState::closed(1, 1), config.window())
                        .await
                }
                Some(_) => self.count_failure(keys, config).await,
            };
        }

        let Some(counter) = counter else {
            if 1.0 > config.critical_threshold {
                return self
                    .trip(keys, config, CounterState::open(0, 0), correlation_id)
                    .await;
            }
            let ttl = match config.rule_kind {
                RuleKind::AbnormalRatio => config.open_duration(),
                RuleKind::ContinuousError | RuleKind::Qps => config.window(),
            };
            return self
                .state
                .write_counter(keys, CounterState::closed(1, 1), ttl)
                .await;
        };

        let tripped = match config.rule_kind {
            RuleKind::AbnormalRatio => {
                (counter.errors + 1) as f64 / (counter.total + 1) as f64
                    > config.critical_threshold
            }
            // 比较的是本次失败之前的连续错误数
            RuleKind::ContinuousError => counter.errors as f64 > config.critical_threshold,
            RuleKind::Qps => false,
        };

        if tripped {
            let open = CounterState::open(counter.total, counter.errors);
            self.trip(keys, config, open, correlation_id).await
        } else {
            self.count_failure(keys, config).await
        }
    }

    async fn count_failure(
        &self,
        keys: &ResourceKeys,
        config: &ResourceConfig,
    ) -> Result<(), TripGateError> {
        if self.state.incr_counter(keys, FIELD_ERRORS).await?.is_some()
            && self.state.incr_counter(keys, FIELD_TOTAL).await?.is_some()
        {
            return Ok(());
        }
        self.state
            .write_counter(keys, CounterState::closed(1, 1), config.window())
            .await
    }

    /// 熔断
    ///
    /// 先加入半开集合再写入熔断记录。两步之间存储失败时资源已在半开集合中，
    /// 后续准入按探测配额放行，不会跳过探测直接恢复。
    async fn trip(
        &self,
        keys: &ResourceKeys,
        config: &ResourceConfig,
        state: CounterState,
        correlation_id: &str,
    ) -> Result<(), TripGateError> {
        self.state.enter_half_open(keys).await?;
        self.state
            .write_counter(keys, state, config.open_duration())
            .await?;
        warn!(
            "熔断: resource={}, kind={}, total={}, errors={}, open_seconds={}, correlation_id={}",
            keys.resource,
            config.rule_kind,
            state.total,
            state.errors,
            config.open_seconds,
            correlation_id
        );
        telemetry::record(MetricEvent::Trip);
        Ok(())
    }
}
