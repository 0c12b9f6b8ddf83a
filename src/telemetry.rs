//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 监控和日志初始化模块
//!
//! # 功能
//!
//! - Prometheus指标（`monitoring` 特性）：准入、拒绝、熔断、恢复、重新熔断、锁超时
//! - tracing订阅器初始化（`telemetry` 特性）
//!
//! 引擎通过 [`record`] 上报事件，未启用 `monitoring` 或未设置全局实例时为空操作。
//!
//! # 示例
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tripgate::telemetry::{set_global_metrics, Metrics};
//!
//! let metrics = Arc::new(Metrics::new()?);
//! set_global_metrics(metrics.clone());
//! // ...
//! println!("{}", metrics.gather());
//! ```

#[cfg(feature = "monitoring")]
use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
#[cfg(feature = "monitoring")]
use std::sync::Arc;
#[cfg(feature = "monitoring")]
use tracing::error;

/// 引擎事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricEvent {
    /// 请求被放行
    Admitted,
    /// 请求被拒绝
    Rejected,
    /// 关闭状态下熔断
    Trip,
    /// 探测成功，恢复
    Recover,
    /// 探测失败，重新熔断
    Reopen,
    /// 获取锁超时
    LockTimeout,
}

/// 上报事件
pub fn record(event: MetricEvent) {
    #[cfg(feature = "monitoring")]
    {
        if let Some(metrics) = try_global() {
            metrics.record(event);
        }
    }

    #[cfg(not(feature = "monitoring"))]
    {
        let _ = event;
    }
}

/// 监控指标
#[cfg(feature = "monitoring")]
#[derive(Clone)]
pub struct Metrics {
    /// 放行的请求数
    pub admitted_total: IntCounter,
    /// 拒绝的请求数
    pub rejected_total: IntCounter,
    /// 熔断次数
    pub trips_total: IntCounter,
    /// 恢复次数
    pub recoveries_total: IntCounter,
    /// 半开探测失败后重新熔断的次数
    pub reopens_total: IntCounter,
    /// 锁超时次数
    pub lock_timeouts_total: IntCounter,
    /// 指标注册表
    registry: Registry,
}

/// 全局指标实例
#[cfg(feature = "monitoring")]
static GLOBAL_METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();

/// 设置全局指标实例，只有第一次调用生效
#[cfg(feature = "monitoring")]
pub fn set_global_metrics(metrics: Arc<Metrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

/// 获取全局指标实例
#[cfg(feature = "monitoring")]
pub fn try_global() -> Option<Arc<Metrics>> {
    GLOBAL_METRICS.get().cloned()
}

#[cfg(feature = "monitoring")]
fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

#[cfg(feature = "monitoring")]
impl Metrics {
    /// 创建新的监控指标
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        Ok(Self {
            admitted_total: counter(
                &registry,
                "tripgate_admitted_total",
                "Total number of admitted requests",
            )?,
            rejected_total: counter(
                &registry,
                "tripgate_rejected_total",
                "Total number of rejected requests",
            )?,
            trips_total: counter(
                &registry,
                "tripgate_trips_total",
                "Total number of circuit trips",
            )?,
            recoveries_total: counter(
                &registry,
                "tripgate_recoveries_total",
                "Total number of half-open recoveries",
            )?,
            reopens_total: counter(
                &registry,
                "tripgate_reopens_total",
                "Total number of failed half-open windows",
            )?,
            lock_timeouts_total: counter(
                &registry,
                "tripgate_lock_timeouts_total",
                "Total number of distributed lock timeouts",
            )?,
            registry,
        })
    }

    /// 记录事件
    pub fn record(&self, event: MetricEvent) {
        match event {
            MetricEvent::Admitted => self.admitted_total.inc(),
            MetricEvent::Rejected => self.rejected_total.inc(),
            MetricEvent::Trip => self.trips_total.inc(),
            MetricEvent::Recover => self.recoveries_total.inc(),
            MetricEvent::Reopen => self.reopens_total.inc(),
            MetricEvent::LockTimeout => self.lock_timeouts_total.inc(),
        }
    }

    /// 收集所有指标并返回Prometheus格式的文本
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!("指标编码失败: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// 全局指标的文本格式，未设置时返回None
#[cfg(feature = "monitoring")]
pub fn gather_text() -> Option<String> {
    try_global().map(|metrics| metrics.gather())
}

/// 初始化tracing订阅器
///
/// 优先使用 `RUST_LOG`，未设置时使用 `default_filter`。
#[cfg(feature = "telemetry")]
pub fn init_tracing(default_filter: &str) -> Result<(), crate::error::TripGateError> {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| crate::error::TripGateError::ConfigError(format!("初始化日志失败: {}", e)))
}
