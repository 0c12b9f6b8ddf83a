//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 配置模块
//!
//! 定义资源规则、锁参数和引擎配置，支持从YAML/TOML加载。

use ahash::AHashSet as HashSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::*;
use crate::error::TripGateError;
use crate::keys::{validate_resource_id, KeySchema};

/// 规则类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// 窗口内请求数上限
    Qps,
    /// 异常比例
    AbnormalRatio,
    /// 连续错误
    ContinuousError,
}

impl RuleKind {
    /// 存储中的编码
    pub fn code(self) -> i64 {
        match self {
            RuleKind::Qps => 1,
            RuleKind::AbnormalRatio => 2,
            RuleKind::ContinuousError => 3,
        }
    }

    /// 文本名称
    pub fn as_str(self) -> &'static str {
        match self {
            RuleKind::Qps => "qps",
            RuleKind::AbnormalRatio => "abnormal_ratio",
            RuleKind::ContinuousError => "continuous_error",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<i64> for RuleKind {
    type Error = TripGateError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(RuleKind::Qps),
            2 => Ok(RuleKind::AbnormalRatio),
            3 => Ok(RuleKind::ContinuousError),
            other => Err(TripGateError::InvalidRuleKind(other.to_string())),
        }
    }
}

impl FromStr for RuleKind {
    type Err = TripGateError;

    /// 接受名称（不区分大小写，`-` 与 `_` 等价）或数字编码
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "qps" => Ok(RuleKind::Qps),
            "abnormal_ratio" => Ok(RuleKind::AbnormalRatio),
            "continuous_error" => Ok(RuleKind::ContinuousError),
            other => other
                .parse::<i64>()
                .map_err(|_| TripGateError::InvalidRuleKind(s.to_string()))
                .and_then(RuleKind::try_from),
        }
    }
}

/// 资源配置
///
/// 在存储中保存为一条包含八个字段的Hash记录，只有重新注册才会覆盖。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// 规则类型
    pub rule_kind: RuleKind,
    /// 关闭状态下计数器的TTL（秒）
    pub window_seconds: u64,
    /// 阈值：QPS/连续错误为请求数，异常比例为比例
    pub critical_threshold: f64,
    /// 熔断持续时间（秒）
    pub open_seconds: u64,
    /// 开始统计比例/连续错误前需要的最少请求数
    pub min_samples: u64,
    /// 每个半开窗口允许的探测请求数
    pub max_probes: u64,
    /// 探测记录的TTL（秒）
    pub probe_window_seconds: u64,
    /// 恢复比例
    pub recover_ratio: f64,
}

impl ResourceConfig {
    /// QPS规则，只有阈值和窗口生效
    pub fn qps(threshold: f64, window_seconds: u64) -> Self {
        Self {
            rule_kind: RuleKind::Qps,
            window_seconds,
            critical_threshold: threshold,
            open_seconds: 0,
            min_samples: 0,
            max_probes: 0,
            probe_window_seconds: 0,
            recover_ratio: 0.0,
        }
    }

    /// 异常比例规则
    pub fn abnormal_ratio(
        ratio: f64,
        min_samples: u64,
        window_seconds: u64,
        open_seconds: u64,
    ) -> Self {
        Self {
            rule_kind: RuleKind::AbnormalRatio,
            window_seconds,
            critical_threshold: ratio,
            open_seconds,
            min_samples,
            max_probes: DEFAULT_MAX_PROBES,
            probe_window_seconds: window_seconds,
            recover_ratio: DEFAULT_RECOVER_RATIO,
        }
    }

    /// 连续错误规则（`min_samples` 固定为1）
    pub fn continuous_error(threshold: f64, window_seconds: u64, open_seconds: u64) -> Self {
        Self {
            rule_kind: RuleKind::ContinuousError,
            window_seconds,
            critical_threshold: threshold,
            open_seconds,
            min_samples: 1,
            max_probes: DEFAULT_MAX_PROBES,
            probe_window_seconds: window_seconds,
            recover_ratio: DEFAULT_RECOVER_RATIO,
        }
    }

    /// 设置最少请求数
    pub fn min_samples(mut self, min_samples: u64) -> Self {
        self.min_samples = min_samples;
        self
    }

    /// 设置探测请求数
    pub fn max_probes(mut self, max_probes: u64) -> Self {
        self.max_probes = max_probes;
        self
    }

    /// 设置探测窗口
    pub fn probe_window_seconds(mut self, seconds: u64) -> Self {
        self.probe_window_seconds = seconds;
        self
    }

    /// 设置恢复比例
    pub fn recover_ratio(mut self, ratio: f64) -> Self {
        self.recover_ratio = ratio;
        self
    }

    /// 关闭状态下的计数窗口
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    /// 熔断持续时间
    pub fn open_duration(&self) -> Duration {
        Duration::from_secs(self.open_seconds)
    }

    /// 探测窗口
    pub fn probe_window(&self) -> Duration {
        Duration::from_secs(self.probe_window_seconds)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), String> {
        if self.window_seconds == 0 {
            return Err("window_seconds 必须大于0".to_string());
        }

        for (name, seconds) in [
            ("window_seconds", self.window_seconds),
            ("open_seconds", self.open_seconds),
            ("probe_window_seconds", self.probe_window_seconds),
        ] {
            if seconds > MAX_TTL_SECONDS {
                return Err(format!(
                    "{} 超出上限: {} > {}",
                    name, seconds, MAX_TTL_SECONDS
                ));
            }
        }

        if !self.critical_threshold.is_finite() || self.critical_threshold < 0.0 {
            return Err(format!("无效的阈值: {}", self.critical_threshold));
        }

        if self.rule_kind == RuleKind::Qps {
            return Ok(());
        }

        if self.open_seconds == 0 {
            return Err("open_seconds 必须大于0".to_string());
        }

        if self.max_probes > 0 && self.probe_window_seconds == 0 {
            return Err("probe_window_seconds 必须大于0".to_string());
        }

        if !(0.0..=1.0).contains(&self.recover_ratio) {
            return Err(format!("恢复比例必须在0到1之间: {}", self.recover_ratio));
        }

        Ok(())
    }

    /// 转换为存储字段
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (FIELD_WINDOW_SECONDS, self.window_seconds.to_string()),
            (FIELD_RULE_KIND, self.rule_kind.code().to_string()),
            (FIELD_CRITICAL_THRESHOLD, self.critical_threshold.to_string()),
            (FIELD_OPEN_SECONDS, self.open_seconds.to_string()),
            (FIELD_MIN_SAMPLES, self.min_samples.to_string()),
            (FIELD_MAX_PROBES, self.max_probes.to_string()),
            (FIELD_PROBE_WINDOW_SECONDS, self.probe_window_seconds.to_string()),
            (FIELD_RECOVER_RATIO, self.recover_ratio.to_string()),
        ]
    }

    /// 从存储字段解析
    ///
    /// 字段不足八个视为未注册。
    pub fn from_fields(
        resource: &str,
        fields: &HashMap<String, String>,
    ) -> Result<Self, TripGateError> {
        if fields.len() < RESOURCE_CONFIG_FIELD_COUNT {
            return Err(TripGateError::ConfigMissing(resource.to_string()));
        }

        let rule_kind = RuleKind::try_from(parse_field::<i64>(resource, fields, FIELD_RULE_KIND)?)?;

        Ok(Self {
            rule_kind,
            window_seconds: parse_field(resource, fields, FIELD_WINDOW_SECONDS)?,
            critical_threshold: parse_field(resource, fields, FIELD_CRITICAL_THRESHOLD)?,
            open_seconds: parse_field(resource, fields, FIELD_OPEN_SECONDS)?,
            min_samples: parse_field(resource, fields, FIELD_MIN_SAMPLES)?,
            max_probes: parse_field(resource, fields, FIELD_MAX_PROBES)?,
            probe_window_seconds: parse_field(resource, fields, FIELD_PROBE_WINDOW_SECONDS)?,
            recover_ratio: parse_field(resource, fields, FIELD_RECOVER_RATIO)?,
        })
    }
}

fn parse_field<T: FromStr>(
    resource: &str,
    fields: &HashMap<String, String>,
    name: &str,
) -> Result<T, TripGateError> {
    let raw = fields
        .get(name)
        .ok_or_else(|| TripGateError::ConfigMissing(resource.to_string()))?;
    raw.parse().map_err(|_| {
        TripGateError::ConfigError(format!(
            "资源 {} 的字段 {} 无法解析: {}",
            resource, name, raw
        ))
    })
}

/// 分布式锁参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSettings {
    /// 锁TTL（毫秒）
    pub ttl_ms: u64,
    /// 最大尝试次数
    pub max_attempts: u32,
    /// 两次尝试之间的间隔（毫秒）
    pub retry_interval_ms: u64,
}

impl LockSettings {
    /// 准入锁默认参数
    pub fn admission() -> Self {
        Self {
            ttl_ms: DEFAULT_ADMISSION_LOCK_TTL_MS,
            max_attempts: DEFAULT_ADMISSION_LOCK_MAX_ATTEMPTS,
            retry_interval_ms: DEFAULT_LOCK_RETRY_INTERVAL_MS,
        }
    }

    /// 反馈锁默认参数
    pub fn feedback() -> Self {
        Self {
            ttl_ms: DEFAULT_FEEDBACK_LOCK_TTL_MS,
            max_attempts: DEFAULT_FEEDBACK_LOCK_MAX_ATTEMPTS,
            retry_interval_ms: DEFAULT_LOCK_RETRY_INTERVAL_MS,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// 校验锁参数
    pub fn validate(&self) -> Result<(), String> {
        if self.ttl_ms == 0 {
            return Err("锁TTL必须大于0".to_string());
        }
        if self.max_attempts == 0 {
            return Err("最大尝试次数必须大于0".to_string());
        }
        Ok(())
    }
}

/// 配置文件中的规则类型，名称或编码
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleKindValue {
    Code(i64),
    Name(String),
}

impl RuleKindValue {
    /// 解析为规则类型
    pub fn resolve(&self) -> Result<RuleKind, TripGateError> {
        match self {
            RuleKindValue::Code(code) => RuleKind::try_from(*code),
            RuleKindValue::Name(name) => name.parse(),
        }
    }
}

/// 配置文件中的资源规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRule {
    pub resource: String,
    pub kind: RuleKindValue,
    pub window_seconds: u64,
    pub critical_threshold: f64,
    #[serde(default)]
    pub open_seconds: u64,
    #[serde(default)]
    pub min_samples: u64,
    #[serde(default = "default_max_probes")]
    pub max_probes: u64,
    #[serde(default)]
    pub probe_window_seconds: Option<u64>,
    #[serde(default = "default_recover_ratio")]
    pub recover_ratio: f64,
}

fn default_max_probes() -> u64 {
    DEFAULT_MAX_PROBES
}

fn default_recover_ratio() -> f64 {
    DEFAULT_RECOVER_RATIO
}

impl ResourceRule {
    /// 转换为资源配置
    pub fn to_config(&self) -> Result<ResourceConfig, TripGateError> {
        let config = match self.kind.resolve()? {
            RuleKind::Qps => ResourceConfig::qps(self.critical_threshold, self.window_seconds),
            RuleKind::AbnormalRatio => ResourceConfig::abnormal_ratio(
                self.critical_threshold,
                self.min_samples,
                self.window_seconds,
                self.open_seconds,
            ),
            RuleKind::ContinuousError => ResourceConfig::continuous_error(
                self.critical_threshold,
                self.window_seconds,
                self.open_seconds,
            ),
        };

        if config.rule_kind == RuleKind::Qps {
            return Ok(config);
        }

        Ok(config
            .max_probes(self.max_probes)
            .probe_window_seconds(self.probe_window_seconds.unwrap_or(self.window_seconds))
            .recover_ratio(self.recover_ratio))
    }
}

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// 键命名空间
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// 准入锁参数
    #[serde(default = "LockSettings::admission")]
    pub admission_lock: LockSettings,
    /// 反馈锁参数
    #[serde(default = "LockSettings::feedback")]
    pub feedback_lock: LockSettings,
    /// 启动时注册的资源
    #[serde(default)]
    pub resources: Vec<ResourceRule>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            admission_lock: LockSettings::admission(),
            feedback_lock: LockSettings::feedback(),
            resources: Vec::new(),
        }
    }
}

impl GovernorConfig {
    /// 创建指定命名空间的配置
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// 从YAML解析
    pub fn from_yaml_str(yaml: &str) -> Result<Self, TripGateError> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| TripGateError::ConfigError(format!("YAML解析失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 从TOML解析
    pub fn from_toml_str(toml: &str) -> Result<Self, TripGateError> {
        let config: Self = toml::from_str(toml)
            .map_err(|e| TripGateError::ConfigError(format!("TOML解析失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载，按扩展名选择格式
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TripGateError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TripGateError::ConfigError(format!("读取配置文件失败 {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            _ => Err(TripGateError::ConfigError(format!(
                "不支持的配置文件格式: {}",
                path.display()
            ))),
        }
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), TripGateError> {
        KeySchema::new(self.namespace.as_str())?;

        self.admission_lock
            .validate()
            .map_err(|e| TripGateError::ConfigError(format!("准入锁: {}", e)))?;
        self.feedback_lock
            .validate()
            .map_err(|e| TripGateError::ConfigError(format!("反馈锁: {}", e)))?;

        let mut names = HashSet::new();
        for (index, rule) in self.resources.iter().enumerate() {
            validate_resource_id(&rule.resource)?;
            if !names.insert(rule.resource.as_str()) {
                return Err(TripGateError::ConfigError(format!(
                    "资源重复: {}",
                    rule.resource
                )));
            }
            rule.to_config()?.validate().map_err(|e| {
                TripGateError::ConfigError(format!("资源[{}] {}: {}", index, rule.resource, e))
            })?;
        }

        Ok(())
    }
}
