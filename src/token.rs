//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 准入结果与准入令牌

use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::config::RuleKind;

/// 业务执行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl From<bool> for Outcome {
    fn from(ok: bool) -> Self {
        if ok {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

/// 关联ID生成器
pub trait CorrelationIdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// 默认关联ID：纳秒时间戳加UUID
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCorrelationIdGenerator;

impl CorrelationIdGenerator for DefaultCorrelationIdGenerator {
    fn generate(&self) -> String {
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        format!("{}-{}", nanos, Uuid::new_v4())
    }
}

/// 准入令牌
///
/// 只发给被放行的非QPS请求，反馈一次后失效。
#[derive(Debug)]
pub struct AdmissionToken {
    resource: String,
    rule_kind: RuleKind,
    correlation_id: String,
    consumed: AtomicBool,
}

impl AdmissionToken {
    pub(crate) fn new(
        resource: impl Into<String>,
        rule_kind: RuleKind,
        correlation_id: String,
    ) -> Self {
        Self {
            resource: resource.into(),
            rule_kind,
            correlation_id,
            consumed: AtomicBool::new(false),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn rule_kind(&self) -> RuleKind {
        self.rule_kind
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// 是否已反馈
    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::Acquire)
    }

    /// 标记为已反馈，返回之前是否已被标记
    pub(crate) fn consume(&self) -> bool {
        self.consumed.swap(true, Ordering::AcqRel)
    }
}

/// 准入结果
#[derive(Debug)]
pub struct Admission {
    /// 是否放行
    pub allowed: bool,
    /// 资源的规则类型
    pub rule_kind: RuleKind,
    /// 本次调用的关联ID
    pub correlation_id: String,
    /// 放行的非QPS请求携带令牌
    pub token: Option<AdmissionToken>,
}

impl Admission {
    pub(crate) fn rejected(rule_kind: RuleKind, correlation_id: String) -> Self {
        Self {
            allowed: false,
            rule_kind,
            correlation_id,
            token: None,
        }
    }

    pub(crate) fn allowed(rule_kind: RuleKind, correlation_id: String) -> Self {
        Self {
            allowed: true,
            rule_kind,
            correlation_id,
            token: None,
        }
    }

    pub(crate) fn allowed_with_token(
        resource: &str,
        rule_kind: RuleKind,
        correlation_id: String,
    ) -> Self {
        let token = AdmissionToken::new(resource, rule_kind, correlation_id.clone());
        Self {
            allowed: true,
            rule_kind,
            correlation_id,
            token: Some(token),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// 取出令牌
    pub fn into_token(self) -> Option<AdmissionToken> {
        self.token
    }
}
