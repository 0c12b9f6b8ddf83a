//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 分布式锁
//!
//! 每个资源两把锁：准入锁和反馈锁。
//! 准入锁的每次尝试都是一个原子原语：反馈锁被持有时让步，否则 SET NX PX。
//! 加锁失败时短暂休眠后重试，超过最大尝试次数返回 [`TripGateError::LockTimeout`]。
//! 释放时比较持有者标识，过期的持有者不会删掉后继者的锁。

use std::future::Future;
use std::sync::Arc;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::config::LockSettings;
use crate::error::TripGateError;
use crate::keys::ResourceKeys;
use crate::storage::{LockAttempt, Storage};
use crate::telemetry::{self, MetricEvent};

pub(crate) const ADMISSION_LOCK_NAME: &str = "准入锁";
pub(crate) const FEEDBACK_LOCK_NAME: &str = "反馈锁";

/// 锁管理器
#[derive(Clone)]
pub struct LockManager {
    storage: Arc<dyn Storage>,
    admission: LockSettings,
    feedback: LockSettings,
}

impl LockManager {
    pub fn new(storage: Arc<dyn Storage>, admission: LockSettings, feedback: LockSettings) -> Self {
        Self {
            storage,
            admission,
            feedback,
        }
    }

    /// 持有准入锁执行临界区
    pub async fn with_admission_lock<T, F, Fut>(
        &self,
        keys: &ResourceKeys,
        f: F,
    ) -> Result<T, TripGateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TripGateError>>,
    {
        let owner = self.acquire_admission(keys).await?;
        let result = f().await;
        self.release(&keys.admission_lock, &owner, ADMISSION_LOCK_NAME)
            .await;
        result
    }

    /// 持有反馈锁执行临界区
    pub async fn with_feedback_lock<T, F, Fut>(
        &self,
        keys: &ResourceKeys,
        f: F,
    ) -> Result<T, TripGateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TripGateError>>,
    {
        let owner = self.acquire_feedback(keys).await?;
        let result = f().await;
        self.release(&keys.feedback_lock, &owner, FEEDBACK_LOCK_NAME)
            .await;
        result
    }

    async fn acquire_admission(&self, keys: &ResourceKeys) -> Result<String, TripGateError> {
        let owner = Uuid::new_v4().to_string();
        let settings = &self.admission;

        for attempt in 1..=settings.max_attempts {
            let outcome = self
                .storage
                .set_nx_unless(
                    &keys.admission_lock,
                    &owner,
                    settings.ttl(),
                    &keys.feedback_lock,
                )
                .await?;

            match outcome {
                LockAttempt::Acquired => {
                    trace!("获取准入锁: resource={}, attempt={}", keys.resource, attempt);
                    return Ok(owner);
                }
                LockAttempt::Deferred => {
                    trace!("反馈锁持有中，准入让步: resource={}", keys.resource);
                }
                LockAttempt::Busy => {}
            }

            if attempt < settings.max_attempts {
                tokio::time::sleep(settings.retry_interval()).await;
            }
        }

        Err(self.timeout(keys, ADMISSION_LOCK_NAME, settings.max_attempts))
    }

    async fn acquire_feedback(&self, keys: &ResourceKeys) -> Result<String, TripGateError> {
        let owner = Uuid::new_v4().to_string();
        let settings = &self.feedback;

        for attempt in 1..=settings.max_attempts {
            if self
                .storage
                .set_nx(&keys.feedback_lock, &owner, settings.ttl())
                .await?
            {
                trace!("获取反馈锁: resource={}, attempt={}", keys.resource, attempt);
                return Ok(owner);
            }

            if attempt < settings.max_attempts {
                tokio::time::sleep(settings.retry_interval()).await;
            }
        }

        Err(self.timeout(keys, FEEDBACK_LOCK_NAME, settings.max_attempts))
    }

    fn timeout(&self, keys: &ResourceKeys, lock: &'static str, attempts: u32) -> TripGateError {
        warn!(
            "获取{}超时: resource={}, attempts={}",
            lock, keys.resource, attempts
        );
        telemetry::record(MetricEvent::LockTimeout);
        TripGateError::LockTimeout {
            resource: keys.resource.clone(),
            lock,
            attempts,
        }
    }

    async fn release(&self, key: &str, owner: &str, lock: &'static str) {
        match self.storage.compare_and_delete(key, owner).await {
            Ok(true) => trace!("释放{}: key={}", lock, key),
            Ok(false) => warn!("{}已过期或被他人持有，跳过释放: key={}", lock, key),
            // 释放失败不覆盖临界区结果，锁会在TTL后自动过期
            Err(e) => warn!("释放{}失败: key={}, error={}", lock, key, e),
        }
    }
}
