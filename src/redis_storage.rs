//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Redis客户端封装
//!
//! 实现基于Redis的共享存储，多个进程通过同一个Redis实例同步准入与熔断状态。
//!
//! # 特性
//!
//! - **连接管理**: 使用ConnectionManager自动重连
//! - **超时控制**: 连接和读写均有超时，超时返回 [`StorageError::TimeoutError`]
//! - **Lua脚本**: 预加载脚本，多步操作原子执行
//! - **可选重试**: 默认不重试，存储故障原样返回给调用方
//!

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, IntoConnectionInfo};
use secrecy::{ExposeSecret, Secret};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::error::StorageError;
use crate::lua_scripts::{LuaScriptManager, LuaScriptType};
use crate::storage::{LockAttempt, Storage};

/// Redis配置
#[derive(Clone)]
pub struct RedisConfig {
    /// Redis连接URL
    pub url: String,
    /// 数据库索引
    pub db: i64,
    /// 密码（使用 Secret 包装以防止意外泄露）
    pub password: Option<Secret<String>>,
    /// 连接超时
    pub connection_timeout: Duration,
    /// 读写超时
    pub io_timeout: Duration,
    /// 最大重试次数
    pub max_retries: u32,
    /// 重试初始退避时间
    pub retry_initial_backoff: Duration,
}

impl std::fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConfig")
            .field("url", &self.url)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connection_timeout", &self.connection_timeout)
            .field("io_timeout", &self.io_timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_initial_backoff", &self.retry_initial_backoff)
            .finish()
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            db: 0,
            password: None,
            connection_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_millis(500),
            max_retries: 0,
            retry_initial_backoff: Duration::from_millis(10),
        }
    }
}

impl RedisConfig {
    /// 创建新的Redis配置
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// 设置数据库索引
    pub fn db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// 设置密码
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Secret::new(password.into()));
        self
    }

    /// 设置密码（使用 Secret）
    pub fn password_secret(mut self, password: Secret<String>) -> Self {
        self.password = Some(password);
        self
    }

    /// 设置连接超时
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// 设置IO超时
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// 设置最大重试次数
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// 设置重试初始退避时间
    pub fn retry_initial_backoff(mut self, backoff: Duration) -> Self {
        self.retry_initial_backoff = backoff;
        self
    }
}

/// 重试统计
#[derive(Debug, Default, Clone)]
pub struct RetryStats {
    /// 总重试次数
    pub total_retries: Arc<AtomicU64>,
    /// 成功重试次数
    pub successful_retries: Arc<AtomicU64>,
    /// 失败重试次数
    pub failed_retries: Arc<AtomicU64>,
}

impl RetryStats {
    /// 获取总重试次数
    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    /// 获取成功重试次数
    pub fn successful_retries(&self) -> u64 {
        self.successful_retries.load(Ordering::Relaxed)
    }

    /// 获取失败重试次数
    pub fn failed_retries(&self) -> u64 {
        self.failed_retries.load(Ordering::Relaxed)
    }

    /// 记录重试成功
    pub fn record_success(&self) {
        self.total_retries.fetch_add(1, Ordering::Relaxed);
        self.successful_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录重试失败
    pub fn record_failure(&self) {
        self.total_retries.fetch_add(1, Ordering::Relaxed);
        self.failed_retries.fetch_add(1, Ordering::Relaxed);
    }
}

/// Redis存储实现
#[derive(Clone)]
pub struct RedisStorage {
    /// 连接管理器
    conn_manager: Arc<Mutex<Option<ConnectionManager>>>,
    /// 配置
    config: RedisConfig,
    /// Lua脚本管理器
    lua_manager: Arc<LuaScriptManager>,
    /// 重试统计
    retry_stats: RetryStats,
}

impl RedisStorage {
    /// 创建新的Redis存储
    pub async fn new(config: RedisConfig) -> Result<Self, StorageError> {
        info!("创建Redis存储, URL: {}", config.url);

        let storage = Self {
            conn_manager: Arc::new(Mutex::new(None)),
            config,
            lua_manager: Arc::new(LuaScriptManager::new()),
            retry_stats: RetryStats::default(),
        };

        // 初始化连接
        storage.connect().await?;

        // 预加载Lua脚本
        let mut conn = storage.connection().await?;
        storage.lua_manager.preload_all_scripts(&mut conn).await?;

        info!("Redis存储创建成功");
        Ok(storage)
    }

    /// 检查Redis连接
    pub async fn ping(&self) -> Result<(), StorageError> {
        self.run("PING", |mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    /// 获取重试统计
    pub fn retry_stats(&self) -> &RetryStats {
        &self.retry_stats
    }

    /// 获取Lua脚本管理器
    pub fn lua_manager(&self) -> &Arc<LuaScriptManager> {
        &self.lua_manager
    }

    /// 建立连接
    async fn connect(&self) -> Result<(), StorageError> {
        debug!("建立Redis连接");

        let mut client_info = self.config.url.as_str().into_connection_info().map_err(|e| {
            error!("解析Redis地址失败: {}", e);
            StorageError::ConnectionError(format!("解析Redis地址失败: {}", e))
        })?;
        client_info.redis.db = self.config.db;
        if let Some(password) = &self.config.password {
            client_info.redis.password = Some(password.expose_secret().clone());
        }

        let client = Client::open(client_info).map_err(|e| {
            error!("创建Redis客户端失败: {}", e);
            StorageError::ConnectionError(format!("创建Redis客户端失败: {}", e))
        })?;

        let conn_manager =
            tokio::time::timeout(self.config.connection_timeout, ConnectionManager::new(client))
                .await
                .map_err(|_| StorageError::TimeoutError("建立Redis连接超时".to_string()))?
                .map_err(|e| {
                    error!("创建Redis连接管理器失败: {}", e);
                    StorageError::ConnectionError(format!("创建Redis连接管理器失败: {}", e))
                })?;

        *self.conn_manager.lock().await = Some(conn_manager);

        info!("Redis连接建立成功");
        Ok(())
    }

    /// 获取连接
    async fn connection(&self) -> Result<ConnectionManager, StorageError> {
        self.conn_manager
            .lock()
            .await
            .as_ref()
            .cloned()
            .ok_or_else(|| StorageError::ConnectionError("连接未初始化".to_string()))
    }

    /// 带重试的执行
    async fn execute_with_retry<F, Fut, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut last_error = None;
        let mut backoff = self.config.retry_initial_backoff;

        for attempt in 0..=self.config.max_retries {
            match f().await {
                Ok(result) => {
                    if attempt > 0 {
                        self.retry_stats.record_success();
                        debug!("重试成功，尝试次数: {}", attempt);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    last_error = Some(e.clone());

                    if attempt < self.config.max_retries {
                        warn!(
                            "操作失败，将在 {:?} 后重试 (尝试 {}/{}): {}",
                            backoff,
                            attempt + 1,
                            self.config.max_retries,
                            e
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.mul_f32(2.0); // 指数退避
                    }
                }
            }
        }

        if self.config.max_retries > 0 {
            self.retry_stats.record_failure();
        }
        error!("Redis操作失败: {:?}", last_error);

        Err(last_error.unwrap_or_else(|| StorageError::TimeoutError("操作超时".to_string())))
    }

    /// 在一条连接上执行命令，附带读写超时
    async fn run<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, StorageError>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        self.execute_with_retry(|| async {
            let conn = self.connection().await?;
            match tokio::time::timeout(self.config.io_timeout, f(conn)).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::TimeoutError(format!("{}超时", op))),
            }
        })
        .await
    }

    /// 执行预加载的脚本
    async fn script<T>(
        &self,
        script_type: LuaScriptType,
        keys: &[&str],
        args: &[String],
    ) -> Result<T, StorageError>
    where
        T: redis::FromRedisValue,
    {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let lua_manager = &self.lua_manager;
        let args = &args;
        self.run(script_type.name(), |mut conn| async move {
            lua_manager
                .execute_script(&mut conn, script_type, keys, args)
                .await
        })
        .await
    }
}

fn flatten_fields(fields: &[(&str, String)]) -> Vec<String> {
    fields
        .iter()
        .flat_map(|(field, value)| [field.to_string(), value.clone()])
        .collect()
}

#[async_trait]
impl Storage for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let result = self
            .run("GET", |mut conn| async move {
                let value: Option<String> = conn.get(key).await?;
                Ok(value)
            })
            .await?;
        trace!("GET key={}, result={:?}", key, result);
        Ok(result)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        self.run("SET", |mut conn| async move {
            match ttl {
                Some(ttl) => {
                    redis::cmd("SET")
                        .arg(key)
                        .arg(value)
                        .arg("PX")
                        .arg(ttl.as_millis() as u64)
                        .query_async::<_, ()>(&mut conn)
                        .await?
                }
                None => conn.set::<_, _, ()>(key, value).await?,
            }
            Ok(())
        })
        .await?;
        trace!("SET key={}, ttl={:?}", key, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.run("DEL", |mut conn| async move {
            conn.del::<_, ()>(key).await?;
            Ok(())
        })
        .await?;
        trace!("DEL key={}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.run("EXISTS", |mut conn| async move {
            let exists: bool = conn.exists(key).await?;
            Ok(exists)
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StorageError> {
        let millis: i64 = self
            .run("PTTL", |mut conn| async move {
                let millis: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
                Ok(millis)
            })
            .await?;
        // -2 键不存在, -1 未设置过期
        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StorageError> {
        self.run("HGETALL", |mut conn| async move {
            let hash: HashMap<String, String> = conn.hgetall(key).await?;
            Ok(hash)
        })
        .await
    }

    async fn hset_all(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let ttl_ms = ttl.map(|ttl| ttl.as_millis().max(1) as u64).unwrap_or(0);
        let mut args = vec![ttl_ms.to_string()];
        args.extend(flatten_fields(fields));
        let _: i64 = self
            .script(LuaScriptType::HashReplace, &[key], &args)
            .await?;
        trace!("HSETALL key={}, fields={}, ttl={:?}", key, fields.len(), ttl);
        Ok(())
    }

    async fn hset_if_exists(
        &self,
        key: &str,
        fields: &[(&str, String)],
    ) -> Result<bool, StorageError> {
        if fields.is_empty() {
            return self.exists(key).await;
        }
        let written: i64 = self
            .script(
                LuaScriptType::HashSetIfExists,
                &[key],
                &flatten_fields(fields),
            )
            .await?;
        Ok(written == 1)
    }

    async fn hincr_by(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<Option<i64>, StorageError> {
        self.script(
            LuaScriptType::HashIncrIfExists,
            &[key],
            &[field.to_string(), delta.to_string()],
        )
        .await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StorageError> {
        self.run("SADD", |mut conn| async move {
            let added: i64 = conn.sadd(key, member).await?;
            Ok(added > 0)
        })
        .await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StorageError> {
        self.run("SREM", |mut conn| async move {
            let removed: i64 = conn.srem(key, member).await?;
            Ok(removed > 0)
        })
        .await
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StorageError> {
        self.run("SISMEMBER", |mut conn| async move {
            let member: bool = conn.sismember(key, member).await?;
            Ok(member)
        })
        .await
    }

    async fn smismember(&self, key: &str, members: &[&str]) -> Result<Vec<bool>, StorageError> {
        if members.is_empty() {
            return Ok(Vec::new());
        }
        let args: Vec<String> = members.iter().map(|m| m.to_string()).collect();
        let flags: Vec<i64> = self
            .script(LuaScriptType::SetMembership, &[key], &args)
            .await?;
        if flags.len() != members.len() {
            return Err(StorageError::QueryError(format!(
                "成员检查结果数量不一致: 期望 {}, 实际 {}",
                members.len(),
                flags.len()
            )));
        }
        Ok(flags.into_iter().map(|flag| flag == 1).collect())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StorageError> {
        self.run("SET NX", |mut conn| async move {
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("PX")
                .arg(ttl.as_millis().max(1) as u64)
                .query_async(&mut conn)
                .await?;
            Ok(reply.is_some())
        })
        .await
    }

    async fn set_nx_unless(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        blocker: &str,
    ) -> Result<LockAttempt, StorageError> {
        let code: i64 = self
            .script(
                LuaScriptType::AcquireLock,
                &[key, blocker],
                &[value.to_string(), (ttl.as_millis().max(1) as u64).to_string()],
            )
            .await?;
        Ok(match code {
            1 => LockAttempt::Acquired,
            -1 => LockAttempt::Deferred,
            _ => LockAttempt::Busy,
        })
    }

    async fn compare_and_delete(&self, key: &str, value: &str) -> Result<bool, StorageError> {
        let deleted: i64 = self
            .script(LuaScriptType::ReleaseLock, &[key], &[value.to_string()])
            .await?;
        Ok(deleted == 1)
    }
}
