//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Lua脚本管理器
//!
//! 提供Redis Lua脚本的预加载、SHA缓存和版本管理功能。
//!
//! # 特性
//!
//! - **脚本预加载**: 避免重复传输脚本
//! - **SHA缓存**: 缓存脚本SHA避免重复计算
//! - **原子性操作**: 加锁避让、比较删除、整条记录写入等多步操作在服务端一次完成

use redis::Script;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, trace};

use crate::error::StorageError;

/// Lua脚本类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LuaScriptType {
    /// 带避让的加锁
    AcquireLock,
    /// 比较后释放锁
    ReleaseLock,
    /// 整条Hash记录替换
    HashReplace,
    /// 键存在时写入Hash字段
    HashSetIfExists,
    /// 键存在时自增Hash字段
    HashIncrIfExists,
    /// 批量集合成员检查
    SetMembership,
}

impl LuaScriptType {
    /// 获取脚本名称
    pub fn name(&self) -> &'static str {
        match self {
            LuaScriptType::AcquireLock => "acquire_lock",
            LuaScriptType::ReleaseLock => "release_lock",
            LuaScriptType::HashReplace => "hash_replace",
            LuaScriptType::HashSetIfExists => "hash_set_if_exists",
            LuaScriptType::HashIncrIfExists => "hash_incr_if_exists",
            LuaScriptType::SetMembership => "set_membership",
        }
    }

    /// 全部脚本类型
    pub fn all() -> [LuaScriptType; 6] {
        [
            LuaScriptType::AcquireLock,
            LuaScriptType::ReleaseLock,
            LuaScriptType::HashReplace,
            LuaScriptType::HashSetIfExists,
            LuaScriptType::HashIncrIfExists,
            LuaScriptType::SetMembership,
        ]
    }

    fn source(&self) -> &'static str {
        match self {
            LuaScriptType::AcquireLock => ACQUIRE_LOCK_SCRIPT,
            LuaScriptType::ReleaseLock => RELEASE_LOCK_SCRIPT,
            LuaScriptType::HashReplace => HASH_REPLACE_SCRIPT,
            LuaScriptType::HashSetIfExists => HASH_SET_IF_EXISTS_SCRIPT,
            LuaScriptType::HashIncrIfExists => HASH_INCR_IF_EXISTS_SCRIPT,
            LuaScriptType::SetMembership => SET_MEMBERSHIP_SCRIPT,
        }
    }
}

/// 带避让的加锁脚本
///
/// 参数: KEYS[1] - 锁键, KEYS[2] - 避让键（可选）, ARGV[1] - 持有者标识, ARGV[2] - TTL (ms)
/// 返回: 1 获取成功, 0 锁已被持有, -1 避让键存在
pub const ACQUIRE_LOCK_SCRIPT: &str = r#"
-- 避让键存在时本轮不尝试获取
if #KEYS > 1 and redis.call('EXISTS', KEYS[2]) == 1 then
    return -1
end

if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then
    return 1
end

return 0
"#;

/// 释放锁脚本
///
/// 只删除自己持有的锁，锁过期后被他人获取时不误删
/// 参数: KEYS[1] - 锁键, ARGV[1] - 持有者标识
/// 返回: 1 已删除, 0 未删除
pub const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end

return 0
"#;

/// 整条Hash记录替换脚本
///
/// 参数: KEYS[1] - key, ARGV[1] - TTL (ms, 0表示不过期), ARGV[2..] - field, value, ...
/// 返回: 1
pub const HASH_REPLACE_SCRIPT: &str = r#"
local key = KEYS[1]
local ttl = tonumber(ARGV[1])

redis.call('DEL', key)
if #ARGV > 1 then
    redis.call('HSET', key, unpack(ARGV, 2))
end

-- 记录与TTL同时写入，不会出现没有过期时间的记录
if ttl > 0 then
    redis.call('PEXPIRE', key, ttl)
end

return 1
"#;

/// 键存在时写入Hash字段脚本
///
/// 参数: KEYS[1] - key, ARGV - field, value, ...
/// 返回: 1 已写入, 0 键不存在
pub const HASH_SET_IF_EXISTS_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end

redis.call('HSET', KEYS[1], unpack(ARGV))
return 1
"#;

/// 键存在时自增Hash字段脚本
///
/// 直接HINCRBY会在键过期后重新创建一条没有TTL的记录
/// 参数: KEYS[1] - key, ARGV[1] - field, ARGV[2] - delta
/// 返回: 自增后的值，键不存在时返回nil
pub const HASH_INCR_IF_EXISTS_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return false
end

return redis.call('HINCRBY', KEYS[1], ARGV[1], ARGV[2])
"#;

/// 批量集合成员检查脚本
///
/// 参数: KEYS[1] - 集合键, ARGV - 待检查的成员
/// 返回: 与ARGV顺序一致的 1/0 数组
pub const SET_MEMBERSHIP_SCRIPT: &str = r#"
local result = {}
for i, member in ipairs(ARGV) do
    result[i] = redis.call('SISMEMBER', KEYS[1], member)
end
return result
"#;

/// Lua脚本信息
#[derive(Debug, Clone)]
pub struct LuaScriptInfo {
    /// 脚本类型
    pub script_type: LuaScriptType,
    /// 脚本内容
    pub script: &'static str,
    /// SHA哈希（计算后填充）
    pub sha: Arc<parking_lot::Mutex<Option<String>>>,
}

impl LuaScriptInfo {
    /// 创建新的脚本信息
    pub fn new(script_type: LuaScriptType, script: &'static str) -> Self {
        Self {
            script_type,
            script,
            sha: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// 获取脚本SHA，如果未计算则返回None
    pub fn get_sha(&self) -> Option<String> {
        self.sha.lock().clone()
    }

    /// 设置脚本SHA
    pub fn set_sha(&self, sha: String) {
        *self.sha.lock() = Some(sha);
    }
}

/// Lua脚本管理器
pub struct LuaScriptManager {
    /// 脚本映射
    scripts: HashMap<LuaScriptType, LuaScriptInfo>,
}

impl LuaScriptManager {
    /// 创建新的脚本管理器
    pub fn new() -> Self {
        let scripts = LuaScriptType::all()
            .into_iter()
            .map(|script_type| {
                (
                    script_type,
                    LuaScriptInfo::new(script_type, script_type.source()),
                )
            })
            .collect();

        Self { scripts }
    }

    /// 获取脚本信息
    pub fn get_script(&self, script_type: LuaScriptType) -> Option<&LuaScriptInfo> {
        self.scripts.get(&script_type)
    }

    /// 获取所有脚本
    pub fn get_all_scripts(&self) -> Vec<&LuaScriptInfo> {
        self.scripts.values().collect()
    }

    /// 预加载所有脚本到Redis
    pub async fn preload_all_scripts<C>(&self, conn: &mut C) -> Result<(), StorageError>
    where
        C: redis::aio::ConnectionLike,
    {
        info!("开始预加载Lua脚本到Redis");

        for script_info in self.get_all_scripts() {
            self.preload_script(conn, script_info).await?;
        }

        info!("Lua脚本预加载完成");
        Ok(())
    }

    /// 预加载单个脚本
    pub async fn preload_script<C>(
        &self,
        conn: &mut C,
        script_info: &LuaScriptInfo,
    ) -> Result<(), StorageError>
    where
        C: redis::aio::ConnectionLike,
    {
        // 计算SHA
        let script = Script::new(script_info.script);
        let sha = script.get_hash().to_string();

        // 缓存SHA
        script_info.set_sha(sha.clone());

        // 执行SCRIPT LOAD预加载
        let _: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(script_info.script)
            .query_async(conn)
            .await
            .map_err(|e| {
                error!("预加载脚本失败: {:?}, 错误: {}", script_info.script_type, e);
                StorageError::ConnectionError(format!("预加载脚本失败: {}", e))
            })?;

        debug!(
            "脚本预加载成功: {:?}, SHA: {}",
            script_info.script_type, sha
        );

        Ok(())
    }

    /// 执行脚本（使用SHA）
    pub async fn execute_script<C, T>(
        &self,
        conn: &mut C,
        script_type: LuaScriptType,
        keys: &[&str],
        args: &[&str],
    ) -> Result<T, StorageError>
    where
        C: redis::aio::ConnectionLike,
        T: redis::FromRedisValue,
    {
        let script_info = self
            .get_script(script_type)
            .ok_or_else(|| StorageError::QueryError(format!("未找到脚本: {:?}", script_type)))?;

        if script_info.get_sha().is_none() {
            self.preload_script(conn, script_info).await?;
        }
        let sha = script_info
            .get_sha()
            .ok_or_else(|| StorageError::QueryError("脚本SHA未初始化".to_string()))?;

        trace!("执行脚本: {:?}, SHA: {}", script_type, sha);

        // 尝试使用SHA执行
        match redis::cmd("EVALSHA")
            .arg(&sha)
            .arg(keys.len())
            .arg(keys)
            .arg(args)
            .query_async::<_, T>(conn)
            .await
        {
            Ok(result) => Ok(result),
            Err(e) if e.kind() == redis::ErrorKind::NoScriptError => {
                // 服务端脚本缓存被清空（重启或SCRIPT FLUSH），重新加载
                debug!("脚本SHA不存在，重新加载: {:?}", script_type);
                self.preload_script(conn, script_info).await?;

                redis::cmd("EVALSHA")
                    .arg(&sha)
                    .arg(keys.len())
                    .arg(keys)
                    .arg(args)
                    .query_async::<_, T>(conn)
                    .await
                    .map_err(|e| {
                        error!("脚本执行失败: {:?}, 错误: {}", script_type, e);
                        StorageError::from(e)
                    })
            }
            Err(e) => {
                error!("脚本执行失败: {:?}, 错误: {}", script_type, e);
                Err(StorageError::from(e))
            }
        }
    }
}

impl Default for LuaScriptManager {
    fn default() -> Self {
        Self::new()
    }
}
