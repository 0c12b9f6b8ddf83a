//! 存储后端集成测试
//!
//! 需要外部服务，默认忽略

#[cfg(feature = "redis")]
mod redis_test;
