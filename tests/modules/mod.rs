//! 测试模块根目录
//!
//! 按功能划分的集成测试

pub mod abnormal_ratio;
pub mod concurrency;
pub mod feedback;
pub mod locks;
pub mod store_failures;
