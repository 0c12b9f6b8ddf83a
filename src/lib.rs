//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! TripGate - Distributed Admission Control and Circuit Breaking
//!
//! Many independent processes share rate-limiting and circuit-breaking
//! decisions for named resources through one shared key-value store.
//!
//! # API Layers
//!
//! ## Prelude (Quick Start)
//!
//! Use `use tripgate::prelude::*;` to import all commonly used types.
//!
//! ## Core API
//!
//! - [`Governor`] - Main entry point: register, admit, resolve, inspect
//! - [`ResourceConfig`] - Per-resource rule parameters
//! - [`GovernorConfig`] - Engine configuration (YAML / TOML)
//! - [`TripGateError`] - Error types
//!
//! ## Storage
//!
//! - [`MemoryStorage`] - In-process store (default, single process and tests)
//! - `RedisStorage` - Shared Redis store (requires `redis` feature)
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use tripgate::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), TripGateError> {
//!     let governor = Governor::new(GovernorConfig::default(), Arc::new(MemoryStorage::new()))?;
//!     governor
//!         .register("payment", &ResourceConfig::continuous_error(3.0, 10, 30))
//!         .await?;
//!
//!     let admission = governor.admit("payment").await?;
//!     if let Some(token) = admission.token {
//!         // 执行业务逻辑...
//!         governor.resolve(&token, Outcome::Success).await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - **Rule kinds**: QPS window cap, abnormal ratio, continuous errors
//! - **Half-open probing**: Bounded probe admissions with a recover ratio
//! - **Distributed locks**: Admission and feedback locks with owner-checked release
//! - **Monitoring**: Prometheus counters (`monitoring`) and tracing setup (`telemetry`)

pub mod prelude;

pub mod admission;
pub mod config;
pub mod constants;
pub mod error;
pub mod feedback;
pub mod governor;
pub mod keys;
pub mod lock;
#[cfg(feature = "redis")]
pub mod lua_scripts;
#[cfg(feature = "redis")]
pub mod redis_storage;
pub mod registry;
pub mod state;
pub mod storage;
pub mod telemetry;
pub mod token;

// 重新导出常用类型
pub use config::{GovernorConfig, LockSettings, ResourceConfig, ResourceRule, RuleKind};
pub use error::{CircuitState, StorageError, TripGateError};
pub use governor::{CircuitSnapshot, Governor};
pub use keys::KeySchema;
#[cfg(feature = "redis")]
pub use redis_storage::{RedisConfig, RedisStorage};
pub use storage::{LockAttempt, MemoryStorage, Storage};
pub use token::{
    Admission, AdmissionToken, CorrelationIdGenerator, DefaultCorrelationIdGenerator, Outcome,
};
