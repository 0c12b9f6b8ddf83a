//! Prelude module - Commonly used types for quick imports
//!
//! This module re-exports the most commonly used types from TripGate,
//! allowing users to import them with a single `use tripgate::prelude::*;`
//! statement instead of importing each type individually.

// Core types - always available
pub use crate::config::{GovernorConfig, ResourceConfig, RuleKind};
pub use crate::error::{CircuitState, TripGateError};
pub use crate::governor::{CircuitSnapshot, Governor};
pub use crate::token::{Admission, AdmissionToken, Outcome};

// Storage
pub use crate::storage::{MemoryStorage, Storage};

// Feature-gated exports
#[cfg(feature = "redis")]
pub use crate::redis_storage::{RedisConfig, RedisStorage};
