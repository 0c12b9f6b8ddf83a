//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Centralized configuration constants for TripGate.
//!
//! This module provides the lock tuning defaults and the field names of the
//! records kept in the shared store. All magic numbers are defined here with
//! their purpose and usage context.

// ============================================================================
// Admission Lock Constants
// ============================================================================

/// Default TTL of the admission lock (100 milliseconds).
///
/// A crashed holder blocks admissions for the resource for at most this long.
pub const DEFAULT_ADMISSION_LOCK_TTL_MS: u64 = 100;

/// Maximum acquisition attempts for the admission lock.
///
/// Attempts that defer to an in-flight feedback lock count as well.
pub const DEFAULT_ADMISSION_LOCK_MAX_ATTEMPTS: u32 = 100;

// ============================================================================
// Feedback Lock Constants
// ============================================================================

/// Default TTL of the feedback lock (500 milliseconds).
pub const DEFAULT_FEEDBACK_LOCK_TTL_MS: u64 = 500;

/// Maximum acquisition attempts for the feedback lock.
pub const DEFAULT_FEEDBACK_LOCK_MAX_ATTEMPTS: u32 = 30;

/// Sleep between two lock acquisition attempts (1 millisecond).
pub const DEFAULT_LOCK_RETRY_INTERVAL_MS: u64 = 1;

// ============================================================================
// Key Schema Constants
// ============================================================================

/// Default namespace prepended to every store key.
pub const DEFAULT_NAMESPACE: &str = "tripgate";

/// Upper bound for every window, open and probe-window duration (ten years).
///
/// Keeps expiry arithmetic and Redis `PEXPIRE` arguments in range.
pub const MAX_TTL_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// Maximum length of a resource identifier or namespace.
pub const MAX_KEY_COMPONENT_LENGTH: usize = 255;

// ============================================================================
// Resource Configuration Fields
// ============================================================================

/// Counter TTL while closed, in seconds.
pub const FIELD_WINDOW_SECONDS: &str = "window_seconds";
/// Rule kind code (1 = QPS, 2 = abnormal ratio, 3 = continuous error).
pub const FIELD_RULE_KIND: &str = "rule_kind";
/// Trip threshold.
pub const FIELD_CRITICAL_THRESHOLD: &str = "critical_threshold";
/// Counter TTL while open, in seconds.
pub const FIELD_OPEN_SECONDS: &str = "open_seconds";
/// Requests required before ratio/continuous evaluation activates.
pub const FIELD_MIN_SAMPLES: &str = "min_samples";
/// Admissions allowed per half-open window.
pub const FIELD_MAX_PROBES: &str = "max_probes";
/// Probe record TTL, in seconds.
pub const FIELD_PROBE_WINDOW_SECONDS: &str = "probe_window_seconds";
/// Fraction of probe outcomes needed to close.
pub const FIELD_RECOVER_RATIO: &str = "recover_ratio";

/// Number of fields a complete resource configuration record carries.
///
/// A record with fewer fields is reported as missing.
pub const RESOURCE_CONFIG_FIELD_COUNT: usize = 8;

// ============================================================================
// Counter / Probe Record Fields
// ============================================================================

/// Requests since window start.
pub const FIELD_TOTAL: &str = "total";
/// Failures since window start.
pub const FIELD_ERRORS: &str = "errors";
/// Explicit counter phase (`closed` or `open`).
pub const FIELD_STATE: &str = "state";

/// Admitted probe requests in the current half-open window.
pub const FIELD_PROBES: &str = "probes";
/// Failed probe outcomes in the current half-open window.
pub const FIELD_PROBE_ERRORS: &str = "probe_errors";
/// Successful probe outcomes in the current half-open window.
pub const FIELD_PROBE_CORRECT: &str = "probe_correct";

// ============================================================================
// Half-Open Probing Defaults
// ============================================================================

/// Default number of probe admissions per half-open window.
pub const DEFAULT_MAX_PROBES: u64 = 10;

/// Default fraction of probe outcomes that must succeed to close the circuit.
pub const DEFAULT_RECOVER_RATIO: f64 = 0.6;
