//! Shared tracing configuration for fixture instrumentation.
//!
//! Centralises the log target used by the crate so subscribers can filter
//! fixture events without pulling in unrelated application logs.

/// Target used by fixture spans and logs.
pub(crate) const LOG_TARGET: &str = "pg_test_fixtures::observability";

/// Prefix for warnings that test harnesses may convert into soft skips.
pub const SKIP_PREFIX: &str = "SKIP-TEST-FIXTURE";
