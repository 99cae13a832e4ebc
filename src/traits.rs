//! Abstractions for time and side effects to enable testing.
//!
//! This module provides traits for:
//! - `Clock`: Abstracting time access for deterministic artifact versions
//! - `RequestLogger`: Abstracting the per-request log of the prediction service

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::service::ModelInput;

// ==================== Clock Trait ====================

/// Trait for abstracting time access.
///
/// Artifact versions are derived from the current time, so tests inject a
/// `MockClock` to get reproducible directory names.
pub trait Clock: Send + Sync {
    /// Get the current time in UTC.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// System clock implementation using real time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a fixed instant that only moves when advanced.
///
/// Clones share the same instant, so a test can hand one clone to a
/// `Runner` and advance another to produce a new artifact version.
#[derive(Debug, Clone)]
pub struct MockClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(time)),
        }
    }

    /// Move the clock forward by `duration`.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = lock(&self.now);
        *now = *now + duration;
    }
}

impl Clock for MockClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

// ==================== RequestLogger Trait ====================

/// Trait for recording prediction requests before they reach the model.
pub trait RequestLogger: Send + Sync {
    /// Record a single input row received at `received_at`.
    fn log(&self, received_at: DateTime<Utc>, input: &ModelInput);
}

/// Logger that emits one `tracing` event per input row.
#[derive(Debug, Clone, Default)]
pub struct TracingRequestLogger;

impl RequestLogger for TracingRequestLogger {
    fn log(&self, received_at: DateTime<Utc>, input: &ModelInput) {
        let raw = serde_json::to_string(input).unwrap_or_else(|e| format!("<unserializable: {e}>"));
        tracing::info!(datetime = %received_at.to_rfc3339(), input = %raw, "prediction request");
    }
}

/// Mock logger for testing that records every logged row.
#[derive(Debug, Clone, Default)]
pub struct MockRequestLogger {
    records: Arc<Mutex<Vec<(DateTime<Utc>, ModelInput)>>>,
}

impl MockRequestLogger {
    /// Create a new mock logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all rows that have been logged.
    pub fn records(&self) -> Vec<(DateTime<Utc>, ModelInput)> {
        lock(&self.records).clone()
    }

    /// Get the count of rows logged.
    pub fn record_count(&self) -> usize {
        lock(&self.records).len()
    }

    /// Clear all recorded rows.
    pub fn clear(&self) {
        lock(&self.records).clear();
    }
}

impl RequestLogger for MockRequestLogger {
    fn log(&self, received_at: DateTime<Utc>, input: &ModelInput) {
        lock(&self.records).push((received_at, input.clone()));
    }
}

/// Lock a mock's state, recovering it if a panicking test poisoned the mutex.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
