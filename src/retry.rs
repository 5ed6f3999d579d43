//! Transient-error retry with exponential backoff and jitter, using the same
//! `tracing` idiom for event hooks as the rest of the crate.

use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::error::{EngineError, Result, ValidationError};

/// Exponential backoff schedule with jitter, applied between retry attempts
/// of a transient failure.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(5000),
            backoff_multiplier: 2.0,
            enabled: true,
        }
    }
}

impl RetryPolicy {
    /// Construct a policy, validating that delays are non-negative
    /// (guaranteed by `Duration`'s type) and `backoff_multiplier >= 1.0`
    /// (otherwise the schedule would shrink instead of back off).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if `backoff_multiplier < 1.0` or
    /// `max_attempts == 0`.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> std::result::Result<Self, ValidationError> {
        if max_attempts == 0 {
            return Err(ValidationError {
                field: "max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if backoff_multiplier < 1.0 {
            return Err(ValidationError {
                field: "backoff_multiplier".to_string(),
                message: "must be >= 1.0".to_string(),
            });
        }
        Ok(Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier,
            enabled: true,
        })
    }

    /// Upper bound on the cumulative sleep time across every attempt,
    /// ignoring jitter; combined with the busy-timeout in
    /// [`crate::config::EngineConfig::effective_max_wait`].
    #[must_use]
    pub fn worst_case_total_delay(&self) -> Duration {
        if !self.enabled || self.max_attempts <= 1 {
            return Duration::ZERO;
        }
        let mut total = Duration::ZERO;
        let mut current = self.initial_delay;
        for _ in 1..self.max_attempts {
            total += current.min(self.max_delay);
            current = Duration::from_secs_f64(current.as_secs_f64() * self.backoff_multiplier);
        }
        total
    }

    /// Delay before the attempt following `attempt` (1-indexed): the
    /// deterministic exponential ceiling `initial_delay * multiplier^(attempt
    /// - 1)`, capped at `max_delay`, plus a uniform `0..=100ms` jitter term.
    fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent as i32);
        let capped = scaled.min(self.max_delay.as_secs_f64()).max(0.0);
        let base = Duration::from_secs_f64(capped);
        let jitter_ms = rand::rng().random_range(0..=100);
        base + Duration::from_millis(jitter_ms)
    }
}

/// Classifies whether a failure is worth retrying. The default
/// implementation recognizes SQLite's busy/locked/io-error family; callers
/// with domain-specific transient conditions can provide their own.
pub trait TransientClassifier: Send + Sync {
    fn is_transient(&self, error: &EngineError) -> bool;
}

/// Default classifier covering SQLite result codes
/// `BUSY`/`LOCKED`/`IOERR*`/`CANTOPEN`/`PROTOCOL`, OS-level sharing/lock/
/// timeout/reset `io::Error` kinds, and a message-substring fallback for
/// anything already downcast to plain text (e.g. an error that crossed an
/// FFI boundary without preserving its structured code).
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteTransientClassifier;

const TRANSIENT_MESSAGE_SUBSTRINGS: &[&str] = &[
    "database is locked",
    "database table is locked",
    "disk i/o error",
    "unable to open database file",
    "sharing violation",
    "lock violation",
    "network name",
    "connection reset",
    "semaphore timeout",
];

impl TransientClassifier for SqliteTransientClassifier {
    fn is_transient(&self, error: &EngineError) -> bool {
        match error {
            EngineError::Cancelled => false,
            EngineError::Sqlite(rusqlite::Error::SqliteFailure(inner, message)) => {
                matches!(
                    inner.code,
                    rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                        | rusqlite::ErrorCode::CannotOpen
                        | rusqlite::ErrorCode::SystemIoFailure
                        | rusqlite::ErrorCode::OperationInterrupted
                        | rusqlite::ErrorCode::FileLockingProtocolFailed
                ) || message
                    .as_deref()
                    .is_some_and(|m| Self::message_looks_transient(m))
            }
            EngineError::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
            ),
            EngineError::Timeout(_) | EngineError::TransientStorageError(_) => true,
            other => Self::message_looks_transient(&other.to_string()),
        }
    }
}

impl SqliteTransientClassifier {
    fn message_looks_transient(message: &str) -> bool {
        let lower = message.to_ascii_lowercase();
        TRANSIENT_MESSAGE_SUBSTRINGS.iter().any(|needle| lower.contains(needle))
    }
}

/// Observability hook invoked around each retry attempt, emitting `tracing`
/// events around the mutation path.
pub trait RetryEvents: Send + Sync {
    fn on_transient(&self, attempt: u32, error: &EngineError) {
        let _ = (attempt, error);
    }
    fn on_retry(&self, attempt: u32, delay: Duration) {
        let _ = (attempt, delay);
    }
    fn on_success_after_retry(&self, attempts: u32) {
        let _ = attempts;
    }
    fn on_exhausted(&self, attempts: u32, error: &EngineError) {
        let _ = (attempts, error);
    }
}

/// No-op [`RetryEvents`] for callers that don't want retry telemetry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRetryEvents;

impl RetryEvents for NoopRetryEvents {}

/// [`RetryEvents`] that logs through `tracing`, the engine's default.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRetryEvents;

impl RetryEvents for TracingRetryEvents {
    fn on_transient(&self, attempt: u32, error: &EngineError) {
        tracing::debug!(attempt, %error, "transient storage error detected");
    }

    fn on_retry(&self, attempt: u32, delay: Duration) {
        tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying after transient error");
    }

    fn on_success_after_retry(&self, attempts: u32) {
        tracing::info!(attempts, "operation succeeded after retry");
    }

    fn on_exhausted(&self, attempts: u32, error: &EngineError) {
        tracing::error!(attempts, %error, "retries exhausted");
    }
}

/// Run `operation`, retrying on transient failures per `policy` until it
/// succeeds, a non-transient error occurs, or attempts are exhausted. When
/// attempts are exhausted the last error is wrapped in
/// [`EngineError::TransientStorageError`], used only to surface a failure
/// after retry exhaustion.
///
/// # Errors
///
/// Returns the wrapped last error once attempts are exhausted, or
/// propagates immediately on a non-transient error.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    classifier: &dyn TransientClassifier,
    events: &dyn RetryEvents,
    mut operation: impl FnMut() -> Result<T>,
) -> Result<T> {
    if !policy.enabled {
        return operation();
    }

    let mut attempt = 1;
    loop {
        match operation() {
            Ok(value) => {
                if attempt > 1 {
                    events.on_success_after_retry(attempt);
                }
                return Ok(value);
            }
            Err(err) if err.is_cancellation() => return Err(err),
            Err(err) if attempt < policy.max_attempts && classifier.is_transient(&err) => {
                events.on_transient(attempt, &err);
                let delay = policy.backoff_for(attempt);
                events.on_retry(attempt, delay);
                thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => {
                if classifier.is_transient(&err) {
                    events.on_exhausted(attempt, &err);
                    return Err(EngineError::TransientStorageError(err.to_string()));
                }
                return Err(err);
            }
        }
    }
}
