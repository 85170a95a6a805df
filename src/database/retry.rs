//! Retry wrapper for writes against the single-writer storage engine.
//!
//! SQLite holds one write lock per database file; a second writer gets a
//! busy/locked failure instead of blocking. Every mutation in the catalog
//! goes through [`RetryPolicy::run`], which waits out contention and lets
//! every other error propagate.

use std::thread;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, Params};
use tracing::warn;

/// Backoff configuration for contended writes.
///
/// The production default retries forever with a fixed interval: a
/// long-running indexing batch should outlive a prompt, not die to one.
/// Tests inject a bounded policy to observe the escape hatch.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub backoff: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(100),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Policy with an attempt ceiling, for tests.
    pub fn bounded(backoff: Duration, max_attempts: u32) -> Self {
        Self {
            backoff,
            max_attempts: Some(max_attempts),
        }
    }

    /// Run `op`, retrying while it fails with a busy/locked error.
    ///
    /// Any non-transient error is returned immediately. When a bounded
    /// policy exhausts its attempts, the last busy error is returned.
    pub fn run<T>(&self, mut op: impl FnMut() -> rusqlite::Result<T>) -> rusqlite::Result<T> {
        let mut attempt: u32 = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if is_busy(&err) => {
                    if let Some(max) = self.max_attempts {
                        if attempt >= max {
                            return Err(err);
                        }
                    }
                    warn!(attempt, "database busy, retrying in {:?}", self.backoff);
                    thread::sleep(self.backoff);
                    attempt = attempt.saturating_add(1);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Execute one mutating statement under the retry policy.
pub fn execute_with_retry<P: Params + Clone>(
    policy: &RetryPolicy,
    conn: &Connection,
    sql: &str,
    params: P,
) -> rusqlite::Result<usize> {
    policy.run(|| conn.execute(sql, params.clone()))
}

/// True for the engine's transient contention failures (busy or locked).
pub fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}
