// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bounded-operation timeouts and wall-clock budgets (spec §4.G, §4.H).
//!
//! Every model call, validator call, stage, and job is bounded by a
//! configured duration. [`with_timeout`] wraps a single bounded operation;
//! [`WallClock`] tracks cumulative elapsed time against a stage- or
//! job-level cap so a long sequence of individually-fast attempts still
//! trips the outer bound.

use imgpipe_error::{ErrorCode, PipelineError};
use std::time::{Duration, Instant};

/// Run `fut`, failing with [`ErrorCode::Timeout`] if it doesn't resolve
/// within `duration`.
///
/// # Errors
///
/// Returns a [`PipelineError`] coded [`ErrorCode::Timeout`] if `fut` does
/// not complete in time.
pub async fn with_timeout<F, T>(duration: Duration, label: &str, fut: F) -> Result<T, PipelineError>
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| PipelineError::new(ErrorCode::Timeout, format!("{label} exceeded {duration:?}")))
}

/// Tracks elapsed wall-clock time against a fixed cap, e.g. the 6-minute
/// stage bound or the 30-minute job bound (spec §4.H "Timeouts table").
#[derive(Debug, Clone)]
pub struct WallClock {
    started: Instant,
    cap: Duration,
}

impl WallClock {
    /// Start a new clock with the given cap.
    #[must_use]
    pub fn start(cap: Duration) -> Self {
        Self {
            started: Instant::now(),
            cap,
        }
    }

    /// Time elapsed since [`start`](Self::start).
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// `true` once elapsed time has passed the cap.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.cap
    }

    /// Remaining time before the cap trips, or `Duration::ZERO` if already expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.cap.saturating_sub(self.elapsed())
    }

    /// Check the clock, returning a [`PipelineError`] coded
    /// [`ErrorCode::Timeout`] if it has expired.
    ///
    /// # Errors
    ///
    /// Returns an error once [`is_expired`](Self::is_expired) is `true`.
    pub fn check(&self, label: &str) -> Result<(), PipelineError> {
        if self.is_expired() {
            Err(PipelineError::new(
                ErrorCode::Timeout,
                format!("{label} exceeded wall-clock budget of {:?}", self.cap),
            ))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_timeout_passes_fast_operation() {
        let result = with_timeout(Duration::from_millis(50), "test", async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn with_timeout_fails_slow_operation() {
        let result = with_timeout(Duration::from_millis(5), "test", async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            42
        })
        .await;
        assert_eq!(result.unwrap_err().code, ErrorCode::Timeout);
    }

    #[test]
    fn wall_clock_not_expired_immediately() {
        let clock = WallClock::start(Duration::from_secs(60));
        assert!(!clock.is_expired());
        assert!(clock.check("stage").is_ok());
    }

    #[test]
    fn wall_clock_expires_after_cap() {
        let clock = WallClock::start(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(10));
        assert!(clock.is_expired());
        assert_eq!(clock.check("stage").unwrap_err().code, ErrorCode::Timeout);
    }

    #[test]
    fn remaining_shrinks_and_saturates_at_zero() {
        let clock = WallClock::start(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.remaining(), Duration::ZERO);
    }
}
