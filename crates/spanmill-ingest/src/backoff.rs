//! Startup handshake with exponential backoff.
//!
//! Before declaring the streaming path healthy, the service probes
//! connectivity with a bounded exponential backoff. Exhausting the attempts
//! is a fatal startup error: a slow fail-loud start beats silently running
//! without ingestion.

use crate::error::{IngestError, Result};
use crate::source::LogSource;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Exponential backoff policy for the connectivity handshake.
///
/// Backoff for attempt `n` (0-indexed) is
/// `min(initial * 2^n, max)`.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// First wait between attempts (default: 100ms)
    pub initial: Duration,

    /// Backoff cap (default: 60s) - on a network hiccup we prefer waiting
    /// longer between retries over failing the service
    pub max: Duration,

    /// Maximum number of probe attempts (default: 10)
    pub max_attempts: usize,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// Backoff duration for a given attempt number (0-indexed).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exp = attempt.min(31) as u32;
        let backoff = self
            .initial
            .checked_mul(2u32.saturating_pow(exp))
            .unwrap_or(self.max);
        backoff.min(self.max)
    }
}

/// Probe the source until it responds, retrying with backoff.
///
/// Returns `HandshakeFailed` carrying the last ping error once the policy's
/// attempts are exhausted.
pub async fn handshake(source: &dyn LogSource, policy: &BackoffPolicy) -> Result<()> {
    let mut last_err = String::new();

    for attempt in 0..policy.max_attempts {
        match source.ping().await {
            Ok(()) => {
                if attempt > 0 {
                    info!(attempt = attempt + 1, "Log-stream handshake succeeded");
                }
                return Ok(());
            }
            Err(e) => {
                last_err = e.to_string();
                let wait = policy.backoff(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "Log-stream ping failed; will retry"
                );
                sleep(wait).await;
            }
        }
    }

    Err(IngestError::HandshakeFailed {
        attempts: policy.max_attempts,
        last: last_err,
    })
}
