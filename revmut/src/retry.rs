//! Bounded exponential backoff around operations that may hit a version
//! conflict.

use std::{future::Future, time::Duration};

use anyhow::{bail, Result};
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{error::Error, object::ObjectRef};

/// Backoff parameters.
///
/// `steps` is the total number of attempts. The k-th sleep (counting from 0)
/// lasts between `duration * factor^k` and `duration * factor^k * (1 + jitter)`,
/// and never less than the sleep before it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Backoff {
    pub steps: u32,
    #[serde(rename = "initialDelayMs", with = "duration_ms")]
    pub duration: Duration,
    pub factor: f64,
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            steps: 5,
            duration: Duration::from_secs(1),
            factor: 1.5,
            jitter: 0.5,
        }
    }
}

impl Backoff {
    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            bail!("backoff steps must be at least 1");
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            bail!("backoff factor must be a finite number >= 1.0, got {}", self.factor);
        }
        if !self.jitter.is_finite() || self.jitter < 0.0 {
            bail!("backoff jitter must be a finite number >= 0.0, got {}", self.jitter);
        }
        Ok(())
    }

    /// The sleeps between attempts, without jitter.
    pub fn base_delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut next = self.duration;
        (1..self.steps).map(move |_| {
            let current = next;
            next = scale(next, self.factor);
            current
        })
    }

    /// The sleeps between attempts, jittered. Each is at least as long as the
    /// previous one, even when the jitter drawn for it is smaller.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut previous = Duration::ZERO;
        self.base_delays().map(move |base| {
            previous = self.jittered(base).max(previous);
            previous
        })
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.jitter > 0.0 {
            base.saturating_add(scale(base, rand::thread_rng().gen::<f64>() * self.jitter))
        } else {
            base
        }
    }
}

/// Multiply in whole nanoseconds, saturating instead of panicking.
fn scale(duration: Duration, factor: f64) -> Duration {
    Duration::from_nanos((duration.as_nanos() as f64 * factor).round() as u64)
}

/// Retries an operation while it reports [`Error::Conflict`].
///
/// The configuration is fixed at construction.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(backoff: Backoff) -> Result<Self> {
        backoff.validate()?;
        Ok(RetryPolicy { backoff })
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Run `operation` until it succeeds, fails with anything but a conflict,
    /// or has been attempted `steps` times.
    ///
    /// On exhaustion the last conflict is returned unchanged. Cancellation is
    /// checked before every attempt and during every sleep; an attempt that is
    /// already running is allowed to finish.
    pub async fn execute<T, F, Fut>(
        &self,
        key: &ObjectRef,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut delays = self.backoff.delays();
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled { key: key.clone() });
            }
            let error = match operation().await {
                Err(error) if error.is_conflict() => error,
                result => return result,
            };
            let Some(delay) = delays.next() else {
                debug!(%key, attempt, "giving up after conflict");
                return Err(error);
            };
            debug!(%key, attempt, ?delay, "conflict, retrying");
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::Cancelled { key: key.clone() });
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
