//! Retry with exponential backoff
//!
//! Every adapter wraps its transport calls in a [`RetryPolicy`]. The delay
//! before attempt `k` (k >= 2) is `base_delay * 2^(k-2)` plus a random jitter
//! so concurrent workers do not retry in lockstep. Sleeping goes through an
//! injected [`Sleeper`], which lets tests run without real delays.

use anyhow::Result;
use log::debug;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetrySettings;
use crate::error::is_permanent;
use crate::ingest::CancelToken;

/// Blocks the current worker between attempts
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Bounded retry policy
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_jitter: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    /// Default upper bound of the random jitter added to each delay
    pub const DEFAULT_JITTER: Duration = Duration::from_millis(500);

    /// Create a policy that sleeps the calling thread
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_jitter: Self::DEFAULT_JITTER,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    /// Build a policy from configured settings
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            settings.max_attempts,
            Duration::from_millis(settings.base_delay_ms),
        )
        .with_jitter(Duration::from_millis(settings.max_jitter_ms))
    }

    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before `attempt`, without jitter (zero for the first attempt)
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (attempt - 2).min(16);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    ///
    /// `op` receives the 1-based attempt number. The last error is returned
    /// with the attempt count attached as context.
    pub fn execute<T, F>(&self, op: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        self.run(None, op)
    }

    /// Like [`execute`](Self::execute), but stops retrying once `cancel` fires
    ///
    /// An attempt already in progress finishes; no new attempt starts.
    pub fn execute_until<T, F>(&self, cancel: &CancelToken, op: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        self.run(Some(cancel), op)
    }

    fn run<T, F>(&self, cancel: Option<&CancelToken>, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let mut attempt = 1;
        loop {
            let err = match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if is_permanent(&err) {
                return Err(err);
            }
            if attempt >= self.max_attempts {
                return Err(err.context(format!("gave up after {} attempts", attempt)));
            }
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Err(err.context("cancelled before retry"));
            }

            attempt += 1;
            let delay = self.delay_before(attempt) + self.jitter();
            debug!("Attempt {} failed ({:#}); retrying in {:?}", attempt - 1, err, delay);
            self.sleeper.sleep(delay);
        }
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_jitter", &self.max_jitter)
            .finish_non_exhaustive()
    }
}
