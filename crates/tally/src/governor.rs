//! Concurrency governor for remote requests
//!
//! One governor belongs to one ingestion run. It owns a rayon pool sized to
//! the configured limit and a permit counter, so no more than `limit` batch or
//! detail requests are ever in flight against the remote quota.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

/// Bounds in-flight requests against a remote source
pub struct Governor {
    limit: usize,
    pool: rayon::ThreadPool,
    in_flight: Mutex<usize>,
    released: Condvar,
    peak: AtomicUsize,
}

impl Governor {
    /// Default number of simultaneous requests
    pub const DEFAULT_LIMIT: usize = 10;

    /// Create a governor allowing `limit` concurrent requests
    pub fn new(limit: usize) -> Result<Self> {
        let limit = limit.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(limit)
            .thread_name(|i| format!("tally-fetch-{}", i))
            .build()
            .context("Failed to build fetch worker pool")?;

        Ok(Self {
            limit,
            pool,
            in_flight: Mutex::new(0),
            released: Condvar::new(),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Highest number of permits held at once so far
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Block until a request slot is free
    pub fn acquire(&self) -> Permit<'_> {
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while *in_flight >= self.limit {
            in_flight = match self.released.wait(in_flight) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        *in_flight += 1;
        self.peak.fetch_max(*in_flight, Ordering::Relaxed);
        Permit { governor: self }
    }

    fn release(&self) {
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *in_flight = in_flight.saturating_sub(1);
        self.released.notify_one();
    }

    /// Run `task` over every item on the worker pool, holding a permit per task
    ///
    /// Results come back in input order regardless of completion order.
    pub fn map<I, T, F>(&self, items: Vec<I>, task: F) -> Vec<T>
    where
        I: Send,
        T: Send,
        F: Fn(I) -> T + Send + Sync,
    {
        self.pool.install(|| {
            items
                .into_par_iter()
                .map(|item| {
                    let _permit = self.acquire();
                    task(item)
                })
                .collect()
        })
    }
}

impl fmt::Debug for Governor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Governor")
            .field("limit", &self.limit)
            .field("peak_in_flight", &self.peak_in_flight())
            .finish()
    }
}

/// A held request slot; released on drop
pub struct Permit<'a> {
    governor: &'a Governor,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.governor.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_map_preserves_order() {
        let governor = Governor::new(4).unwrap();
        let out = governor.map((0..50).collect(), |i: usize| i * 2);
        assert_eq!(out, (0..50).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_never_exceeds_limit() {
        let governor = Governor::new(3).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let observed_max = Arc::new(AtomicUsize::new(0));

        governor.map((0..30).collect(), |_: usize| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            observed_max.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
            active.fetch_sub(1, Ordering::SeqCst);
        });

        assert!(observed_max.load(Ordering::SeqCst) <= 3);
        assert!(governor.peak_in_flight() <= 3);
        assert!(governor.peak_in_flight() >= 1);
    }

    #[test]
    fn test_permit_released_on_drop() {
        let governor = Governor::new(1).unwrap();
        drop(governor.acquire());
        // Would block forever if the first permit leaked
        let _second = governor.acquire();
        assert_eq!(governor.peak_in_flight(), 1);
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        let governor = Governor::new(0).unwrap();
        assert_eq!(governor.limit(), 1);
    }
}
