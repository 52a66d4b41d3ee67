//! # Delay / Backoff
//! Randomized pacing and capped exponential backoff shared by every adapter.
//!
//! The duration math is pure; the actual waiting goes through a [`Pacer`]
//! so tests can record requested delays instead of sleeping through them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

/// First backoff step.
pub const BACKOFF_BASE_MS: u64 = 30_000;
/// Upper bound for any single backoff sleep.
pub const BACKOFF_CAP_MS: u64 = 150_000;

/// `min(30s * 2^attempt, 150s)`, saturating for large attempts.
pub fn backoff_duration(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let ms = BACKOFF_BASE_MS.saturating_mul(factor).min(BACKOFF_CAP_MS);
    Duration::from_millis(ms)
}

/// Uniformly random duration in `[min_ms, max_ms]` (inclusive).
pub fn jitter_duration(min_ms: u64, max_ms: u64) -> Duration {
    if min_ms >= max_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rand::rng().random_range(min_ms..=max_ms))
}

/// Uniformly random duration in `[0, window)`.
pub fn stagger_duration(window: Duration) -> Duration {
    let ms = window.as_millis().min(u64::MAX as u128) as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..ms))
}

#[async_trait]
pub trait Pacer: Send + Sync {
    async fn sleep(&self, d: Duration);
}

/// Real wall-clock pacing on the tokio timer.
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn sleep(&self, d: Duration) {
        tokio::time::sleep(d).await;
    }
}

/// Cloneable handle over a pacer. Every method returns the duration it waited.
#[derive(Clone)]
pub struct Delay {
    pacer: Arc<dyn Pacer>,
}

impl Delay {
    pub fn new(pacer: Arc<dyn Pacer>) -> Self {
        Self { pacer }
    }

    pub fn tokio() -> Self {
        Self::new(Arc::new(TokioPacer))
    }

    pub async fn jitter(&self, min_ms: u64, max_ms: u64) -> Duration {
        let d = jitter_duration(min_ms, max_ms);
        self.pacer.sleep(d).await;
        d
    }

    pub async fn backoff(&self, attempt: u32) -> Duration {
        let d = backoff_duration(attempt);
        self.pacer.sleep(d).await;
        d
    }

    pub async fn stagger(&self, window: Duration) -> Duration {
        let d = stagger_duration(window);
        self.pacer.sleep(d).await;
        d
    }
}

impl Default for Delay {
    fn default() -> Self {
        Self::tokio()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_matches_formula_and_caps() {
        let expected = [30_000u64, 60_000, 120_000, 150_000, 150_000];
        for (attempt, ms) in expected.iter().enumerate() {
            assert_eq!(backoff_duration(attempt as u32), Duration::from_millis(*ms));
        }
        assert_eq!(backoff_duration(200), Duration::from_millis(BACKOFF_CAP_MS));
    }

    #[test]
    fn backoff_is_monotonic() {
        let mut prev = Duration::ZERO;
        for attempt in 0..80 {
            let d = backoff_duration(attempt);
            assert!(d >= prev, "attempt {attempt} went backwards");
            assert!(d <= Duration::from_millis(BACKOFF_CAP_MS));
            prev = d;
        }
    }

    #[test]
    fn jitter_stays_in_range() {
        for _ in 0..500 {
            let d = jitter_duration(3_000, 7_000);
            assert!(d >= Duration::from_millis(3_000) && d <= Duration::from_millis(7_000));
        }
        assert_eq!(jitter_duration(5, 5), Duration::from_millis(5));
    }

    #[test]
    fn stagger_is_below_window() {
        let window = Duration::from_secs(3600);
        for _ in 0..500 {
            assert!(stagger_duration(window) < window);
        }
        assert_eq!(stagger_duration(Duration::ZERO), Duration::ZERO);
    }
}
