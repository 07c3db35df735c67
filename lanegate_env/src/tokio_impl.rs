//! Production implementation of LaneContext using Tokio.

use crate::LaneContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Production context backed by Tokio and the system clock.
///
/// Monotonic time comes from `Instant`, the wall-clock anchor is captured
/// once at construction so `epoch() + now()` never jumps backwards with NTP.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,

    /// Wall-clock time at `start`
    epoch: SystemTime,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            epoch: SystemTime::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LaneContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn epoch(&self) -> SystemTime {
        self.epoch
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        // Task names need tokio_unstable; plain spawn otherwise
        tokio::spawn(future);
    }

    fn seed(&self) -> u64 {
        // Production is not seeded
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_context_time() {
        let ctx = TokioContext::new();
        let t1 = ctx.now();
        ctx.sleep(Duration::from_millis(10)).await;
        let t2 = ctx.now();

        assert!(t2 > t1);
        assert!(t2 - t1 >= Duration::from_millis(10));
    }

    #[test]
    fn test_tokio_context_wall_clock_follows_epoch() {
        let ctx = TokioContext::new();
        assert!(ctx.system_time() >= ctx.epoch());
    }

    #[test]
    fn test_tokio_context_seed() {
        let ctx = TokioContext::new();
        assert_eq!(ctx.seed(), 0);
    }
}
