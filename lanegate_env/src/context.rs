//! Core environment context trait for LaneGate controllers.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for Environment Interaction.
///
/// This trait abstracts the "real world" so that the arbitration runtime can
/// run both on a deployed controller (tokio) and inside the deterministic
/// simulation harness (virtual clock).
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and the system clock
/// - **Simulation**: `SimContext` - manually advanced virtual clock
#[async_trait]
pub trait LaneContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// This is the cycle timestamp fed to the engine. In simulation it is
    /// the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time corresponding to `now() == 0`.
    ///
    /// Dwell records are stamped with dates derived from this anchor.
    fn epoch(&self) -> SystemTime;

    /// Returns the current wall-clock time.
    fn system_time(&self) -> SystemTime {
        self.epoch() + self.now()
    }

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
