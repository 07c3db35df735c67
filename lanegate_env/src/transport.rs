//! Outbound collaborators: the actuator link and the log replicator.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::ActuatorFrame;
use std::path::Path;

/// Abstraction for the device link that switches the lane lamps.
///
/// # Implementations
///
/// - **Production**: TCP line protocol to the signal head controller
/// - **Simulation**: in-memory recorder with scriptable outages
///
/// # Frame Flow
///
/// ```text
/// Engine ──LaneCommand──► outbox ──► transport loop ──ActuatorFrame──► device
///                                     (reconnects with fixed backoff)
/// ```
#[async_trait]
pub trait ActuatorTransport: Send + 'static {
    /// Establishes (or re-establishes) the link.
    ///
    /// # Returns
    /// * `Ok(())` - The link is up and `write` may be called
    /// * `Err(EnvError::ConnectFailed)` - The device is unreachable
    async fn connect(&mut self) -> Result<(), EnvError>;

    /// Writes a single frame to the device.
    ///
    /// An error means the link must be treated as down; the caller
    /// reconnects before writing again.
    async fn write(&mut self, frame: &ActuatorFrame) -> Result<(), EnvError>;

    /// Human-readable endpoint description (for logging).
    fn endpoint(&self) -> String;
}

/// Abstraction for the remote copy of the dwell log.
///
/// Replication is best-effort: failures are reported to the caller, which
/// simply tries again on the next interval.
#[async_trait]
pub trait LogReplicator: Send + Sync + 'static {
    /// Uploads the current contents of the log at `path`.
    async fn replicate(&self, path: &Path) -> Result<(), EnvError>;
}
