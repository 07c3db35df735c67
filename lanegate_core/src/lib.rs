//! LaneGate Core - Occupancy-Driven Lane Arbitration
//!
//! Decides, once per detection frame, which approach lane of a junction
//! holds the green phase:
//!
//! 1. **Regions**: oriented rectangles mapping camera pixels to lanes
//! 2. **Occupancy**: per-vehicle lane entries, arrivals and departures
//! 3. **Scoring**: weighted queue/wait score with an emergency override,
//!    exponentially smoothed
//! 4. **Arbitration**: minimum green hold plus a post-emergency grace period
//! 5. **Dispatch**: edge-triggered lamp commands, one per real change
//!
//! The [`engine::Engine`] is pure and synchronous; [`runtime::ControllerRuntime`]
//! wraps it with the dwell log, the actuator link and log replication.

pub mod config;
pub mod region;
pub mod detection;
pub mod occupancy;
pub mod scoring;
pub mod arbitration;
pub mod dispatch;
pub mod dwell_log;
pub mod engine;
pub mod runtime;

// Re-export key types for convenience
pub use config::{ArbiterConfig, ConfigError, ControllerConfig, RuntimeConfig};
pub use region::{pick_region, Region, RegionHandle, RegionStore, StoreError};
pub use detection::{deduplicate, validate_frame, BoundingBox, Detection, RawDetection, VehicleId};
pub use occupancy::{LaneId, OccupancyTracker};
pub use arbitration::{Arbiter, Verdict};
pub use dispatch::{DispatchAdapter, LaneCommand, LinkState};
pub use dwell_log::{DwellLogWriter, DwellRecord, LogError, WallClock};
pub use engine::{CycleOutput, CycleReport, Engine};
pub use runtime::{ControllerRuntime, RuntimeError, RuntimeStats};
