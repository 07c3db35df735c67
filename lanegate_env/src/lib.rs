//! LaneGate Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam between the lane arbitration
//! runtime and the outside world, so the same controller code runs on a
//! deployed signal controller (tokio) and inside the deterministic
//! simulation harness.
//!
//! # Intercepted I/O
//!
//! - Time (`now()`, `sleep()`, wall-clock anchor)
//! - Actuator link (`connect()`, `write()`)
//! - Log replication (`replicate()`)
//!
//! # Example
//!
//! ```ignore
//! use lanegate_env::{LaneContext, ActuatorTransport};
//!
//! async fn cycle_loop<Ctx: LaneContext>(ctx: &Ctx) {
//!     loop {
//!         run_cycle(ctx.now());
//!         ctx.sleep(Duration::from_millis(33)).await;
//!     }
//! }
//! ```

mod context;
mod transport;
mod types;
mod error;
mod tokio_impl;

pub use context::LaneContext;
pub use transport::{ActuatorTransport, LogReplicator};
pub use types::{ActuatorFrame, LampState};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
