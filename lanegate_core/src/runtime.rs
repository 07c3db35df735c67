//! Controller Runtime - drives the engine against a real (or simulated) world.
//!
//! The engine itself is synchronous and I/O free. This module owns the
//! pieces around it:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       ControllerRuntime                          │
//! │                                                                  │
//! │  run_cycle(frame) ─► Engine::advance ─┬─► DwellLogWriter (sync)  │
//! │        ▲                              │        │ fault           │
//! │        │ link state                   │        ▼                 │
//! │  ┌─────┴──────────┐   outbox (bounded)│  ┌──────────────────┐    │
//! │  │ transport loop │◄──────────────────┘  │ replication loop │    │
//! │  │ connect/write  │                      │ every interval   │    │
//! │  └────────────────┘                      └──────────────────┘    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The cycle never blocks on either background task: commands are handed
//! over with `try_send` and a full outbox only costs a resend next cycle.

use crate::config::{ConfigError, ControllerConfig};
use crate::detection::Detection;
use crate::dispatch::LinkState;
use crate::dwell_log::{DwellLogWriter, LogError, WallClock};
use crate::engine::{CycleOutput, Engine};
use crate::region::{Region, RegionStore, StoreError};
use lanegate_env::{ActuatorFrame, ActuatorTransport, LaneContext, LogReplicator};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// A dwell-log append that failed, reported to the replication task.
#[derive(Debug, Clone)]
pub struct SinkFault {
    /// Cycle time of the failed append
    pub at: f64,

    /// Rows that could not be written
    pub rows: usize,

    pub message: String,
}

/// Counters kept across cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub cycles: u64,
    pub commands_sent: u64,
    pub commands_dropped: u64,
    pub dwell_rows: u64,
    pub sink_faults: u64,
}

/// Link state as published by the transport loop.
///
/// `generation` increments on every successful connect, so a drop and
/// reconnect that both fall between two cycles is still visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LinkStatus {
    state: LinkState,
    generation: u64,
}

/// Channel ends handed to the background tasks by `start`.
struct PendingTasks {
    frames_rx: mpsc::Receiver<ActuatorFrame>,
    faults_rx: mpsc::Receiver<SinkFault>,
    link_tx: watch::Sender<LinkStatus>,
}

/// The controller process: engine, sinks and background tasks.
///
/// Generic over the context so the same runtime runs in production
/// (tokio) or under the simulation clock.
pub struct ControllerRuntime<Ctx: LaneContext> {
    context: Arc<Ctx>,
    config: ControllerConfig,
    engine: Engine,
    log: DwellLogWriter,
    outbox: mpsc::Sender<ActuatorFrame>,
    faults: mpsc::Sender<SinkFault>,
    link_rx: watch::Receiver<LinkStatus>,
    /// Last connect generation the engine was resynced for
    link_generation: u64,
    pending: Option<PendingTasks>,
    stats: RuntimeStats,
}

impl<Ctx: LaneContext> ControllerRuntime<Ctx> {
    /// Build the runtime. The dwell log is opened here; failing to open it
    /// is fatal.
    pub fn new(
        context: Arc<Ctx>,
        config: ControllerConfig,
        regions: Vec<Region>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;

        let clock = WallClock::new(context.epoch(), config.arbiter.utc_offset_minutes);
        let now = context.now().as_secs_f64();
        let engine = Engine::new(config.arbiter.clone(), regions, clock, now)?;
        let log = DwellLogWriter::open(&config.runtime.dwell_log_path)?;

        let (outbox, frames_rx) = mpsc::channel(config.runtime.command_outbox_capacity);
        let (faults, faults_rx) = mpsc::channel(config.runtime.fault_channel_capacity);
        // Down until the transport loop connects
        let (link_tx, link_rx) = watch::channel(LinkStatus {
            state: LinkState::Down,
            generation: 0,
        });

        info!(
            "Controller ready: {} lanes, dwell log at {}",
            engine.lane_count(),
            log.path().display()
        );

        Ok(Self {
            context,
            config,
            engine,
            log,
            outbox,
            faults,
            link_rx,
            link_generation: 0,
            pending: Some(PendingTasks { frames_rx, faults_rx, link_tx }),
            stats: RuntimeStats::default(),
        })
    }

    /// Load regions from the configured store, then build the runtime.
    pub fn from_store(context: Arc<Ctx>, config: ControllerConfig) -> Result<Self, RuntimeError> {
        let regions = RegionStore::load(&config.runtime.region_config_path, config.arbiter.lane_count)?;
        Self::new(context, config, regions)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Mutable engine access, for region edits between cycles.
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn stats(&self) -> RuntimeStats {
        self.stats
    }

    /// Link state as last published by the transport loop.
    pub fn link_state(&self) -> LinkState {
        self.link_rx.borrow().state
    }

    /// Spawn the transport and replication loops. Only the first call
    /// does anything.
    pub fn start<T, R>(&mut self, transport: T, replicator: Arc<R>) -> Result<(), RuntimeError>
    where
        T: ActuatorTransport,
        R: LogReplicator,
    {
        let pending = self.pending.take().ok_or(RuntimeError::AlreadyStarted)?;

        info!("Starting actuator link to {}", transport.endpoint());
        self.context.spawn(
            "actuator-transport",
            transport_loop(
                self.context.clone(),
                transport,
                pending.frames_rx,
                pending.link_tx,
                self.config.runtime.reconnect_backoff(),
            ),
        );

        self.context.spawn(
            "log-replication",
            replication_loop(
                self.context.clone(),
                replicator,
                self.config.runtime.dwell_log_path.clone(),
                self.config.runtime.replication_interval(),
                pending.faults_rx,
            ),
        );

        Ok(())
    }

    /// Run one cycle on a validated detection frame.
    pub fn run_cycle(&mut self, detections: Vec<Detection>) -> CycleOutput {
        let now = self.context.now().as_secs_f64();
        self.stats.cycles += 1;

        let link = *self.link_rx.borrow();
        let was_up = self.engine.link_state() == LinkState::Up;
        self.engine.set_link_state(link.state);
        if link.state == LinkState::Up && link.generation != self.link_generation {
            self.link_generation = link.generation;
            // Down and back up between cycles: frames in flight were lost
            if was_up {
                self.engine.resync_dispatch();
            }
        }

        let output = self.engine.advance(detections, now);

        if !output.dwell_records.is_empty() {
            match self.log.append(&output.dwell_records) {
                Ok(()) => self.stats.dwell_rows += output.dwell_records.len() as u64,
                Err(e) => {
                    error!("Failed to append {} dwell records: {}", output.dwell_records.len(), e);
                    self.stats.sink_faults += 1;
                    let fault = SinkFault {
                        at: now,
                        rows: output.dwell_records.len(),
                        message: e.to_string(),
                    };
                    if self.faults.try_send(fault).is_err() {
                        debug!("Sink fault channel full; fault not reported");
                    }
                }
            }
        }

        let channels = &self.engine.config().lane_channels;
        let mut undelivered = Vec::new();
        for command in &output.commands {
            let Some(frame) = command.to_frame(channels) else {
                warn!("Lane {} has no actuator channel", command.lane);
                continue;
            };
            match self.outbox.try_send(frame) {
                Ok(()) => self.stats.commands_sent += 1,
                Err(TrySendError::Full(frame)) => {
                    warn!("Command outbox full; dropping {}", frame);
                    undelivered.push(command.lane);
                }
                Err(TrySendError::Closed(frame)) => {
                    warn!("Transport loop gone; dropping {}", frame);
                    undelivered.push(command.lane);
                }
            }
        }
        self.stats.commands_dropped += undelivered.len() as u64;
        for lane in undelivered {
            self.engine.invalidate_dispatch(lane);
        }

        output
    }

    /// Sleep out the remainder of the cycle period that began at `started`.
    pub async fn pace(&self, started: Duration) {
        let elapsed = self.context.now().saturating_sub(started);
        let period = self.config.runtime.cycle_interval();
        if elapsed < period {
            self.context.sleep(period - elapsed).await;
        }
    }

    /// Save regions and flush the dwell log.
    ///
    /// Dropping the runtime closes the outbox, which stops both background
    /// loops.
    pub fn shutdown(mut self) -> Result<RuntimeStats, RuntimeError> {
        RegionStore::save(&self.config.runtime.region_config_path, self.engine.regions())?;
        self.log.flush()?;
        info!(
            "Controller stopped after {} cycles ({} commands, {} dwell rows)",
            self.stats.cycles, self.stats.commands_sent, self.stats.dwell_rows
        );
        Ok(self.stats)
    }
}

// ============================================================================
// BACKGROUND TASKS
// ============================================================================

async fn transport_loop<Ctx, T>(
    context: Arc<Ctx>,
    mut transport: T,
    mut frames: mpsc::Receiver<ActuatorFrame>,
    link: watch::Sender<LinkStatus>,
    backoff: Duration,
) where
    Ctx: LaneContext,
    T: ActuatorTransport,
{
    let mut generation = 0;
    loop {
        if let Err(e) = transport.connect().await {
            warn!("Actuator connect to {} failed: {}", transport.endpoint(), e);
            context.sleep(backoff).await;
            // Frames queued while down are stale; the engine resends on link-up
            loop {
                match frames.try_recv() {
                    Ok(_) => {}
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }
            continue;
        }

        while frames.try_recv().is_ok() {}
        info!("Actuator link up ({})", transport.endpoint());
        generation += 1;
        link.send_replace(LinkStatus {
            state: LinkState::Up,
            generation,
        });

        loop {
            let Some(frame) = frames.recv().await else {
                debug!("Command outbox closed; transport loop exiting");
                return;
            };
            if let Err(e) = transport.write(&frame).await {
                warn!("Actuator write of {} failed: {}", frame, e);
                link.send_replace(LinkStatus {
                    state: LinkState::Down,
                    generation,
                });
                break;
            }
            debug!("Sent {}", frame);
        }

        context.sleep(backoff).await;
    }
}

async fn replication_loop<Ctx, R>(
    context: Arc<Ctx>,
    replicator: Arc<R>,
    log_path: PathBuf,
    interval: Duration,
    mut faults: mpsc::Receiver<SinkFault>,
) where
    Ctx: LaneContext,
    R: LogReplicator,
{
    loop {
        context.sleep(interval).await;

        loop {
            match faults.try_recv() {
                Ok(fault) => warn!(
                    "Dwell log lost {} rows at t={:.2}s: {}",
                    fault.rows, fault.at, fault.message
                ),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("Controller stopped; replication loop exiting");
                    return;
                }
            }
        }

        match replicator.replicate(&log_path).await {
            Ok(()) => debug!("Replicated {}", log_path.display()),
            Err(e) => debug!("Replication of {} failed: {}", log_path.display(), e),
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors that stop the controller.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("Background tasks already started")]
    AlreadyStarted,
}
