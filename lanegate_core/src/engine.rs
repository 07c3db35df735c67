//! The arbitration engine - one synchronous step per detection frame.
//!
//! ```text
//! detections ─► dedup ─► occupancy ─► raw scores ─► smoothing
//!                              │                        │
//!                              ▼                        ▼
//!                        dwell records     arbitration ─► dispatch ─► commands
//! ```
//!
//! The engine performs no I/O. It owns every piece of cross-cycle state
//! (vehicle entries, smoothed scores, the active lane, last-sent lamp
//! states) and is driven by the caller's clock, so the same code runs
//! under the tokio runtime and under the deterministic simulator.

use crate::arbitration::{Arbiter, Verdict};
use crate::config::{ArbiterConfig, ConfigError};
use crate::detection::{deduplicate, Detection};
use crate::dispatch::{DispatchAdapter, LaneCommand, LinkState};
use crate::dwell_log::{DwellRecord, WallClock};
use crate::occupancy::{LaneId, OccupancyTracker};
use crate::region::Region;
use crate::scoring::{ScoreWeights, ScoringEngine};
use serde::Serialize;
use tracing::{debug, info};

// ============================================================================
// CYCLE OUTPUT
// ============================================================================

/// Scoreboard snapshot of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Cycle time (seconds on the engine clock)
    pub now: f64,

    /// Vehicles inside each region
    pub counts: Vec<usize>,

    pub raw_scores: Vec<f64>,
    pub smoothed_scores: Vec<f64>,

    /// Lane holding green after this cycle
    pub active_lane: LaneId,

    /// Active lane, if anyone is actually waiting in it
    pub go_lane: Option<LaneId>,

    pub verdict: Verdict,

    /// New lane entries this cycle
    pub arrivals: usize,

    /// Lane entries closed this cycle
    pub departures: usize,
}

/// Everything one `advance` produces.
#[derive(Debug, Clone)]
pub struct CycleOutput {
    pub active_lane: LaneId,
    pub commands: Vec<LaneCommand>,
    pub dwell_records: Vec<DwellRecord>,
    pub report: CycleReport,
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct Engine {
    config: ArbiterConfig,
    regions: Vec<Region>,
    tracker: OccupancyTracker,
    scoring: ScoringEngine,
    arbiter: Arbiter,
    dispatch: DispatchAdapter,
    clock: WallClock,
    cycles: u64,
}

impl Engine {
    /// Build an engine with lane 0 green from `now`.
    ///
    /// Fails if the configuration is invalid or the region count does not
    /// match `lane_count`.
    pub fn new(
        config: ArbiterConfig,
        regions: Vec<Region>,
        clock: WallClock,
        now: f64,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if regions.len() != config.lane_count {
            return Err(ConfigError::Invalid(format!(
                "{} regions configured for {} lanes",
                regions.len(),
                config.lane_count
            )));
        }

        let lanes = config.lane_count;
        let weights = ScoreWeights {
            wait: config.w_wait,
            queue: config.w_queue,
            emergency: config.w_emerg,
        };

        Ok(Self {
            tracker: OccupancyTracker::new(lanes, config.emergency_weights.clone()),
            scoring: ScoringEngine::new(lanes, weights, config.alpha),
            arbiter: Arbiter::new(lanes, config.min_hold_seconds, now),
            dispatch: DispatchAdapter::new(lanes),
            regions,
            clock,
            config,
            cycles: 0,
        })
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    pub fn lane_count(&self) -> usize {
        self.config.lane_count
    }

    pub fn active_lane(&self) -> LaneId {
        self.arbiter.active()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Mutable access for region editing between cycles.
    pub fn region_mut(&mut self, lane: LaneId) -> Option<&mut Region> {
        self.regions.get_mut(lane)
    }

    pub fn tracker(&self) -> &OccupancyTracker {
        &self.tracker
    }

    pub fn arbiter(&self) -> &Arbiter {
        &self.arbiter
    }

    pub fn link_state(&self) -> LinkState {
        self.dispatch.link()
    }

    /// Record the actuator link state.
    ///
    /// On a down → up transition every lane's last-sent state is forgotten
    /// so the next cycle re-sends the full lamp picture.
    pub fn set_link_state(&mut self, link: LinkState) {
        let previous = self.dispatch.link();
        if previous == link {
            return;
        }
        self.dispatch.set_link(link);
        match link {
            LinkState::Up => self.resync_dispatch(),
            LinkState::Down => info!("Actuator link down; dispatch suspended"),
        }
    }

    /// Forget every lane's last-sent state so the next cycle re-sends the
    /// full lamp picture. Needed after any reconnect, including one that
    /// happened entirely between two cycles.
    pub fn resync_dispatch(&mut self) {
        info!("Actuator link up; resending lamp states");
        self.dispatch.invalidate_all();
    }

    /// Forget the last-sent state of one lane (its command was not delivered).
    pub fn invalidate_dispatch(&mut self, lane: LaneId) {
        self.dispatch.invalidate(lane);
    }

    /// Run one cycle at `now`.
    pub fn advance(&mut self, detections: Vec<Detection>, now: f64) -> CycleOutput {
        self.cycles += 1;

        let detections = deduplicate(detections, self.config.dedup_iou_threshold);
        let occupancy = self.tracker.update(&self.regions, &detections, now);

        let tracker = &self.tracker;
        let raw = self
            .scoring
            .raw_scores(&occupancy.lanes, |lane| tracker.earliest_emergency(lane), now);
        let smoothed = self.scoring.smooth(&raw).to_vec();

        self.arbiter.observe_emergencies(&self.tracker.emergency_flags(), now);
        let decision = self.arbiter.decide(&smoothed, now);
        match decision.verdict {
            Verdict::Switched { from, to } => {
                info!(
                    "Green lane {} -> {} at t={:.2}s (score {:.2})",
                    from, to, now, smoothed[to]
                );
            }
            Verdict::GraceBlocked { candidate } => {
                debug!("Lane {} held back by emergency grace at t={:.2}s", candidate, now);
            }
            Verdict::Holding | Verdict::Retained => {}
        }

        let counts = occupancy.counts();
        let commands = self.dispatch.dispatch(decision.active, &counts);

        let dwell_records: Vec<DwellRecord> = occupancy
            .departures
            .iter()
            .map(|dep| DwellRecord::from_departure(dep, &self.clock))
            .collect();

        for arrival in &occupancy.arrivals {
            debug!(
                "Vehicle {} ({}) entered lane {} at t={:.2}s",
                arrival.vehicle_id, arrival.label, arrival.lane, arrival.at
            );
        }

        let go_lane = counts
            .get(decision.active)
            .filter(|&&n| n > 0)
            .map(|_| decision.active);

        let report = CycleReport {
            now,
            counts,
            raw_scores: raw,
            smoothed_scores: smoothed,
            active_lane: decision.active,
            go_lane,
            verdict: decision.verdict,
            arrivals: occupancy.arrivals.len(),
            departures: occupancy.departures.len(),
        };

        CycleOutput {
            active_lane: decision.active,
            commands,
            dwell_records,
            report,
        }
    }
}
