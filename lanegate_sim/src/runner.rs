//! Scenario runner - drives the arbitration engine through a simulated junction.
//!
//! Every run has two phases. During the traffic phase the scenario's demand,
//! detector noise and link outages apply. The drain phase then stops
//! arrivals, restores a clean detector and a healthy link, and keeps cycling
//! until every vehicle has been released and every lane entry has closed.
//!
//! Assertions checked on every run:
//! - green never moves twice within the minimum hold
//! - no lamp command repeats the state the device already holds
//! - nothing is dispatched while the link is down
//! - every lane arrival produces exactly one dwell record
//! - every emergency vehicle is released (within a bound, if the scenario sets one)

use crate::context::SimContext;
use crate::exporter::{SimEvent, SimExport, SimFrame};
use crate::oracle::{DetectorNoise, Oracle};
use crate::scenarios::{ScenarioId, ScriptedEmergency};

use lanegate_core::{validate_frame, Engine, LaneCommand, LinkState, Verdict, WallClock};
use lanegate_env::{LampState, LaneContext};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total cycles executed (traffic + drain)
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Vehicles still queued at the end
    pub final_vehicle_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    pub cycles: u64,

    /// Green phase changes
    pub switches: u64,

    /// Lamp commands delivered to the device
    pub commands: u64,

    /// Commands repeating the state the device already held
    pub redundant_commands: u64,

    /// Commands produced while the link was down
    pub commands_while_down: u64,

    /// Switches closer together than the minimum hold
    pub hold_violations: u64,

    /// Lane entries opened
    pub arrivals: u64,

    /// Lane entries closed (dwell log rows)
    pub dwell_records: u64,

    pub vehicles_spawned: u64,
    pub vehicles_served: u64,

    /// Arrivals turned away by a full lane
    pub balked: u64,

    /// Detector rows rejected by validation
    pub malformed_dropped: u64,

    pub emergencies_spawned: u64,
    pub emergencies_served: u64,
    pub max_emergency_wait_secs: f64,

    /// Mean logged dwell time
    pub mean_dwell_secs: f64,

    /// Cycles run with the link down
    pub outage_cycles: u64,
}

/// Simulated signal head.
struct SimActuator {
    /// What the lamps physically show
    lamps: Vec<LampState>,

    /// Last state received per lane since the link came up
    received: Vec<Option<LampState>>,

    link_up: bool,
}

impl SimActuator {
    fn new(lanes: usize) -> Self {
        Self {
            lamps: vec![LampState::Off; lanes],
            received: vec![None; lanes],
            link_up: true,
        }
    }

    fn set_link(&mut self, up: bool) {
        if self.link_up && !up {
            self.received.iter_mut().for_each(|r| *r = None);
        }
        self.link_up = up;
    }

    fn receive(&mut self, command: &LaneCommand, metrics: &mut ScenarioMetrics) {
        if !self.link_up {
            metrics.commands_while_down += 1;
            return;
        }
        let Some(received) = self.received.get_mut(command.lane) else {
            return;
        };
        metrics.commands += 1;
        if *received == Some(command.state) {
            metrics.redundant_commands += 1;
        }
        *received = Some(command.state);
        self.lamps[command.lane] = command.state;
    }
}

/// Runs junction scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Cycle rate in Hz
    tick_rate_hz: u32,

    /// Length of the traffic phase in seconds
    max_duration_secs: f64,

    /// Longest the drain phase may take, in seconds
    drain_limit_secs: f64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            tick_rate_hz: 30,
            max_duration_secs: 60.0,
            drain_limit_secs: 600.0,
        }
    }

    /// Sets the tick rate.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz.max(1);
        self
    }

    /// Sets the traffic phase duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Sets the drain phase limit.
    pub fn with_drain_limit(mut self, secs: f64) -> Self {
        self.drain_limit_secs = secs;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.simulate(scenario, None)
    }

    /// Runs a scenario, recording a frame every `every_ticks` cycles and on
    /// every cycle with commands or events.
    pub fn run_with_export(
        &self,
        scenario: ScenarioId,
        export: &mut SimExport,
        every_ticks: u64,
    ) -> ScenarioResult {
        let result = self.simulate(scenario, Some((&mut *export, every_ticks.max(1))));
        export.finalize(result.passed, result.failure_reason.clone());
        result
    }

    fn simulate(
        &self,
        scenario: ScenarioId,
        mut export: Option<(&mut SimExport, u64)>,
    ) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        let setup = scenario.setup();
        let lanes = setup.config.lane_count;
        let min_hold = setup.config.min_hold_seconds;

        let context = SimContext::shared(self.seed);
        let physics_seed = self.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let mut oracle = Oracle::new(physics_seed, setup.regions.clone());

        let clock = WallClock::new(context.epoch(), setup.config.utc_offset_minutes);
        let mut engine = match Engine::new(setup.config.clone(), setup.regions.clone(), clock, 0.0) {
            Ok(engine) => engine,
            Err(e) => return self.aborted(scenario, format!("invalid scenario setup: {}", e)),
        };

        let mut device = SimActuator::new(lanes);
        let mut metrics = ScenarioMetrics::default();
        let mut pending: Vec<ScriptedEmergency> = setup
            .scripted
            .iter()
            .copied()
            .filter(|s| s.at < self.max_duration_secs)
            .collect();

        let mut last_switch = 0.0;
        let mut total_dwell = 0.0;
        let mut was_up = true;

        let hz = self.tick_rate_hz.max(1) as f64;
        let dt = 1.0 / hz;
        let traffic_ticks = (self.max_duration_secs * hz).round() as u64;
        let max_ticks = traffic_ticks + (self.drain_limit_secs * hz).round() as u64;
        let mut tick: u64 = 0;

        while tick < max_ticks {
            let now = context.now().as_secs_f64();
            let draining = tick >= traffic_ticks;
            if draining && oracle.vehicle_count() == 0 && engine.tracker().vehicle_count() == 0 {
                break;
            }

            let mut events = Vec::new();

            // Link state
            let link_up = draining || setup.link_up_at(now);
            if link_up != was_up {
                if link_up {
                    info!("  ✓ Actuator link restored at t={:.1}s", now);
                    events.push(SimEvent::info("actuator link up"));
                } else {
                    warn!("  ⚡ Actuator link lost at t={:.1}s", now);
                    events.push(SimEvent::warn("actuator link down"));
                }
                was_up = link_up;
            }
            engine.set_link_state(if link_up { LinkState::Up } else { LinkState::Down });
            device.set_link(link_up);
            if !link_up {
                metrics.outage_cycles += 1;
            }

            // Arrivals
            if !draining {
                oracle.spawn_arrivals(&setup.arrival_rates, dt, now);
                oracle.spawn_random_emergency(setup.emergency_rate, dt, now);
                pending.retain(|s| {
                    if s.at > now {
                        return true;
                    }
                    match oracle.spawn_vehicle(s.lane, s.label, now) {
                        Some(id) => {
                            info!("  🚨 {} #{} enters lane {} at t={:.1}s", s.label, id, s.lane, now);
                            events.push(SimEvent::warn(format!("{} #{} in lane {}", s.label, id, s.lane)));
                            false
                        }
                        None => true,
                    }
                });
            }

            // Detector → engine
            let noise = if draining { DetectorNoise::default() } else { setup.noise };
            let raw = oracle.detections(&noise);
            let raw_len = raw.len();
            let detections = validate_frame(raw);
            metrics.malformed_dropped += (raw_len - detections.len()) as u64;

            let output = engine.advance(detections, now);
            metrics.cycles += 1;
            metrics.arrivals += output.report.arrivals as u64;
            metrics.dwell_records += output.dwell_records.len() as u64;
            total_dwell += output.dwell_records.iter().map(|r| r.wait_seconds).sum::<f64>();

            if let Verdict::Switched { from, to } = output.report.verdict {
                metrics.switches += 1;
                if now - last_switch < min_hold {
                    metrics.hold_violations += 1;
                    warn!("  ✗ Switch {} -> {} only {:.2}s after the last", from, to, now - last_switch);
                }
                last_switch = now;
                events.push(SimEvent::info(format!("green {} -> {}", from, to)));
            }

            // Engine → device
            let mut wire = Vec::with_capacity(output.commands.len());
            for command in &output.commands {
                device.receive(command, &mut metrics);
                if let Some(frame) = command.to_frame(&setup.config.lane_channels) {
                    wire.push(frame.to_string());
                }
            }

            // Device → traffic
            for served in oracle.discharge(&device.lamps, now) {
                metrics.vehicles_served += 1;
                if served.vehicle.is_emergency() {
                    metrics.emergencies_served += 1;
                    metrics.max_emergency_wait_secs = metrics.max_emergency_wait_secs.max(served.wait());
                    info!(
                        "  ✓ {} #{} released through lane {} after {:.1}s",
                        served.vehicle.label,
                        served.vehicle.id,
                        served.lane,
                        served.wait()
                    );
                }
            }

            if let Some((export, every)) = export.as_mut() {
                if tick % *every == 0 || !wire.is_empty() || !events.is_empty() {
                    export.add_frame(SimFrame {
                        time_sec: now,
                        counts: output.report.counts.clone(),
                        smoothed_scores: output.report.smoothed_scores.clone(),
                        active_lane: output.report.active_lane,
                        go_lane: output.report.go_lane,
                        lamps: device.lamps.clone(),
                        link_up,
                        commands: wire,
                        events,
                    });
                }
            }

            if tick % (hz as u64 * 10).max(1) == 0 {
                debug!(
                    "  t={:.1}s | queued={} | active={} | counts={:?}",
                    now,
                    oracle.vehicle_count(),
                    output.active_lane,
                    output.report.counts
                );
            }

            context.advance_time(Duration::from_secs_f64(dt));
            tick += 1;
        }

        metrics.vehicles_spawned = oracle.spawned();
        metrics.emergencies_spawned = oracle.emergencies_spawned();
        metrics.balked = oracle.balked();
        if metrics.dwell_records > 0 {
            metrics.mean_dwell_secs = total_dwell / metrics.dwell_records as f64;
        }

        let mut failures = Vec::new();
        if metrics.hold_violations > 0 {
            failures.push(format!("{} switches inside the minimum hold", metrics.hold_violations));
        }
        if metrics.redundant_commands > 0 {
            failures.push(format!("{} redundant lamp commands", metrics.redundant_commands));
        }
        if metrics.commands_while_down > 0 {
            failures.push(format!("{} commands dispatched with the link down", metrics.commands_while_down));
        }
        if metrics.arrivals != metrics.dwell_records {
            failures.push(format!(
                "{} lane arrivals but {} dwell records",
                metrics.arrivals, metrics.dwell_records
            ));
        }
        if oracle.vehicle_count() > 0 {
            failures.push(format!("{} vehicles still queued after drain", oracle.vehicle_count()));
        }
        if metrics.emergencies_served < metrics.emergencies_spawned {
            failures.push(format!(
                "{} of {} emergency vehicles never reached green",
                metrics.emergencies_spawned - metrics.emergencies_served,
                metrics.emergencies_spawned
            ));
        }
        if let Some(bound) = setup.emergency_wait_bound {
            if metrics.max_emergency_wait_secs > bound {
                failures.push(format!(
                    "emergency vehicle waited {:.1}s (bound {:.1}s)",
                    metrics.max_emergency_wait_secs, bound
                ));
            }
        }
        if !pending.is_empty() {
            failures.push(format!("{} scripted emergencies never entered", pending.len()));
        }

        let passed = failures.is_empty();
        if passed {
            info!(
                "  {} cycles, {} switches, {} commands, {} dwell records",
                metrics.cycles, metrics.switches, metrics.commands, metrics.dwell_records
            );
        }

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks: tick,
            final_time_secs: context.now().as_secs_f64(),
            final_vehicle_count: oracle.vehicle_count(),
            failure_reason: if passed { None } else { Some(failures.join("; ")) },
            metrics,
        }
    }

    fn aborted(&self, scenario: ScenarioId, reason: String) -> ScenarioResult {
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            total_ticks: 0,
            final_time_secs: 0.0,
            final_vehicle_count: 0,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
        }
    }
}
