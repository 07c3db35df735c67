//! LaneGate Deterministic Simulation Testing (DST) Harness
//!
//! This crate provides a controlled junction where the arbitration engine
//! runs deterministically against simulated traffic.
//!
//! # Core Principle
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: Virtual clock advanced once per cycle
//! - **Traffic**: Arrivals and detector noise drawn from a seeded RNG
//! - **Actuator**: Simulated signal head with scripted link outages
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       ScenarioRunner                         │
//! │                                                              │
//! │  ┌────────────┐ detections ┌──────────┐ commands ┌─────────┐ │
//! │  │   Oracle   │───────────►│  Engine  │─────────►│ SimAct. │ │
//! │  │ (traffic)  │◄───────────┼──────────┼──────────│ (lamps) │ │
//! │  └────────────┘  lamps ON release vehicles       └─────────┘ │
//! │        ▲                                                     │
//! │        └── SimContext (virtual clock, fixed epoch)           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use lanegate_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::EmergencyPreemption);
//! assert!(result.passed);
//! ```

mod context;
mod oracle;
mod runner;
mod exporter;
pub mod scenarios;

pub use context::SimContext;
pub use oracle::{DetectorNoise, Oracle, Served, SimVehicle, EMERGENCY_LABELS, PHANTOM_ID_OFFSET};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use exporter::{SimEvent, SimExport, SimFrame};

#[cfg(test)]
mod tests {
    use super::*;
    use lanegate_core::{BoundingBox, ControllerConfig, ControllerRuntime, Detection, RegionStore};
    use std::time::Duration;

    #[test]
    fn test_controller_runtime_on_virtual_clock() {
        let tag = uuid::Uuid::new_v4();
        let mut config = ControllerConfig::default();
        config.runtime.dwell_log_path = std::env::temp_dir().join(format!("lanegate-sim-{}.jsonl", tag));
        config.runtime.region_config_path = std::env::temp_dir().join(format!("lanegate-sim-{}.json", tag));

        let context = SimContext::shared(42);
        let mut runtime =
            ControllerRuntime::new(context.clone(), config.clone(), RegionStore::default_regions(4)).unwrap();

        let car = Detection::new(5, "car", BoundingBox::new(140.0, 140.0, 160.0, 160.0));
        runtime.run_cycle(vec![car]);
        context.advance_time(Duration::from_secs(3));
        let output = runtime.run_cycle(vec![]);

        // Default offset is +05:30 on a 2024-01-01T00:00Z epoch
        let record = &output.dwell_records[0];
        assert_eq!(record.date, "2024-01-01");
        assert_eq!(record.arrival_time, "05:30:00");
        assert_eq!(record.exit_time, "05:30:03");
        assert_eq!(record.wait_seconds, 3.0);

        runtime.shutdown().unwrap();
        std::fs::remove_file(&config.runtime.dwell_log_path).ok();
        std::fs::remove_file(&config.runtime.region_config_path).ok();
    }
}
