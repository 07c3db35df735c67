//! Junction scenarios for DST.

use crate::oracle::DetectorNoise;
use lanegate_core::{ArbiterConfig, LaneId, Region, RegionStore};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// DST-001: Four busy lanes with asymmetric demand and random emergencies
    RushHour,

    /// DST-002: Scripted emergency vehicles must win green within a bound
    EmergencyPreemption,

    /// DST-003: Two lanes whose regions overlap
    Overlap,

    /// DST-004: Jittery detector with duplicates, dropouts and malformed rows
    DetectorJitter,

    /// DST-005: Actuator link outages mid-run
    LinkOutage,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::RushHour,
            ScenarioId::EmergencyPreemption,
            ScenarioId::Overlap,
            ScenarioId::DetectorJitter,
            ScenarioId::LinkOutage,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::RushHour => "rush_hour",
            ScenarioId::EmergencyPreemption => "emergency_preemption",
            ScenarioId::Overlap => "overlap",
            ScenarioId::DetectorJitter => "detector_jitter",
            ScenarioId::LinkOutage => "link_outage",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::RushHour => "4 lanes, 0.05-0.15 veh/s each, random fire trucks and police cars",
            ScenarioId::EmergencyPreemption => "Light traffic, emergency vehicles at t=10s, 30s, 50s",
            ScenarioId::Overlap => "2 lanes sharing a 100px strip; vehicles there count in both",
            ScenarioId::DetectorJitter => "3px jitter, 30% duplicates, 2% dropouts, 5% malformed rows",
            ScenarioId::LinkOutage => "Actuator link down 15-30s and 45-50s, emergency during outage",
        }
    }

    /// Builds the junction, demand and fault script for this scenario.
    pub fn setup(&self) -> ScenarioSetup {
        match self {
            ScenarioId::RushHour => ScenarioSetup {
                arrival_rates: vec![0.15, 0.10, 0.08, 0.05],
                emergency_rate: 0.01,
                ..ScenarioSetup::four_lane()
            },

            ScenarioId::EmergencyPreemption => {
                let base = ScenarioSetup::four_lane();
                let bound = base.config.min_hold_seconds + 5.0;
                ScenarioSetup {
                    arrival_rates: vec![0.08; 4],
                    scripted: vec![
                        ScriptedEmergency { at: 10.0, lane: 2, label: "fire truck" },
                        ScriptedEmergency { at: 30.0, lane: 3, label: "police car" },
                        ScriptedEmergency { at: 50.0, lane: 1, label: "police car" },
                    ],
                    emergency_wait_bound: Some(bound),
                    ..base
                }
            }

            ScenarioId::Overlap => ScenarioSetup {
                config: ArbiterConfig {
                    lane_count: 2,
                    lane_channels: vec![1, 2],
                    ..ArbiterConfig::default()
                },
                regions: vec![
                    Region::axis_aligned(50.0, 50.0, 200.0, 200.0),
                    Region::axis_aligned(150.0, 50.0, 200.0, 200.0),
                ],
                arrival_rates: vec![0.12, 0.12],
                scripted: vec![ScriptedEmergency { at: 12.0, lane: 0, label: "fire truck" }],
                ..ScenarioSetup::four_lane()
            },

            ScenarioId::DetectorJitter => ScenarioSetup {
                arrival_rates: vec![0.12, 0.08, 0.08, 0.05],
                emergency_rate: 0.01,
                noise: DetectorNoise {
                    jitter_px: 3.0,
                    duplicate_prob: 0.3,
                    drop_prob: 0.02,
                    malformed_prob: 0.05,
                },
                ..ScenarioSetup::four_lane()
            },

            ScenarioId::LinkOutage => ScenarioSetup {
                arrival_rates: vec![0.08; 4],
                scripted: vec![ScriptedEmergency { at: 20.0, lane: 2, label: "police car" }],
                outages: vec![(15.0, 30.0), (45.0, 50.0)],
                ..ScenarioSetup::four_lane()
            },
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rush_hour" | "rushhour" | "dst-001" => Ok(ScenarioId::RushHour),
            "emergency_preemption" | "emergency" | "dst-002" => Ok(ScenarioId::EmergencyPreemption),
            "overlap" | "dst-003" => Ok(ScenarioId::Overlap),
            "detector_jitter" | "jitter" | "dst-004" => Ok(ScenarioId::DetectorJitter),
            "link_outage" | "outage" | "dst-005" => Ok(ScenarioId::LinkOutage),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

/// An emergency vehicle injected at a fixed time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptedEmergency {
    pub at: f64,
    pub lane: LaneId,
    pub label: &'static str,
}

/// Everything a scenario run needs besides the seed.
#[derive(Debug, Clone)]
pub struct ScenarioSetup {
    pub config: ArbiterConfig,
    pub regions: Vec<Region>,

    /// Ordinary arrivals, vehicles/second per lane
    pub arrival_rates: Vec<f64>,

    /// Random emergency arrivals, vehicles/second for the whole junction
    pub emergency_rate: f64,

    pub scripted: Vec<ScriptedEmergency>,
    pub noise: DetectorNoise,

    /// `[start, end)` windows with the actuator link down
    pub outages: Vec<(f64, f64)>,

    /// Longest acceptable arrival-to-release time for an emergency vehicle
    pub emergency_wait_bound: Option<f64>,
}

impl ScenarioSetup {
    /// Default four-lane junction, no traffic, clean detector.
    pub fn four_lane() -> Self {
        let config = ArbiterConfig::default();
        Self {
            regions: RegionStore::default_regions(config.lane_count),
            config,
            arrival_rates: Vec::new(),
            emergency_rate: 0.0,
            scripted: Vec::new(),
            noise: DetectorNoise::default(),
            outages: Vec::new(),
            emergency_wait_bound: None,
        }
    }

    /// Whether the actuator link is up at `t`.
    pub fn link_up_at(&self, t: f64) -> bool {
        !self.outages.iter().any(|&(start, end)| t >= start && t < end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_setups_are_consistent() {
        for scenario in ScenarioId::all() {
            let setup = scenario.setup();
            assert!(setup.config.validate().is_ok(), "{}", scenario);
            assert_eq!(setup.regions.len(), setup.config.lane_count, "{}", scenario);
            assert_eq!(setup.arrival_rates.len(), setup.config.lane_count, "{}", scenario);
            assert!(setup.scripted.iter().all(|s| s.lane < setup.config.lane_count));
        }
    }

    #[test]
    fn test_outage_windows() {
        let setup = ScenarioId::LinkOutage.setup();
        assert!(setup.link_up_at(14.9));
        assert!(!setup.link_up_at(15.0));
        assert!(!setup.link_up_at(29.9));
        assert!(setup.link_up_at(30.0));
        assert!(!setup.link_up_at(47.0));
    }
}
