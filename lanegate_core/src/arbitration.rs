//! The ARBITRATION State Machine - who holds the green phase.
//!
//! The only state variable is the active lane. Once per cycle:
//!
//! 1. **Hold**: inside `min_hold` of the last switch nothing changes.
//! 2. **Candidate**: arg-max of the smoothed scores; ties go to the lowest
//!    lane index.
//! 3. **Grace**: a candidate whose emergency presence ended less than
//!    `min_hold` ago cannot be newly selected from another lane.
//! 4. **Switch**: otherwise the candidate becomes active and the hold timer
//!    restarts.

use crate::occupancy::LaneId;
use serde::Serialize;

/// Why the active lane did (or did not) change this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    /// Still inside the minimum hold
    Holding,
    /// The current lane is still the best candidate
    Retained,
    /// Candidate rejected by the post-emergency grace period
    GraceBlocked { candidate: LaneId },
    /// Green moved to a new lane
    Switched { from: LaneId, to: LaneId },
}

/// Outcome of one arbitration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub active: LaneId,
    pub verdict: Verdict,
}

/// Arg-max with lowest-index tie-break (first maximum in scan order).
pub fn select_candidate(scores: &[f64]) -> Option<LaneId> {
    let mut best: Option<(LaneId, f64)> = None;
    for (idx, &score) in scores.iter().enumerate() {
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((idx, score)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Process-wide arbitration state.
#[derive(Debug, Clone)]
pub struct Arbiter {
    /// Lane currently holding green
    active: LaneId,

    /// Cycle time the active lane was granted
    green_start: f64,

    /// Per lane: time emergency presence was last observed to be absent
    last_emergency_departure: Vec<Option<f64>>,

    /// Per lane: live emergency flag from the latest cycle
    live_emergency: Vec<bool>,

    /// Minimum hold and grace duration (seconds)
    min_hold: f64,
}

impl Arbiter {
    /// Lane 0 starts green at `now`.
    pub fn new(lane_count: usize, min_hold: f64, now: f64) -> Self {
        Self {
            active: 0,
            green_start: now,
            last_emergency_departure: vec![None; lane_count],
            live_emergency: vec![false; lane_count],
            min_hold,
        }
    }

    pub fn active(&self) -> LaneId {
        self.active
    }

    pub fn green_start(&self) -> f64 {
        self.green_start
    }

    pub fn last_emergency_departure(&self, lane: LaneId) -> Option<f64> {
        self.last_emergency_departure.get(lane).copied().flatten()
    }

    pub fn live_emergency(&self, lane: LaneId) -> bool {
        self.live_emergency.get(lane).copied().unwrap_or(false)
    }

    /// Refresh the emergency-departure markers.
    ///
    /// A lane without live emergencies gets its marker stamped the first
    /// cycle it is seen that way; a lane with live emergencies has it
    /// cleared.
    pub fn observe_emergencies(&mut self, live: &[bool], now: f64) {
        for (lane, &has_emergency) in live.iter().enumerate() {
            if lane >= self.live_emergency.len() {
                break;
            }
            self.live_emergency[lane] = has_emergency;
            if has_emergency {
                self.last_emergency_departure[lane] = None;
            } else if self.last_emergency_departure[lane].is_none() {
                self.last_emergency_departure[lane] = Some(now);
            }
        }
    }

    /// True while `lane` is inside its post-emergency grace period.
    pub fn in_grace(&self, lane: LaneId, now: f64) -> bool {
        self.last_emergency_departure(lane)
            .map(|t| now - t < self.min_hold)
            .unwrap_or(false)
    }

    /// Run one arbitration step against the smoothed scores.
    pub fn decide(&mut self, smoothed: &[f64], now: f64) -> Decision {
        if now - self.green_start < self.min_hold {
            return self.keep(Verdict::Holding);
        }

        let candidate = match select_candidate(smoothed) {
            Some(c) => c,
            None => return self.keep(Verdict::Retained),
        };

        if candidate == self.active {
            return self.keep(Verdict::Retained);
        }

        if self.in_grace(candidate, now) {
            return self.keep(Verdict::GraceBlocked { candidate });
        }

        let from = self.active;
        self.active = candidate;
        self.green_start = now;
        Decision {
            active: candidate,
            verdict: Verdict::Switched { from, to: candidate },
        }
    }

    fn keep(&self, verdict: Verdict) -> Decision {
        Decision {
            active: self.active,
            verdict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Arbiter past the startup grace window
    fn settled(lanes: usize, min_hold: f64) -> Arbiter {
        let mut arb = Arbiter::new(lanes, min_hold, 0.0);
        arb.observe_emergencies(&vec![false; lanes], -100.0);
        arb
    }

    #[test]
    fn test_select_candidate_tie_lowest_index() {
        assert_eq!(select_candidate(&[1.0, 3.0, 3.0, 2.0]), Some(1));
        assert_eq!(select_candidate(&[0.0, 0.0]), Some(0));
        assert_eq!(select_candidate(&[]), None);
    }

    #[test]
    fn test_min_hold_blocks_switch() {
        let mut arb = settled(2, 5.0);
        let d = arb.decide(&[0.0, 100.0], 4.9);
        assert_eq!(d.verdict, Verdict::Holding);
        assert_eq!(d.active, 0);

        let d = arb.decide(&[0.0, 100.0], 5.0);
        assert_eq!(d.verdict, Verdict::Switched { from: 0, to: 1 });
        assert_eq!(arb.green_start(), 5.0);

        // Hold restarts from the switch
        let d = arb.decide(&[100.0, 0.0], 9.0);
        assert_eq!(d.verdict, Verdict::Holding);
        assert_eq!(d.active, 1);
    }

    #[test]
    fn test_startup_grace_keeps_lane_zero() {
        let mut arb = Arbiter::new(2, 5.0, 0.0);
        arb.observe_emergencies(&[false, false], 0.0);
        // Past hold, but lane 1 only just got its marker at t=0
        let d = arb.decide(&[0.0, 10.0], 6.0);
        assert_eq!(d.verdict, Verdict::Switched { from: 0, to: 1 });

        let mut arb = Arbiter::new(2, 5.0, 0.0);
        arb.observe_emergencies(&[false, false], 3.0);
        let d = arb.decide(&[0.0, 10.0], 6.0);
        assert_eq!(d.verdict, Verdict::GraceBlocked { candidate: 1 });
    }

    #[test]
    fn test_emergency_marker_lifecycle() {
        let mut arb = Arbiter::new(2, 5.0, 0.0);
        arb.observe_emergencies(&[false, true], 1.0);
        assert_eq!(arb.last_emergency_departure(0), Some(1.0));
        assert_eq!(arb.last_emergency_departure(1), None);
        assert!(arb.live_emergency(1));

        // Marker stamped once, not refreshed while absent
        arb.observe_emergencies(&[false, false], 2.0);
        arb.observe_emergencies(&[false, false], 3.0);
        assert_eq!(arb.last_emergency_departure(0), Some(1.0));
        assert_eq!(arb.last_emergency_departure(1), Some(2.0));
    }

    #[test]
    fn test_grace_blocks_reselection_after_emergency() {
        let mut arb = settled(2, 5.0);
        // Emergency in lane 1 wins green at t=10
        arb.observe_emergencies(&[false, true], 10.0);
        assert_eq!(arb.decide(&[1.0, 1e6], 10.0).active, 1);

        // Lane 0 takes over at t=15 (emergency gone at t=14)
        arb.observe_emergencies(&[false, false], 14.0);
        assert_eq!(arb.decide(&[5.0, 1e5], 15.0).verdict, Verdict::Retained);
        arb.observe_emergencies(&[false, false], 15.0);
        assert_eq!(arb.decide(&[5.0, 1.0], 15.0).active, 0);

        // Lane 1 cannot be re-granted before 14 + 5, even after hold
        assert_eq!(
            arb.decide(&[0.0, 50.0], 18.9).verdict,
            Verdict::Holding
        );
        let mut arb2 = arb.clone();
        arb2.green_start = 10.0;
        assert_eq!(
            arb2.decide(&[0.0, 50.0], 18.9).verdict,
            Verdict::GraceBlocked { candidate: 1 }
        );
        assert_eq!(
            arb2.decide(&[0.0, 50.0], 19.0).verdict,
            Verdict::Switched { from: 0, to: 1 }
        );
    }

    proptest! {
        #[test]
        fn prop_no_switch_inside_hold(
            scores in prop::collection::vec(prop::collection::vec(0.0f64..100.0, 4), 1..200),
            min_hold in 0.5f64..10.0,
        ) {
            let mut arb = settled(4, min_hold);
            let dt = 1.0 / 30.0;
            let mut last_switch = 0.0;
            for (step, cycle) in scores.iter().enumerate() {
                let now = step as f64 * dt;
                let before = arb.active();
                let d = arb.decide(cycle, now);
                if d.active != before {
                    prop_assert!(now - last_switch >= min_hold);
                    last_switch = now;
                }
            }
        }
    }
}
