//! Lane priority scoring with emergency override and exponential smoothing.

use crate::occupancy::LaneOccupancy;

/// Base score of any lane holding a live emergency vehicle.
///
/// Large enough that no realistic weighted queue reaches it; elapsed
/// emergency dwell is added on top so the longest-waiting emergency lane
/// wins among several.
pub const EMERGENCY_BASE_SCORE: f64 = 1_000_000.0;

/// Linear weights for non-emergency lanes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub wait: f64,
    pub queue: f64,
    pub emergency: f64,
}

/// Raw priority of one lane at `now`.
///
/// `earliest_emergency` is the entry time of the longest-waiting open
/// emergency vehicle in the lane, if any.
pub fn raw_score(
    weights: &ScoreWeights,
    lane: &LaneOccupancy,
    earliest_emergency: Option<f64>,
    now: f64,
) -> f64 {
    match earliest_emergency {
        Some(entered_at) => EMERGENCY_BASE_SCORE + (now - entered_at),
        None => {
            weights.wait * lane.live_wait
                + weights.queue * lane.count as f64
                + weights.emergency * lane.live_emergency
        }
    }
}

/// Smoothed per-lane scores.
///
/// State starts at zero and is never reinitialised; each update blends the
/// new raw score in with factor `alpha`.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    weights: ScoreWeights,
    alpha: f64,
    smoothed: Vec<f64>,
}

impl ScoringEngine {
    pub fn new(lane_count: usize, weights: ScoreWeights, alpha: f64) -> Self {
        Self {
            weights,
            alpha,
            smoothed: vec![0.0; lane_count],
        }
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    /// Raw scores for every lane.
    pub fn raw_scores(
        &self,
        lanes: &[LaneOccupancy],
        earliest_emergency: impl Fn(usize) -> Option<f64>,
        now: f64,
    ) -> Vec<f64> {
        lanes
            .iter()
            .enumerate()
            .map(|(idx, lane)| raw_score(&self.weights, lane, earliest_emergency(idx), now))
            .collect()
    }

    /// Blend `raw` into the smoothed scores and return them.
    pub fn smooth(&mut self, raw: &[f64]) -> &[f64] {
        for (s, r) in self.smoothed.iter_mut().zip(raw) {
            *s = self.alpha * r + (1.0 - self.alpha) * *s;
        }
        &self.smoothed
    }

    pub fn smoothed(&self) -> &[f64] {
        &self.smoothed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn weights() -> ScoreWeights {
        ScoreWeights { wait: 0.5, queue: 1.0, emergency: 2.0 }
    }

    #[test]
    fn test_four_lane_single_vehicle_scenario() {
        let mut engine = ScoringEngine::new(4, weights(), 0.2);
        let mut lanes = vec![LaneOccupancy::default(); 4];
        lanes[2] = LaneOccupancy { count: 1, live_wait: 10.0, live_emergency: 0.0 };

        let raw = engine.raw_scores(&lanes, |_| None, 100.0);
        assert_eq!(raw, vec![0.0, 0.0, 6.0, 0.0]);

        let smoothed = engine.smooth(&raw).to_vec();
        assert_relative_eq!(smoothed[2], 0.2 * 6.0);
        assert_eq!(smoothed[0], 0.0);
    }

    #[test]
    fn test_emergency_override_grows_with_dwell() {
        let lane = LaneOccupancy { count: 1, live_wait: 3.0, live_emergency: 4.0 };
        let score = raw_score(&weights(), &lane, Some(10.0), 13.0);
        assert_eq!(score, EMERGENCY_BASE_SCORE + 3.0);
    }

    #[test]
    fn test_longer_emergency_wins() {
        let lane = LaneOccupancy { count: 1, live_wait: 0.0, live_emergency: 2.0 };
        let older = raw_score(&weights(), &lane, Some(1.0), 20.0);
        let newer = raw_score(&weights(), &lane, Some(15.0), 20.0);
        assert!(older > newer);
    }

    #[test]
    fn test_smoothing_converges_and_never_resets() {
        let mut engine = ScoringEngine::new(1, weights(), 0.5);
        engine.smooth(&[8.0]);
        assert_eq!(engine.smoothed()[0], 4.0);
        engine.smooth(&[0.0]);
        assert_eq!(engine.smoothed()[0], 2.0);
        for _ in 0..60 {
            engine.smooth(&[8.0]);
        }
        assert_relative_eq!(engine.smoothed()[0], 8.0, epsilon = 1e-9);
    }

    #[test]
    fn test_alpha_one_tracks_raw() {
        let mut engine = ScoringEngine::new(2, weights(), 1.0);
        assert_eq!(engine.smooth(&[3.0, 7.0]), &[3.0, 7.0]);
        assert_eq!(engine.smooth(&[1.0, 0.0]), &[1.0, 0.0]);
    }

    proptest! {
        #[test]
        fn prop_emergency_lane_outranks_any_queue(
            w_wait in 0.0f64..100.0,
            w_queue in 0.0f64..100.0,
            w_emerg in 0.0f64..100.0,
            count in 0usize..50,
            live_wait in 0.0f64..2_000.0,
            live_emergency in 0.0f64..50.0,
            dwell in 0.0f64..600.0,
        ) {
            let w = ScoreWeights { wait: w_wait, queue: w_queue, emergency: w_emerg };
            let busy = LaneOccupancy { count, live_wait, live_emergency };
            let normal = raw_score(&w, &busy, None, 1_000.0);
            let emergency = raw_score(&w, &LaneOccupancy::default(), Some(1_000.0 - dwell), 1_000.0);
            prop_assert!(emergency >= EMERGENCY_BASE_SCORE);
            prop_assert!(emergency > normal);
        }
    }
}
