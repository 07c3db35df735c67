//! The OCCUPANCY Tracker - per-vehicle lane dwell state.
//!
//! Maps deduplicated detections onto lane regions and keeps, per tracked
//! identity, the time it entered each lane. Membership is not exclusive: a
//! centroid inside two overlapping regions holds an entry in both, and each
//! entry accrues wait time and departs independently.
//!
//! Departure is absence-driven. An identity missing from the current frame
//! leaves every lane it held an entry for, on that very cycle.

use crate::detection::{Detection, VehicleId};
use crate::region::Region;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Index of a lane (and its region).
pub type LaneId = usize;

// ============================================================================
// VEHICLE STATE
// ============================================================================

/// One lane occupied by a vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneEntry {
    /// Cycle time the vehicle was first seen in this lane
    pub entered_at: f64,

    /// Class label at entry
    pub label: String,
}

/// Everything tracked about one identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleState {
    /// Open entries, keyed by lane
    pub entries: BTreeMap<LaneId, LaneEntry>,
}

impl VehicleState {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, lane: LaneId) -> Option<&LaneEntry> {
        self.entries.get(&lane)
    }
}

// ============================================================================
// CYCLE OUTPUT
// ============================================================================

/// Live per-lane aggregates for one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaneOccupancy {
    /// Vehicles whose centroid is inside the region this cycle
    pub count: usize,

    /// Sum of `now - entered_at` over those vehicles
    pub live_wait: f64,

    /// Sum of emergency weights over those vehicles
    pub live_emergency: f64,
}

/// A vehicle entering a lane for the first time.
#[derive(Debug, Clone, PartialEq)]
pub struct Arrival {
    pub vehicle_id: VehicleId,
    pub lane: LaneId,
    pub label: String,
    pub at: f64,
}

/// A vehicle leaving a lane.
#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    pub vehicle_id: VehicleId,
    pub lane: LaneId,
    pub label: String,
    pub arrived_at: f64,
    pub exited_at: f64,
}

impl Departure {
    pub fn wait_seconds(&self) -> f64 {
        self.exited_at - self.arrived_at
    }
}

/// Result of `OccupancyTracker::update`.
#[derive(Debug, Clone, Default)]
pub struct OccupancyUpdate {
    pub lanes: Vec<LaneOccupancy>,
    pub arrivals: Vec<Arrival>,
    pub departures: Vec<Departure>,
}

impl OccupancyUpdate {
    pub fn counts(&self) -> Vec<usize> {
        self.lanes.iter().map(|l| l.count).collect()
    }
}

// ============================================================================
// TRACKER
// ============================================================================

/// Per-identity occupancy state across cycles.
pub struct OccupancyTracker {
    /// Tracked vehicles, ordered so departures are emitted deterministically
    vehicles: BTreeMap<VehicleId, VehicleState>,

    /// Per lane: emergency vehicles currently holding an entry → entry time
    open_emergencies: Vec<BTreeMap<VehicleId, f64>>,

    /// Emergency class label → priority weight
    emergency_weights: HashMap<String, f64>,
}

impl OccupancyTracker {
    pub fn new(lane_count: usize, emergency_weights: HashMap<String, f64>) -> Self {
        Self {
            vehicles: BTreeMap::new(),
            open_emergencies: vec![BTreeMap::new(); lane_count],
            emergency_weights,
        }
    }

    pub fn lane_count(&self) -> usize {
        self.open_emergencies.len()
    }

    /// Process one cycle of deduplicated detections.
    ///
    /// `regions` must hold exactly `lane_count()` regions.
    pub fn update(&mut self, regions: &[Region], detections: &[Detection], now: f64) -> OccupancyUpdate {
        debug_assert_eq!(regions.len(), self.lane_count());

        let mut update = OccupancyUpdate {
            lanes: vec![LaneOccupancy::default(); regions.len()],
            ..Default::default()
        };
        let mut present: HashSet<VehicleId> = HashSet::with_capacity(detections.len());

        for det in detections {
            present.insert(det.id);
            let centroid = det.centroid();
            let emergency_weight = self.emergency_weights.get(&det.label).copied();
            let vehicle = self.vehicles.entry(det.id).or_default();

            for (lane, region) in regions.iter().enumerate() {
                if !region.contains(&centroid) {
                    continue;
                }

                let entry = vehicle.entries.entry(lane).or_insert_with(|| {
                    update.arrivals.push(Arrival {
                        vehicle_id: det.id,
                        lane,
                        label: det.label.clone(),
                        at: now,
                    });
                    LaneEntry {
                        entered_at: now,
                        label: det.label.clone(),
                    }
                });

                let agg = &mut update.lanes[lane];
                agg.count += 1;
                agg.live_wait += now - entry.entered_at;

                if let Some(weight) = emergency_weight {
                    agg.live_emergency += weight;
                    self.open_emergencies[lane]
                        .entry(det.id)
                        .or_insert(entry.entered_at);
                }
            }
        }

        // Departures: every entry held by an identity absent this cycle
        for (&vehicle_id, vehicle) in self.vehicles.iter_mut() {
            if present.contains(&vehicle_id) {
                continue;
            }
            for (lane, entry) in std::mem::take(&mut vehicle.entries) {
                self.open_emergencies[lane].remove(&vehicle_id);
                update.departures.push(Departure {
                    vehicle_id,
                    lane,
                    label: entry.label,
                    arrived_at: entry.entered_at,
                    exited_at: now,
                });
            }
        }

        self.vehicles.retain(|_, v| !v.is_empty());

        update
    }

    /// Entry time of the longest-waiting emergency vehicle in `lane`.
    pub fn earliest_emergency(&self, lane: LaneId) -> Option<f64> {
        self.open_emergencies
            .get(lane)?
            .values()
            .copied()
            .reduce(f64::min)
    }

    pub fn has_live_emergency(&self, lane: LaneId) -> bool {
        self.open_emergencies
            .get(lane)
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }

    /// Live-emergency flag for every lane.
    pub fn emergency_flags(&self) -> Vec<bool> {
        self.open_emergencies.iter().map(|set| !set.is_empty()).collect()
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&VehicleState> {
        self.vehicles.get(&id)
    }

    /// Number of identities holding at least one lane entry.
    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;
    use approx::assert_relative_eq;

    fn weights() -> HashMap<String, f64> {
        let mut w = HashMap::new();
        w.insert("fire truck".to_string(), 2.0);
        w.insert("police car".to_string(), 4.0);
        w
    }

    fn two_lanes() -> Vec<Region> {
        vec![
            Region::axis_aligned(0.0, 0.0, 100.0, 100.0),
            Region::axis_aligned(200.0, 0.0, 100.0, 100.0),
        ]
    }

    /// 10×10 box centred on (cx, cy)
    fn at(id: VehicleId, label: &str, cx: f64, cy: f64) -> Detection {
        Detection::new(id, label, BoundingBox::new(cx - 5.0, cy - 5.0, cx + 5.0, cy + 5.0))
    }

    #[test]
    fn test_arrival_records_entry() {
        let regions = two_lanes();
        let mut tracker = OccupancyTracker::new(2, weights());

        let update = tracker.update(&regions, &[at(1, "car", 50.0, 50.0)], 10.0);

        assert_eq!(update.counts(), vec![1, 0]);
        assert_eq!(update.arrivals.len(), 1);
        assert_eq!(update.arrivals[0].lane, 0);
        assert_eq!(update.lanes[0].live_wait, 0.0);

        let entry = tracker.vehicle(1).unwrap().entry(0).unwrap();
        assert_eq!(entry.entered_at, 10.0);
        assert_eq!(entry.label, "car");
    }

    #[test]
    fn test_live_wait_accumulates_without_reset() {
        let regions = two_lanes();
        let mut tracker = OccupancyTracker::new(2, weights());

        let mut last = -1.0;
        for step in 0..10 {
            let now = 100.0 + step as f64 * 0.5;
            let update = tracker.update(&regions, &[at(1, "car", 50.0, 50.0)], now);
            assert!(update.lanes[0].live_wait >= last);
            last = update.lanes[0].live_wait;
        }
        assert_relative_eq!(last, 4.5);
    }

    #[test]
    fn test_departure_on_first_absent_cycle() {
        let regions = two_lanes();
        let mut tracker = OccupancyTracker::new(2, weights());

        tracker.update(&regions, &[at(7, "truck", 250.0, 50.0)], 1.0);
        tracker.update(&regions, &[at(7, "truck", 250.0, 50.0)], 2.0);
        let update = tracker.update(&regions, &[], 4.5);

        assert_eq!(update.departures.len(), 1);
        let dep = &update.departures[0];
        assert_eq!(dep.vehicle_id, 7);
        assert_eq!(dep.lane, 1);
        assert_eq!(dep.label, "truck");
        assert_relative_eq!(dep.wait_seconds(), 3.5);

        // Record pruned once empty
        assert!(tracker.vehicle(7).is_none());
        assert_eq!(tracker.vehicle_count(), 0);
    }

    #[test]
    fn test_overlapping_regions_independent_entries() {
        let regions = vec![
            Region::axis_aligned(0.0, 0.0, 100.0, 100.0),
            Region::axis_aligned(50.0, 0.0, 100.0, 100.0),
        ];
        let mut tracker = OccupancyTracker::new(2, weights());

        // Lane 0 only at t=0, then inside the overlap from t=2
        tracker.update(&regions, &[at(1, "car", 20.0, 50.0)], 0.0);
        let update = tracker.update(&regions, &[at(1, "car", 75.0, 50.0)], 2.0);
        assert_eq!(update.counts(), vec![1, 1]);
        assert_relative_eq!(update.lanes[0].live_wait, 2.0);
        assert_relative_eq!(update.lanes[1].live_wait, 0.0);

        let update = tracker.update(&regions, &[], 5.0);
        assert_eq!(update.departures.len(), 2);
        assert_relative_eq!(update.departures[0].wait_seconds(), 5.0);
        assert_relative_eq!(update.departures[1].wait_seconds(), 3.0);
    }

    #[test]
    fn test_entry_survives_leaving_region_while_tracked() {
        let regions = two_lanes();
        let mut tracker = OccupancyTracker::new(2, weights());

        tracker.update(&regions, &[at(1, "car", 50.0, 50.0)], 0.0);
        // Still tracked, now between the lanes
        let update = tracker.update(&regions, &[at(1, "car", 150.0, 50.0)], 1.0);
        assert_eq!(update.counts(), vec![0, 0]);
        assert!(update.departures.is_empty());
        assert!(tracker.vehicle(1).unwrap().entry(0).is_some());
    }

    #[test]
    fn test_untracked_outside_regions_not_retained() {
        let regions = two_lanes();
        let mut tracker = OccupancyTracker::new(2, weights());

        tracker.update(&regions, &[at(1, "car", 150.0, 500.0)], 0.0);
        assert_eq!(tracker.vehicle_count(), 0);
    }

    #[test]
    fn test_emergency_registration_and_clear() {
        let regions = two_lanes();
        let mut tracker = OccupancyTracker::new(2, weights());

        let update = tracker.update(&regions, &[at(1, "police car", 50.0, 50.0)], 3.0);
        assert_eq!(update.lanes[0].live_emergency, 4.0);
        assert!(tracker.has_live_emergency(0));
        assert_eq!(tracker.earliest_emergency(0), Some(3.0));

        // Idempotent: stays at original entry time
        tracker.update(&regions, &[at(1, "police car", 50.0, 50.0)], 4.0);
        assert_eq!(tracker.earliest_emergency(0), Some(3.0));

        tracker.update(&regions, &[], 5.0);
        assert!(!tracker.has_live_emergency(0));
        assert_eq!(tracker.earliest_emergency(0), None);
    }

    #[test]
    fn test_same_instant_emergencies_clear_individually() {
        let regions = two_lanes();
        let mut tracker = OccupancyTracker::new(2, weights());

        tracker.update(
            &regions,
            &[at(1, "fire truck", 20.0, 50.0), at(2, "police car", 80.0, 50.0)],
            1.0,
        );
        tracker.update(&regions, &[at(2, "police car", 80.0, 50.0)], 2.0);
        assert!(tracker.has_live_emergency(0));
        assert_eq!(tracker.emergency_flags(), vec![true, false]);
    }

    #[test]
    fn test_earliest_emergency_is_minimum() {
        let regions = two_lanes();
        let mut tracker = OccupancyTracker::new(2, weights());

        tracker.update(&regions, &[at(5, "fire truck", 20.0, 50.0)], 1.0);
        tracker.update(
            &regions,
            &[at(5, "fire truck", 20.0, 50.0), at(3, "police car", 80.0, 50.0)],
            4.0,
        );
        assert_eq!(tracker.earliest_emergency(0), Some(1.0));
    }
}
