//! Ground truth oracle for simulated junction traffic.
//!
//! The Oracle maintains the "God's eye view" of the junction:
//! - Which vehicles are queued, where, and since when
//! - Arrivals (per-lane Poisson streams plus emergency vehicles)
//! - Discharge: a lane whose lamp is ON releases one vehicle per interval
//! - Detector output generated from ground truth (with noise)
//!
//! Vehicles stand on a fixed 50 px grid so two distinct vehicles never
//! produce overlapping boxes; any overlap the engine sees is detector noise.

use lanegate_core::{LaneId, RawDetection, Region, VehicleId};
use lanegate_env::LampState;
use nalgebra::Point2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::collections::{BTreeMap, HashSet};

/// First grid point (px)
const GRID_ORIGIN: f64 = 75.0;

/// Grid spacing (px)
const GRID_STEP: f64 = 50.0;

/// Side of a vehicle bounding box (px)
const BOX_SIZE: f64 = 40.0;

/// Detector double-reports use the vehicle id offset by this amount
pub const PHANTOM_ID_OFFSET: VehicleId = 1_000_000;

/// Labels the simulated detector can emit for emergency vehicles.
pub const EMERGENCY_LABELS: [&str; 2] = ["fire truck", "police car"];

/// A queued vehicle in the simulated world.
#[derive(Debug, Clone)]
pub struct SimVehicle {
    pub id: VehicleId,
    pub label: String,

    /// Lane the vehicle arrived in
    pub home_lane: LaneId,

    /// Centre of the vehicle in frame pixels
    pub position: Point2<f64>,

    /// Simulation time of arrival
    pub spawned_at: f64,

    slot: (i64, i64),
}

impl SimVehicle {
    pub fn is_emergency(&self) -> bool {
        EMERGENCY_LABELS.contains(&self.label.as_str())
    }
}

/// A vehicle released through a green lamp.
#[derive(Debug, Clone)]
pub struct Served {
    pub vehicle: SimVehicle,
    pub lane: LaneId,
    pub left_at: f64,
}

impl Served {
    pub fn wait(&self) -> f64 {
        self.left_at - self.vehicle.spawned_at
    }
}

/// Imperfections of the simulated detector.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DetectorNoise {
    /// Gaussian jitter of box position, std dev in pixels
    pub jitter_px: f64,

    /// Chance a vehicle is reported twice under different ids
    pub duplicate_prob: f64,

    /// Chance a vehicle is missing from a frame
    pub drop_prob: f64,

    /// Chance of an extra row with no tracker id
    pub malformed_prob: f64,
}

/// The Oracle - owns the ground truth queue and generates detector frames.
pub struct Oracle {
    /// RNG for arrivals and detector noise
    physics_rng: ChaCha8Rng,

    regions: Vec<Region>,

    /// Grid slots inside each lane's region
    slots: Vec<Vec<(i64, i64)>>,

    vehicles: BTreeMap<VehicleId, SimVehicle>,
    occupied: HashSet<(i64, i64)>,
    next_id: VehicleId,

    /// Per lane: earliest time the next vehicle may leave (None = lamp off)
    next_discharge: Vec<Option<f64>>,

    /// Seconds between successive departures from a green lane
    discharge_interval: f64,

    /// Seconds from lamp ON to the first departure
    startup_delay: f64,

    spawned: u64,
    emergencies_spawned: u64,
    balked: u64,
}

impl Oracle {
    /// Creates an Oracle over `regions` with the given physics seed.
    pub fn new(physics_seed: u64, regions: Vec<Region>) -> Self {
        let slots = regions.iter().map(grid_slots).collect();
        let lanes = regions.len();
        Self {
            physics_rng: ChaCha8Rng::seed_from_u64(physics_seed),
            regions,
            slots,
            vehicles: BTreeMap::new(),
            occupied: HashSet::new(),
            next_id: 1,
            next_discharge: vec![None; lanes],
            discharge_interval: 2.0,
            startup_delay: 1.0,
            spawned: 0,
            emergencies_spawned: 0,
            balked: 0,
        }
    }

    /// Sets the per-lane discharge timing.
    pub fn set_discharge(&mut self, interval: f64, startup_delay: f64) {
        self.discharge_interval = interval;
        self.startup_delay = startup_delay;
    }

    pub fn lane_count(&self) -> usize {
        self.regions.len()
    }

    /// Slots a lane can hold.
    pub fn capacity(&self, lane: LaneId) -> usize {
        self.slots.get(lane).map(Vec::len).unwrap_or(0)
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn vehicles(&self) -> impl Iterator<Item = &SimVehicle> {
        self.vehicles.values()
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&SimVehicle> {
        self.vehicles.get(&id)
    }

    pub fn spawned(&self) -> u64 {
        self.spawned
    }

    pub fn emergencies_spawned(&self) -> u64 {
        self.emergencies_spawned
    }

    /// Arrivals turned away because their lane was full.
    pub fn balked(&self) -> u64 {
        self.balked
    }

    /// Place a vehicle in the first free slot of `lane`.
    ///
    /// Returns `None` (and counts a balk) when the lane is full.
    pub fn spawn_vehicle(&mut self, lane: LaneId, label: &str, now: f64) -> Option<VehicleId> {
        let slot = self
            .slots
            .get(lane)?
            .iter()
            .copied()
            .find(|s| !self.occupied.contains(s));
        let Some(slot) = slot else {
            self.balked += 1;
            return None;
        };

        let id = self.next_id;
        self.next_id += 1;
        self.occupied.insert(slot);

        let vehicle = SimVehicle {
            id,
            label: label.to_string(),
            home_lane: lane,
            position: slot_center(slot),
            spawned_at: now,
            slot,
        };
        if vehicle.is_emergency() {
            self.emergencies_spawned += 1;
        }
        self.spawned += 1;
        self.vehicles.insert(id, vehicle);
        Some(id)
    }

    /// Poisson arrivals of ordinary traffic; `rates` are vehicles/second per lane.
    pub fn spawn_arrivals(&mut self, rates: &[f64], dt: f64, now: f64) {
        for (lane, &rate) in rates.iter().enumerate().take(self.lane_count()) {
            if rate <= 0.0 {
                continue;
            }
            let p = 1.0 - (-rate * dt).exp();
            if self.physics_rng.gen::<f64>() < p {
                let label = self.civilian_label();
                self.spawn_vehicle(lane, label, now);
            }
        }
    }

    /// Random emergency arrivals across the junction at `rate` per second.
    pub fn spawn_random_emergency(&mut self, rate: f64, dt: f64, now: f64) {
        if rate <= 0.0 || self.lane_count() == 0 {
            return;
        }
        let p = 1.0 - (-rate * dt).exp();
        if self.physics_rng.gen::<f64>() < p {
            let lane = self.physics_rng.gen_range(0..self.lane_count());
            let label = EMERGENCY_LABELS[self.physics_rng.gen_range(0..EMERGENCY_LABELS.len())];
            self.spawn_vehicle(lane, label, now);
        }
    }

    fn civilian_label(&mut self) -> &'static str {
        let roll = self.physics_rng.gen::<f64>();
        if roll < 0.70 {
            "car"
        } else if roll < 0.85 {
            "truck"
        } else if roll < 0.95 {
            "bus"
        } else {
            "motorcycle"
        }
    }

    /// One detector frame for the current ground truth.
    pub fn detections(&mut self, noise: &DetectorNoise) -> Vec<RawDetection> {
        let jitter = Normal::new(0.0, noise.jitter_px.max(0.0)).ok();
        let Self { vehicles, physics_rng, .. } = self;
        let mut frame = Vec::with_capacity(vehicles.len());

        for vehicle in vehicles.values() {
            if noise.drop_prob > 0.0 && physics_rng.gen::<f64>() < noise.drop_prob {
                continue;
            }

            let (dx, dy) = match &jitter {
                Some(normal) => (normal.sample(physics_rng), normal.sample(physics_rng)),
                None => (0.0, 0.0),
            };
            let bbox = box_around(vehicle.position.x + dx, vehicle.position.y + dy);
            frame.push(RawDetection {
                id: Some(vehicle.id),
                label: Some(vehicle.label.clone()),
                bbox,
            });

            if noise.duplicate_prob > 0.0 && physics_rng.gen::<f64>() < noise.duplicate_prob {
                let sx = physics_rng.gen_range(-2.0..2.0);
                let sy = physics_rng.gen_range(-2.0..2.0);
                frame.push(RawDetection {
                    id: Some(vehicle.id + PHANTOM_ID_OFFSET),
                    label: Some(vehicle.label.clone()),
                    bbox: [bbox[0] + sx, bbox[1] + sy, bbox[2] + sx, bbox[3] + sy],
                });
            }

            if noise.malformed_prob > 0.0 && physics_rng.gen::<f64>() < noise.malformed_prob {
                frame.push(RawDetection {
                    id: None,
                    label: Some(vehicle.label.clone()),
                    bbox,
                });
            }
        }

        frame
    }

    /// Release vehicles through lanes whose lamp is ON.
    ///
    /// A green lane releases one vehicle per discharge interval, after a
    /// startup delay. Emergency vehicles go first, then arrival order. A
    /// vehicle inside two regions may leave through either.
    pub fn discharge(&mut self, lamps: &[LampState], now: f64) -> Vec<Served> {
        let mut served = Vec::new();

        for lane in 0..self.lane_count() {
            if lamps.get(lane) != Some(&LampState::On) {
                self.next_discharge[lane] = None;
                continue;
            }
            let next = *self.next_discharge[lane].get_or_insert(now + self.startup_delay);
            if now < next {
                continue;
            }

            let region = &self.regions[lane];
            let pick = self
                .vehicles
                .values()
                .filter(|v| region.contains(&v.position))
                .min_by(|a, b| {
                    b.is_emergency()
                        .cmp(&a.is_emergency())
                        .then(a.spawned_at.total_cmp(&b.spawned_at))
                        .then(a.id.cmp(&b.id))
                })
                .map(|v| v.id);

            if let Some(vehicle) = pick.and_then(|id| self.vehicles.remove(&id)) {
                self.occupied.remove(&vehicle.slot);
                self.next_discharge[lane] = Some(now + self.discharge_interval);
                served.push(Served { vehicle, lane, left_at: now });
            }
        }

        served
    }
}

fn slot_center((a, b): (i64, i64)) -> Point2<f64> {
    Point2::new(GRID_ORIGIN + a as f64 * GRID_STEP, GRID_ORIGIN + b as f64 * GRID_STEP)
}

fn box_around(cx: f64, cy: f64) -> [f64; 4] {
    let half = BOX_SIZE / 2.0;
    [cx - half, cy - half, cx + half, cy + half]
}

/// Grid points whose centre lies inside `region`, row by row.
fn grid_slots(region: &Region) -> Vec<(i64, i64)> {
    let corners = region.corners();
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for c in &corners {
        min_x = min_x.min(c.x);
        min_y = min_y.min(c.y);
        max_x = max_x.max(c.x);
        max_y = max_y.max(c.y);
    }

    let index_range = |lo: f64, hi: f64| {
        let first = ((lo - GRID_ORIGIN) / GRID_STEP).ceil() as i64;
        let last = ((hi - GRID_ORIGIN) / GRID_STEP).floor() as i64;
        first..=last
    };

    let mut slots = Vec::new();
    for b in index_range(min_y, max_y) {
        for a in index_range(min_x, max_x) {
            if region.contains(&slot_center((a, b))) {
                slots.push((a, b));
            }
        }
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanegate_core::{validate_frame, RegionStore};

    fn lamps(on: &[usize], lanes: usize) -> Vec<LampState> {
        (0..lanes)
            .map(|l| if on.contains(&l) { LampState::On } else { LampState::Off })
            .collect()
    }

    #[test]
    fn test_default_lane_has_sixteen_slots() {
        let oracle = Oracle::new(1, RegionStore::default_regions(4));
        for lane in 0..4 {
            assert_eq!(oracle.capacity(lane), 16);
        }
    }

    #[test]
    fn test_spawn_places_vehicle_inside_its_region() {
        let regions = RegionStore::default_regions(4);
        let mut oracle = Oracle::new(1, regions.clone());
        let id = oracle.spawn_vehicle(2, "car", 0.0).unwrap();
        let v = oracle.vehicle(id).unwrap();
        assert!(regions[2].contains(&v.position));
        assert!(!regions[1].contains(&v.position));
    }

    #[test]
    fn test_full_lane_balks() {
        let mut oracle = Oracle::new(1, RegionStore::default_regions(1));
        for _ in 0..16 {
            assert!(oracle.spawn_vehicle(0, "car", 0.0).is_some());
        }
        assert!(oracle.spawn_vehicle(0, "car", 0.0).is_none());
        assert_eq!(oracle.balked(), 1);
    }

    #[test]
    fn test_arrivals_deterministic_per_seed() {
        let run = |seed| {
            let mut oracle = Oracle::new(seed, RegionStore::default_regions(4));
            for tick in 0..300 {
                oracle.spawn_arrivals(&[0.5, 0.3, 0.2, 0.1], 1.0 / 30.0, tick as f64 / 30.0);
            }
            oracle.vehicles().map(|v| (v.id, v.home_lane, v.label.clone())).collect::<Vec<_>>()
        };
        assert_eq!(run(9), run(9));
        assert!(!run(9).is_empty());
    }

    #[test]
    fn test_discharge_needs_green_and_startup_delay() {
        let mut oracle = Oracle::new(1, RegionStore::default_regions(2));
        oracle.spawn_vehicle(0, "car", 0.0);

        assert!(oracle.discharge(&lamps(&[], 2), 0.0).is_empty());
        assert!(oracle.discharge(&lamps(&[0], 2), 1.0).is_empty());
        let served = oracle.discharge(&lamps(&[0], 2), 2.0);
        assert_eq!(served.len(), 1);
        assert_eq!(served[0].wait(), 2.0);
        assert_eq!(oracle.vehicle_count(), 0);
    }

    #[test]
    fn test_custom_discharge_timing() {
        let mut oracle = Oracle::new(1, RegionStore::default_regions(1));
        oracle.set_discharge(0.5, 0.0);
        oracle.spawn_vehicle(0, "car", 0.0);
        oracle.spawn_vehicle(0, "car", 0.0);

        assert_eq!(oracle.discharge(&lamps(&[0], 1), 0.0).len(), 1);
        assert!(oracle.discharge(&lamps(&[0], 1), 0.25).is_empty());
        assert_eq!(oracle.discharge(&lamps(&[0], 1), 0.5).len(), 1);
        assert_eq!(oracle.vehicle_count(), 0);
    }

    #[test]
    fn test_emergency_discharged_first() {
        let mut oracle = Oracle::new(1, RegionStore::default_regions(1));
        oracle.spawn_vehicle(0, "car", 0.0);
        oracle.spawn_vehicle(0, "bus", 1.0);
        let police = oracle.spawn_vehicle(0, "police car", 2.0).unwrap();
        assert_eq!(oracle.emergencies_spawned(), 1);

        oracle.discharge(&lamps(&[0], 1), 3.0);
        let served = oracle.discharge(&lamps(&[0], 1), 4.0);
        assert_eq!(served[0].vehicle.id, police);
        let served = oracle.discharge(&lamps(&[0], 1), 6.0);
        assert_eq!(served[0].vehicle.label, "car");
    }

    #[test]
    fn test_clean_detector_reports_every_vehicle() {
        let mut oracle = Oracle::new(1, RegionStore::default_regions(2));
        oracle.spawn_vehicle(0, "car", 0.0);
        oracle.spawn_vehicle(1, "truck", 0.0);
        let frame = validate_frame(oracle.detections(&DetectorNoise::default()));
        assert_eq!(frame.len(), 2);
        assert_eq!(frame[0].bbox.width(), BOX_SIZE);
    }

    #[test]
    fn test_noisy_detector_duplicates_and_malformed_rows() {
        let mut oracle = Oracle::new(3, RegionStore::default_regions(1));
        oracle.spawn_vehicle(0, "car", 0.0);
        let noise = DetectorNoise {
            jitter_px: 2.0,
            duplicate_prob: 1.0,
            drop_prob: 0.0,
            malformed_prob: 1.0,
        };
        let raw = oracle.detections(&noise);
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[1].id, Some(1 + PHANTOM_ID_OFFSET));
        assert_eq!(validate_frame(raw).len(), 2);
    }
}
