//! Lane regions - oriented rectangles over the camera frame.
//!
//! A region is stored as its unrotated rectangle `(x, y, w, h)` plus a
//! rotation `angle` in degrees about the rectangle centre. Corners are
//! derived on every call, so no cached geometry survives an edit.

use nalgebra::{Point2, Rotation2, Vector2};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Grab radius around the top-right corner for the rotate handle (px)
pub const ROTATE_HANDLE_RADIUS: f64 = 10.0;

/// Grab radius around the bottom-right corner for the resize handle (px)
pub const RESIZE_HANDLE_RADIUS: f64 = 15.0;

// ============================================================================
// REGION
// ============================================================================

/// One lane's queue area.
///
/// Geometry is only reachable through the editing methods, which refuse
/// every change while the region is locked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    x: f64,
    y: f64,
    w: f64,
    h: f64,

    /// Rotation about the centre, in degrees
    #[serde(default)]
    angle: f64,

    /// Locked regions reject every edit
    #[serde(skip)]
    locked: bool,
}

// Lock state belongs to the editor session, not the geometry.
impl PartialEq for Region {
    fn eq(&self, other: &Self) -> bool {
        self.x == other.x
            && self.y == other.y
            && self.w == other.w
            && self.h == other.h
            && self.angle == other.angle
    }
}

/// Which part of a region an editor grabbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionHandle {
    Rotate,
    Resize,
    Move,
}

impl Region {
    pub fn new(x: f64, y: f64, w: f64, h: f64, angle: f64) -> Self {
        Self { x, y, w, h, angle, locked: false }
    }

    /// Axis-aligned region.
    pub fn axis_aligned(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self::new(x, y, w, h, 0.0)
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn w(&self) -> f64 {
        self.w
    }

    pub fn h(&self) -> f64 {
        self.h
    }

    /// Rotation in degrees, `[0, 360)` after `rotate_towards`.
    pub fn angle(&self) -> f64 {
        self.angle
    }

    /// Centre of the rectangle (rotation invariant).
    pub fn center(&self) -> Point2<f64> {
        Point2::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// The four corners in order top-left, top-right, bottom-right,
    /// bottom-left (before rotation), each rotated about the centre.
    pub fn corners(&self) -> [Point2<f64>; 4] {
        let center = self.center();
        let rotation = Rotation2::new(self.angle.to_radians());
        let unrotated = [
            Point2::new(self.x, self.y),
            Point2::new(self.x + self.w, self.y),
            Point2::new(self.x + self.w, self.y + self.h),
            Point2::new(self.x, self.y + self.h),
        ];
        unrotated.map(|p| center + rotation * (p - center))
    }

    /// Even-odd ray casting over the rotated corners.
    ///
    /// Casts a ray towards +x and counts edge crossings; an edge counts when
    /// the point's y lies in its half-open y-span. Zero-area regions never
    /// contain anything.
    pub fn contains(&self, point: &Point2<f64>) -> bool {
        let corners = self.corners();
        let mut crossings = 0;

        for i in 0..corners.len() {
            let a = corners[i];
            let b = corners[(i + 1) % corners.len()];

            if (a.y > point.y) != (b.y > point.y) {
                let x_intersect = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
                if point.x < x_intersect {
                    crossings += 1;
                }
            }
        }

        crossings % 2 == 1
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    /// Toggle the lock; returns the new state.
    pub fn toggle_lock(&mut self) -> bool {
        self.locked = !self.locked;
        self.locked
    }

    // ========================================================================
    // EDITING
    // ========================================================================

    /// Shift the region by `delta`. Returns false if locked.
    pub fn translate(&mut self, delta: Vector2<f64>) -> bool {
        if self.locked {
            return false;
        }
        self.x += delta.x;
        self.y += delta.y;
        true
    }

    /// Set width and height, keeping the top-left origin. Negative sizes
    /// clamp to zero. Returns false if locked.
    pub fn resize(&mut self, w: f64, h: f64) -> bool {
        if self.locked {
            return false;
        }
        self.w = w.max(0.0);
        self.h = h.max(0.0);
        true
    }

    /// Rotate so the top-right corner points towards `target`.
    /// Returns false if locked.
    pub fn rotate_towards(&mut self, target: &Point2<f64>) -> bool {
        if self.locked {
            return false;
        }
        let center = self.center();
        let rest = Vector2::new(self.w / 2.0, -self.h / 2.0);
        let wanted = target - center;
        if wanted.norm() == 0.0 || rest.norm() == 0.0 {
            return true;
        }
        let delta = wanted.y.atan2(wanted.x) - rest.y.atan2(rest.x);
        self.angle = delta.to_degrees().rem_euclid(360.0);
        true
    }

    /// Which handle (if any) sits under `point`.
    ///
    /// Locked regions only report `Move` so they can still be selected.
    pub fn hit_test(&self, point: &Point2<f64>) -> Option<RegionHandle> {
        let corners = self.corners();
        if !self.locked {
            if (point - corners[1]).norm() < ROTATE_HANDLE_RADIUS {
                return Some(RegionHandle::Rotate);
            }
            if (point - corners[2]).norm() < RESIZE_HANDLE_RADIUS {
                return Some(RegionHandle::Resize);
            }
        }
        if self.contains(point) {
            return Some(RegionHandle::Move);
        }
        None
    }
}

/// Topmost region under `point`, searching last-drawn first.
pub fn pick_region(regions: &[Region], point: &Point2<f64>) -> Option<(usize, RegionHandle)> {
    regions
        .iter()
        .enumerate()
        .rev()
        .find_map(|(idx, r)| r.hit_test(point).map(|handle| (idx, handle)))
}

// ============================================================================
// PERSISTENCE
// ============================================================================

/// Loads and saves lane regions as a JSON array of `{x, y, w, h, angle}`.
pub struct RegionStore;

impl RegionStore {
    /// The factory layout: `lane_count` 200×200 squares in a row.
    pub fn default_regions(lane_count: usize) -> Vec<Region> {
        (0..lane_count)
            .map(|i| Region::axis_aligned(50.0 + i as f64 * 250.0, 50.0, 200.0, 200.0))
            .collect()
    }

    /// Load regions from `path`, or the factory layout if the file is absent.
    pub fn load(path: impl AsRef<Path>, lane_count: usize) -> Result<Vec<Region>, StoreError> {
        let path = path.as_ref();
        if !path.is_file() {
            info!("No region config at {}; using default layout", path.display());
            return Ok(Self::default_regions(lane_count));
        }
        let text = std::fs::read_to_string(path)?;
        let regions: Vec<Region> = serde_json::from_str(&text)?;
        debug!("Loaded {} regions from {}", regions.len(), path.display());
        Ok(regions)
    }

    /// Write regions to `path` via a sibling temp file and rename.
    pub fn save(path: impl AsRef<Path>, regions: &[Region]) -> Result<(), StoreError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(regions)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        info!("Saved {} regions to {}", regions.len(), path.display());
        Ok(())
    }
}

/// Errors from region persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Region store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Region store format error: {0}")]
    Format(#[from] serde_json::Error),
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_axis_aligned_corners() {
        let r = Region::axis_aligned(10.0, 20.0, 100.0, 50.0);
        let c = r.corners();
        assert_eq!(c[0], Point2::new(10.0, 20.0));
        assert_eq!(c[1], Point2::new(110.0, 20.0));
        assert_eq!(c[2], Point2::new(110.0, 70.0));
        assert_eq!(c[3], Point2::new(10.0, 70.0));
    }

    #[test]
    fn test_rotated_corners_about_center() {
        // 90° turns a 100x20 bar into a 20x100 bar around (50, 10)
        let r = Region::new(0.0, 0.0, 100.0, 20.0, 90.0);
        let c = r.corners();
        assert_relative_eq!(c[0].x, 60.0, epsilon = 1e-9);
        assert_relative_eq!(c[0].y, -40.0, epsilon = 1e-9);
        assert_relative_eq!(c[2].x, 40.0, epsilon = 1e-9);
        assert_relative_eq!(c[2].y, 60.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rotated_contains() {
        let r = Region::new(0.0, 0.0, 100.0, 20.0, 90.0);
        // Inside the rotated bar, outside the original one
        assert!(r.contains(&Point2::new(50.0, 50.0)));
        // Inside the original bar, outside the rotated one
        assert!(!r.contains(&Point2::new(5.0, 10.0)));
    }

    #[test]
    fn test_corners_track_mutation() {
        let mut r = Region::axis_aligned(0.0, 0.0, 10.0, 10.0);
        assert!(!r.contains(&Point2::new(15.0, 5.0)));
        assert!(r.resize(20.0, 10.0));
        assert!(r.contains(&Point2::new(15.0, 5.0)));
    }

    #[test]
    fn test_zero_area_contains_nothing() {
        let flat = Region::axis_aligned(0.0, 0.0, 100.0, 0.0);
        assert!(!flat.contains(&Point2::new(50.0, 0.0)));

        let thin = Region::new(0.0, 0.0, 0.0, 100.0, 30.0);
        assert!(!thin.contains(&Point2::new(-10.0, 50.0)));
        assert!(!thin.contains(&Point2::new(10.0, 50.0)));
    }

    #[test]
    fn test_locked_region_rejects_edits() {
        let mut r = Region::axis_aligned(0.0, 0.0, 10.0, 10.0);
        r.lock();
        assert!(!r.translate(Vector2::new(5.0, 5.0)));
        assert!(!r.resize(50.0, 50.0));
        assert!(!r.rotate_towards(&Point2::new(100.0, 100.0)));
        assert_eq!(r, Region::axis_aligned(0.0, 0.0, 10.0, 10.0));

        assert!(!r.toggle_lock());
        assert!(r.translate(Vector2::new(5.0, 5.0)));
        assert_eq!(r.x(), 5.0);
    }

    #[test]
    fn test_equality_ignores_lock() {
        let mut locked = Region::new(1.0, 2.0, 3.0, 4.0, 5.0);
        locked.lock();
        assert_eq!(locked, Region::new(1.0, 2.0, 3.0, 4.0, 5.0));
        assert_ne!(locked, Region::new(1.0, 2.0, 3.0, 4.0, 6.0));
    }

    #[test]
    fn test_rotate_towards_top_right_is_identity() {
        let mut r = Region::axis_aligned(0.0, 0.0, 100.0, 100.0);
        assert!(r.rotate_towards(&Point2::new(100.0, 0.0)));
        assert_relative_eq!(r.angle(), 0.0, epsilon = 1e-9);

        // Bottom-right → quarter turn
        assert!(r.rotate_towards(&Point2::new(100.0, 100.0)));
        assert_relative_eq!(r.angle(), 90.0, epsilon = 1e-9);
    }

    #[test]
    fn test_hit_test_handles() {
        let r = Region::axis_aligned(0.0, 0.0, 100.0, 100.0);
        assert_eq!(r.hit_test(&Point2::new(98.0, 2.0)), Some(RegionHandle::Rotate));
        assert_eq!(r.hit_test(&Point2::new(90.0, 90.0)), Some(RegionHandle::Resize));
        assert_eq!(r.hit_test(&Point2::new(50.0, 50.0)), Some(RegionHandle::Move));
        assert_eq!(r.hit_test(&Point2::new(500.0, 500.0)), None);
    }

    #[test]
    fn test_pick_region_prefers_topmost() {
        let regions = vec![
            Region::axis_aligned(0.0, 0.0, 100.0, 100.0),
            Region::axis_aligned(50.0, 50.0, 100.0, 100.0),
        ];
        let (idx, handle) = pick_region(&regions, &Point2::new(75.0, 75.0)).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(handle, RegionHandle::Move);
    }

    #[test]
    fn test_store_roundtrip_drops_lock() {
        let path = std::env::temp_dir().join(format!("lanegate-regions-{}.json", uuid::Uuid::new_v4()));
        let mut regions = vec![
            Region::axis_aligned(0.0, 0.0, 10.0, 10.0),
            Region::new(50.0, 50.0, 200.0, 200.0, 15.0),
        ];
        regions[1].lock();

        RegionStore::save(&path, &regions).unwrap();
        let loaded = RegionStore::load(&path, 4).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].angle(), 15.0);
        assert!(!loaded[1].is_locked());
    }

    #[test]
    fn test_store_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join(format!("lanegate-none-{}.json", uuid::Uuid::new_v4()));
        let regions = RegionStore::load(&path, 4).unwrap();
        assert_eq!(regions.len(), 4);
        assert_eq!(regions[3].x(), 800.0);
    }

    #[test]
    fn test_store_accepts_missing_angle() {
        let path = std::env::temp_dir().join(format!("lanegate-legacy-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"[{"x": 1, "y": 2, "w": 3, "h": 4}]"#).unwrap();
        let regions = RegionStore::load(&path, 4).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(regions, vec![Region::axis_aligned(1.0, 2.0, 3.0, 4.0)]);
    }

    proptest! {
        // Integer coordinates keep the rotation arithmetic exact, so the
        // half-open boundary behaviour can be compared directly.
        #[test]
        fn prop_unrotated_contains_matches_aabb(
            x in -500i32..500, y in -500i32..500,
            w in 0i32..300, h in 0i32..300,
            px in -600i32..900, py in -600i32..900,
        ) {
            let r = Region::axis_aligned(x as f64, y as f64, w as f64, h as f64);
            let (px, py) = (px as f64, py as f64);
            let in_box = px >= r.x() && px < r.x() + r.w() && py >= r.y() && py < r.y() + r.h();
            prop_assert_eq!(r.contains(&Point2::new(px, py)), in_box);
        }

        #[test]
        fn prop_center_contained_for_any_angle(
            x in -500.0f64..500.0, y in -500.0f64..500.0,
            w in 1.0f64..300.0, h in 1.0f64..300.0,
            angle in 0.0f64..360.0,
        ) {
            let r = Region::new(x, y, w, h, angle);
            prop_assert!(r.contains(&r.center()));
        }
    }
}
