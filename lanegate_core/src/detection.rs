//! Per-frame detections and same-class duplicate suppression.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Stable per-object key supplied by the external tracker.
pub type VehicleId = u64;

/// Axis-aligned box in pixel coordinates `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box from `[x1, y1, x2, y2]`.
    pub fn from_xyxy(xyxy: [f64; 4]) -> Self {
        Self::new(xyxy[0], xyxy[1], xyxy[2], xyxy[3])
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    #[inline]
    pub fn centroid(&self) -> Point2<f64> {
        Point2::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Intersection over union. Zero when the union has no area.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;

        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// A validated detection for the current cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: VehicleId,
    pub label: String,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(id: VehicleId, label: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            id,
            label: label.into(),
            bbox,
        }
    }

    #[inline]
    pub fn centroid(&self) -> Point2<f64> {
        self.bbox.centroid()
    }
}

/// Detection as it arrives from the tracker, before validation.
///
/// Untracked boxes come without an identity and some models emit boxes
/// without a class; both are dropped before they reach the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub id: Option<VehicleId>,

    #[serde(default)]
    pub label: Option<String>,

    /// `[x1, y1, x2, y2]`
    pub bbox: [f64; 4],
}

impl RawDetection {
    /// The validated detection, or `None` if identity or class is missing
    /// or the box is not finite.
    pub fn validate(self) -> Option<Detection> {
        let id = self.id?;
        let label = self.label.filter(|l| !l.is_empty())?;
        if !self.bbox.iter().all(|v| v.is_finite()) {
            return None;
        }
        Some(Detection::new(id, label, BoundingBox::from_xyxy(self.bbox)))
    }
}

/// Validate a raw frame, silently dropping malformed entries.
pub fn validate_frame(raw: Vec<RawDetection>) -> Vec<Detection> {
    raw.into_iter().filter_map(RawDetection::validate).collect()
}

/// Drop same-class detections overlapping an earlier accepted one.
///
/// Single pass, first-seen wins, accepted order is input order. Quadratic
/// in the frame's detection count.
pub fn deduplicate(detections: Vec<Detection>, iou_threshold: f64) -> Vec<Detection> {
    let mut accepted: Vec<Detection> = Vec::with_capacity(detections.len());

    for det in detections {
        let duplicate = accepted
            .iter()
            .any(|kept| kept.label == det.label && kept.bbox.iou(&det.bbox) > iou_threshold);
        if !duplicate {
            accepted.push(det);
        }
    }

    accepted
}
