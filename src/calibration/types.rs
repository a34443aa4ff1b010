use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TASK_TYPE: &str = "click_action";

/// Physical screen coordinate in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        self.offset_from(other).norm()
    }

    /// Adds a fractional offset and rounds to the nearest pixel.
    pub fn offset_by(&self, delta: Offset) -> Point {
        Point {
            x: (self.x as f64 + delta.dx).round() as i32,
            y: (self.y as f64 + delta.dy).round() as i32,
        }
    }

    /// `self - other` as an offset. Computed in f64, so any pair of points is valid.
    pub fn offset_from(&self, other: &Point) -> Offset {
        Offset::new(
            f64::from(self.x) - f64::from(other.x),
            f64::from(self.y) - f64::from(other.y),
        )
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

/// Signed pixel displacement.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Offset {
    pub dx: f64,
    pub dy: f64,
}

impl Offset {
    pub const ZERO: Offset = Offset { dx: 0.0, dy: 0.0 };

    pub const fn new(dx: f64, dy: f64) -> Self {
        Self { dx, dy }
    }

    pub fn dot(&self, other: &Offset) -> f64 {
        self.dx * other.dx + self.dy * other.dy
    }

    pub fn norm(&self) -> f64 {
        self.dx.hypot(self.dy)
    }

    pub fn scale(&self, factor: f64) -> Offset {
        Offset::new(self.dx * factor, self.dy * factor)
    }

    pub fn is_finite(&self) -> bool {
        self.dx.is_finite() && self.dy.is_finite()
    }

    /// Clamps each component independently to `[-limit, limit]`.
    pub fn clamp_components(&self, limit: f64) -> Offset {
        Offset::new(self.dx.clamp(-limit, limit), self.dy.clamp(-limit, limit))
    }

    pub fn max_component(&self) -> f64 {
        self.dx.abs().max(self.dy.abs())
    }
}

impl std::ops::Neg for Offset {
    type Output = Offset;

    fn neg(self) -> Offset {
        Offset::new(-self.dx, -self.dy)
    }
}

impl From<(f64, f64)> for Offset {
    fn from((dx, dy): (f64, f64)) -> Self {
        Self { dx, dy }
    }
}

/// Grid cell identifying an adjustment: `(floor(x / cell), floor(y / cell))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    pub col: i32,
    pub row: i32,
}

impl BucketKey {
    pub fn for_point(point: Point, cell_size: u32) -> Self {
        let cell = cell_size.max(1) as i32;
        Self {
            col: point.x.div_euclid(cell),
            row: point.y.div_euclid(cell),
        }
    }
}

/// A learned correction anchored at the first coordinate observed in its bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    anchor: Point,
    pub delta: Offset,
    pub confidence: f64,
    pub sample_count: u32,
    pub last_updated: DateTime<Utc>,
}

impl AdjustmentRecord {
    pub fn new(anchor: Point, delta: Offset, confidence: f64) -> Self {
        Self {
            anchor,
            delta,
            confidence,
            sample_count: 1,
            last_updated: Utc::now(),
        }
    }

    pub fn anchor(&self) -> Point {
        self.anchor
    }
}

/// One reflector judgment about a completed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    #[serde(default = "default_task_type")]
    pub task_type: String,
    /// Coordinate the correction is keyed on; `offset` is measured relative to it.
    pub requested_coords: Point,
    #[serde(default)]
    pub target_estimate: Option<Point>,
    /// `clicked - true_target`. Required when `success` is false unless
    /// `target_estimate` is given.
    #[serde(default)]
    pub offset: Option<Offset>,
    /// Miss of the tap as it was dispatched, when a correction was already
    /// applied and `offset` is therefore larger. Escalation judges this value
    /// when present.
    #[serde(default)]
    pub observed_miss: Option<Offset>,
    pub success: bool,
    pub confidence: f64,
}

fn default_task_type() -> String {
    DEFAULT_TASK_TYPE.to_string()
}

impl FeedbackRecord {
    pub fn failure(task_type: impl Into<String>, requested: Point, offset: Offset, confidence: f64) -> Self {
        Self {
            task_type: task_type.into(),
            requested_coords: requested,
            target_estimate: None,
            offset: Some(offset),
            observed_miss: None,
            success: false,
            confidence,
        }
    }

    pub fn success(task_type: impl Into<String>, requested: Point, offset: Option<Offset>, confidence: f64) -> Self {
        Self {
            task_type: task_type.into(),
            requested_coords: requested,
            target_estimate: None,
            offset,
            observed_miss: None,
            success: true,
            confidence,
        }
    }

    /// Builds a record from a known target, judging success by a per-axis tolerance.
    pub fn from_target(
        task_type: impl Into<String>,
        clicked: Point,
        target: Point,
        tolerance_px: f64,
        confidence: f64,
    ) -> Self {
        let offset = clicked.offset_from(&target);
        Self {
            task_type: task_type.into(),
            requested_coords: clicked,
            target_estimate: Some(target),
            offset: Some(offset),
            observed_miss: None,
            success: offset.max_component() <= tolerance_px,
            confidence,
        }
    }

    /// The measured miss: explicit offset first, then one derived from the target estimate.
    pub fn effective_offset(&self) -> Option<Offset> {
        self.offset.or_else(|| {
            self.target_estimate
                .map(|target| self.requested_coords.offset_from(&target))
        })
    }
}
