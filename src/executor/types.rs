use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calibration::types::{Offset, Point, DEFAULT_TASK_TYPE};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapRequest {
    pub task_type: String,
    /// Where the planner believes the target is.
    pub requested: Point,
    #[serde(default)]
    pub description: Option<String>,
}

impl TapRequest {
    pub fn click(requested: Point) -> Self {
        Self {
            task_type: DEFAULT_TASK_TYPE.to_string(),
            requested,
            description: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchedTap {
    pub action_id: Uuid,
    pub task_type: String,
    pub requested: Point,
    /// `requested` after calibration; the point actually sent to the device.
    pub dispatched: Point,
    pub attempt: u32,
}

/// Reflector output for one tap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectorVerdict {
    pub success: bool,
    /// `landed - target`, measured relative to the dispatched point.
    #[serde(default)]
    pub measured_offset: Option<Offset>,
    #[serde(default)]
    pub target_estimate: Option<Point>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapReport {
    pub action_id: Uuid,
    pub task_type: String,
    pub requested: Point,
    /// Point used on the final attempt.
    pub dispatched: Point,
    pub success: bool,
    pub attempts: u32,
    /// Set when the verdict could not be turned into accepted feedback.
    #[serde(default)]
    pub feedback_error: Option<String>,
}
