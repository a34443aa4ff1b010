use async_trait::async_trait;

use crate::calibration::strategy::ExecutionPolicy;
use crate::calibration::types::Point;
use crate::errors::CalibrationResult;
use crate::executor::types::{DispatchedTap, ReflectorVerdict};

/// Sends a tap to the device (ADB bridge, accessibility service, …).
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn tap(&self, point: Point, policy: &ExecutionPolicy) -> CalibrationResult<()>;
}

/// Judges a completed tap from before/after screenshots.
#[async_trait]
pub trait Reflector: Send + Sync {
    async fn reflect(&self, tap: &DispatchedTap) -> CalibrationResult<ReflectorVerdict>;
}
