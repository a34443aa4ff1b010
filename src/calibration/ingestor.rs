// Feedback write path: validation, correction derivation, store merge, escalation.
use crate::calibration::store::{AdjustmentStore, MergeOutcome};
use crate::calibration::strategy::{StrategyOverride, StrategyTable};
use crate::calibration::types::{FeedbackRecord, Offset, Point};
use crate::config::{LearningConfig, ScreenBounds};
use crate::errors::{CalibrationError, CalibrationResult};

/// What one accepted feedback record changed.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub merge: MergeOutcome,
    pub escalated: Option<StrategyOverride>,
}

/// A record that passed validation, with its offsets resolved.
struct ValidFeedback {
    offset: Offset,
    /// What escalation judges: `observed_miss` when given, else `offset`.
    miss: Offset,
}

pub struct FeedbackIngestor {
    learning: LearningConfig,
    screen: Option<ScreenBounds>,
}

impl FeedbackIngestor {
    pub fn new(learning: LearningConfig, screen: Option<ScreenBounds>) -> Self {
        Self { learning, screen }
    }

    pub fn learning(&self) -> &LearningConfig {
        &self.learning
    }

    pub fn in_bounds(&self, point: Point) -> bool {
        match &self.screen {
            Some(screen) => screen.contains(point.x, point.y),
            None => point.x >= 0 && point.y >= 0,
        }
    }

    /// Validates and applies one record. Rejections leave all state untouched.
    pub fn ingest(
        &self,
        record: &FeedbackRecord,
        store: &AdjustmentStore,
        strategies: &StrategyTable,
    ) -> CalibrationResult<IngestReport> {
        let valid = self.validate(record)?;
        // the correction cancels the miss; max_step_px is applied inside the merge
        let delta = -valid.offset;
        let weight = if record.success {
            record.confidence.max(self.learning.success_confidence)
        } else {
            record.confidence
        };

        let merge = store.merge(record.requested_coords, delta, weight, &self.learning);
        tracing::debug!(
            task_type = %record.task_type,
            success = record.success,
            bucket = ?merge.key,
            kind = ?merge.kind,
            dx = merge.record.delta.dx,
            dy = merge.record.delta.dy,
            confidence = merge.record.confidence,
            samples = merge.record.sample_count,
            "feedback merged"
        );

        let escalated = if strategies.exceeds_threshold(valid.miss.max_component()) {
            let o = strategies.escalate(&record.task_type);
            tracing::info!(
                task_type = %record.task_type,
                dx = valid.miss.dx,
                dy = valid.miss.dy,
                timeout = ?o.timeout,
                retry_delay = ?o.retry_delay,
                "offset above escalation threshold; execution policy tightened"
            );
            Some(o)
        } else {
            None
        };

        Ok(IngestReport { merge, escalated })
    }

    fn validate(&self, record: &FeedbackRecord) -> CalibrationResult<ValidFeedback> {
        if !record.confidence.is_finite() || !(0.0..=1.0).contains(&record.confidence) {
            return Err(CalibrationError::InvalidFeedback(format!(
                "confidence {} is outside [0, 1]",
                record.confidence
            )));
        }
        if record.task_type.trim().is_empty() {
            return Err(CalibrationError::InvalidFeedback("task_type is empty".into()));
        }

        let p = record.requested_coords;
        if !self.in_bounds(p) {
            return Err(CalibrationError::OutOfRangeCoordinate { x: p.x, y: p.y });
        }
        if let Some(t) = record.target_estimate {
            if !self.in_bounds(t) {
                return Err(CalibrationError::OutOfRangeCoordinate { x: t.x, y: t.y });
            }
        }

        let offset = match record.effective_offset() {
            Some(offset) => offset,
            None if record.success => Offset::ZERO,
            None => {
                return Err(CalibrationError::InvalidFeedback(
                    "failed action carries no offset or target estimate".into(),
                ))
            }
        };
        let miss = record.observed_miss.unwrap_or(offset);
        if !offset.is_finite() || !miss.is_finite() {
            return Err(CalibrationError::InvalidFeedback("offset is not finite".into()));
        }

        Ok(ValidFeedback { offset, miss })
    }
}
