use std::collections::hash_map::{Entry, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::calibration::ingestor::{FeedbackIngestor, IngestReport};
use crate::calibration::matcher::{MatchSource, RegionMatch, RegionMatcher};
use crate::calibration::snapshot::{EngineSnapshot, SnapshotAdjustment, SNAPSHOT_VERSION};
use crate::calibration::store::AdjustmentStore;
use crate::calibration::strategy::{ExecutionPolicy, StrategyOverride, StrategyTable};
use crate::calibration::types::{FeedbackRecord, Point};
use crate::config::CalibrationConfig;
use crate::errors::{CalibrationError, CalibrationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationSummary {
    pub adjustment_count: usize,
    pub strategy_override_count: usize,
    pub total_feedback_processed: u64,
    pub rejected_feedback: u64,
}

/// Learned calibration state for one agent session.
///
/// Constructed at agent start and shared behind an `Arc`; every method takes
/// `&self`. The only mutation path is [`CalibrationEngine::ingest`] (plus the
/// explicit strategy resets and [`CalibrationEngine::restore`]).
pub struct CalibrationEngine {
    config: CalibrationConfig,
    store: AdjustmentStore,
    matcher: RegionMatcher,
    strategies: StrategyTable,
    ingestor: FeedbackIngestor,
    processed: AtomicU64,
    rejected: AtomicU64,
}

impl CalibrationEngine {
    pub fn new(config: CalibrationConfig) -> CalibrationResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    pub fn with_defaults() -> Self {
        Self::build(CalibrationConfig::default())
    }

    fn build(config: CalibrationConfig) -> Self {
        Self {
            store: AdjustmentStore::new(config.matcher.cell_size),
            matcher: RegionMatcher::new(config.matcher.clone()),
            strategies: StrategyTable::new(config.strategy.clone()),
            ingestor: FeedbackIngestor::new(config.learning.clone(), config.screen),
            processed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Resolves the correction for `requested`. Off-screen queries get none.
    pub fn lookup(&self, requested: Point) -> RegionMatch {
        if !self.ingestor.in_bounds(requested) {
            tracing::debug!(x = requested.x, y = requested.y, "lookup outside screen bounds; no adjustment");
            return RegionMatch::none();
        }
        self.matcher.lookup(&self.store, requested)
    }

    /// `requested + scaled_delta`, rounded, and kept on screen when bounds are known.
    pub fn apply(&self, requested: Point, matched: &RegionMatch) -> Point {
        if matched.source == MatchSource::None {
            return requested;
        }
        let adjusted = requested.offset_by(matched.scaled_delta);
        match &self.config.screen {
            Some(screen) => Point::new(
                adjusted.x.clamp(0, screen.max_x()),
                adjusted.y.clamp(0, screen.max_y()),
            ),
            None => Point::new(adjusted.x.max(0), adjusted.y.max(0)),
        }
    }

    pub fn lookup_and_apply(&self, requested: Point) -> Point {
        let matched = self.lookup(requested);
        let adjusted = self.apply(requested, &matched);
        if adjusted != requested {
            tracing::debug!(
                from_x = requested.x,
                from_y = requested.y,
                to_x = adjusted.x,
                to_y = adjusted.y,
                source = ?matched.source,
                weight = matched.weight,
                "calibrated coordinates"
            );
        }
        adjusted
    }

    pub fn ingest(&self, record: &FeedbackRecord) -> CalibrationResult<IngestReport> {
        match self.ingestor.ingest(record, &self.store, &self.strategies) {
            Ok(report) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                Ok(report)
            }
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %e,
                    task_type = %record.task_type,
                    x = record.requested_coords.x,
                    y = record.requested_coords.y,
                    "feedback rejected"
                );
                Err(e)
            }
        }
    }

    pub fn policy_for(&self, task_type: &str) -> ExecutionPolicy {
        self.strategies.policy_for(task_type)
    }

    pub fn strategy(&self, task_type: &str) -> Option<StrategyOverride> {
        self.strategies.get(task_type)
    }

    pub fn reset_strategy(&self, task_type: &str) -> Option<StrategyOverride> {
        let removed = self.strategies.reset(task_type);
        if removed.is_some() {
            tracing::info!(task_type, "strategy override reset");
        }
        removed
    }

    pub fn reset_all_strategies(&self) {
        self.strategies.reset_all();
        tracing::info!("all strategy overrides reset");
    }

    pub fn summary(&self) -> CalibrationSummary {
        CalibrationSummary {
            adjustment_count: self.store.len(),
            strategy_override_count: self.strategies.len(),
            total_feedback_processed: self.processed.load(Ordering::Relaxed),
            rejected_feedback: self.rejected.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let mut adjustments: Vec<SnapshotAdjustment> = self
            .store
            .entries()
            .into_iter()
            .map(|(bucket, record)| SnapshotAdjustment { bucket, record })
            .collect();
        adjustments.sort_by_key(|a| a.bucket);
        let mut strategies = self.strategies.entries();
        strategies.sort_by(|a, b| a.task_type.cmp(&b.task_type));

        EngineSnapshot {
            version: SNAPSHOT_VERSION,
            taken_at: chrono::Utc::now(),
            cell_size: self.store.cell_size(),
            adjustments,
            strategies,
            total_feedback_processed: self.processed.load(Ordering::Relaxed),
            rejected_feedback: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Replaces all learned state. Records from a snapshot taken with a
    /// different cell size are re-bucketed by anchor; on collision the record
    /// with more samples wins.
    pub fn restore(&self, snapshot: EngineSnapshot) -> CalibrationResult<()> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(CalibrationError::Snapshot(format!(
                "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                snapshot.version
            )));
        }
        let floor = self.config.learning.confidence_floor;
        let mut rekeyed = HashMap::new();
        for SnapshotAdjustment { mut record, .. } in snapshot.adjustments {
            if !record.delta.is_finite() || !record.confidence.is_finite() {
                return Err(CalibrationError::Snapshot("non-finite adjustment in snapshot".into()));
            }
            record.confidence = record.confidence.clamp(floor, 1.0);
            let key = self.store.bucket_for(record.anchor());
            match rekeyed.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
                Entry::Occupied(mut slot) => {
                    if record.sample_count > slot.get().sample_count {
                        slot.insert(record);
                    }
                }
            }
        }

        let restored = rekeyed.len();
        let rebucketed = snapshot.cell_size != self.store.cell_size();
        self.store.replace_all(rekeyed);
        self.strategies.replace_all(snapshot.strategies);
        self.processed.store(snapshot.total_feedback_processed, Ordering::Relaxed);
        self.rejected.store(snapshot.rejected_feedback, Ordering::Relaxed);
        tracing::info!(
            adjustments = restored,
            strategies = self.strategies.len(),
            rebucketed,
            "calibration state restored"
        );
        Ok(())
    }
}

impl Default for CalibrationEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::types::Offset;
    use crate::config::ScreenBounds;

    #[test]
    fn fresh_engine_is_identity() {
        let engine = CalibrationEngine::with_defaults();
        for p in [Point::new(0, 0), Point::new(540, 960), Point::new(1079, 1919)] {
            assert_eq!(engine.lookup_and_apply(p), p);
        }
        assert_eq!(engine.summary().adjustment_count, 0);
    }

    #[test]
    fn invalid_config_is_refused() {
        let mut cfg = CalibrationConfig::default();
        cfg.matcher.search_radius_cells = 0;
        assert!(CalibrationEngine::new(cfg).is_err());
    }

    #[test]
    fn failed_click_moves_next_tap_toward_target() {
        let engine = CalibrationEngine::with_defaults();
        engine
            .ingest(&FeedbackRecord::failure("click_action", Point::new(440, 590), Offset::new(-10.0, -15.0), 1.0))
            .unwrap();
        assert_eq!(engine.lookup_and_apply(Point::new(440, 590)), Point::new(450, 605));
    }

    #[test]
    fn summary_counts_accepted_and_rejected() {
        let engine = CalibrationEngine::with_defaults();
        engine
            .ingest(&FeedbackRecord::failure("click_action", Point::new(10, 10), Offset::new(1.0, 1.0), 0.5))
            .unwrap();
        let bad = FeedbackRecord {
            offset: None,
            ..FeedbackRecord::failure("click_action", Point::new(10, 10), Offset::ZERO, 0.5)
        };
        assert!(engine.ingest(&bad).is_err());
        let summary = engine.summary();
        assert_eq!(summary.total_feedback_processed, 1);
        assert_eq!(summary.rejected_feedback, 1);
        assert_eq!(summary.adjustment_count, 1);
    }

    #[test]
    fn off_screen_lookup_is_untouched() {
        let mut cfg = CalibrationConfig::default();
        cfg.screen = Some(ScreenBounds { width: 100, height: 100 });
        let engine = CalibrationEngine::new(cfg).unwrap();
        engine
            .ingest(&FeedbackRecord::failure("click_action", Point::new(95, 95), Offset::new(-10.0, -10.0), 1.0))
            .unwrap();
        assert_eq!(engine.lookup_and_apply(Point::new(150, 95)), Point::new(150, 95));
        // on-screen result is clamped to the last pixel
        assert_eq!(engine.lookup_and_apply(Point::new(95, 95)), Point::new(99, 99));
    }

    #[test]
    fn oversized_screen_is_refused() {
        let mut cfg = CalibrationConfig::default();
        cfg.screen = Some(ScreenBounds { width: 3_000_000_000, height: 1920 });
        assert!(CalibrationEngine::new(cfg).is_err());
    }

    #[test]
    fn extreme_target_estimate_is_counted_as_rejected() {
        let engine = CalibrationEngine::with_defaults();
        let record = FeedbackRecord {
            target_estimate: Some(Point::new(i32::MIN, 10)),
            offset: None,
            ..FeedbackRecord::failure("click_action", Point::new(10, 10), Offset::ZERO, 0.8)
        };
        let err = engine.ingest(&record).unwrap_err();
        assert!(matches!(err, CalibrationError::OutOfRangeCoordinate { .. }));
        assert_eq!(engine.summary().rejected_feedback, 1);
        assert_eq!(engine.lookup_and_apply(Point::new(10, 10)), Point::new(10, 10));
    }

    #[test]
    fn reset_strategy_is_the_only_way_back() {
        let engine = CalibrationEngine::with_defaults();
        engine
            .ingest(&FeedbackRecord::failure("click_action", Point::new(300, 300), Offset::new(45.0, 0.0), 0.9))
            .unwrap();
        engine
            .ingest(&FeedbackRecord::success("click_action", Point::new(300, 300), Some(Offset::new(1.0, 0.0)), 0.9))
            .unwrap();
        assert!(engine.policy_for("click_action").verification_required);
        assert!(engine.reset_strategy("click_action").is_some());
        assert!(!engine.policy_for("click_action").verification_required);
    }

    #[test]
    fn snapshot_restore_preserves_lookups() {
        let engine = CalibrationEngine::with_defaults();
        engine
            .ingest(&FeedbackRecord::failure("click_action", Point::new(200, 200), Offset::new(-8.0, 4.0), 0.8))
            .unwrap();
        engine
            .ingest(&FeedbackRecord::failure("click_action", Point::new(600, 900), Offset::new(40.0, 0.0), 0.8))
            .unwrap();
        let snapshot = engine.snapshot();

        let fresh = CalibrationEngine::with_defaults();
        fresh.restore(snapshot).unwrap();
        assert_eq!(fresh.summary(), engine.summary());
        assert_eq!(
            fresh.lookup_and_apply(Point::new(205, 203)),
            engine.lookup_and_apply(Point::new(205, 203))
        );
        assert!(fresh.policy_for("click_action").verification_required);
    }

    #[test]
    fn restore_rebuckets_on_cell_size_change() {
        let engine = CalibrationEngine::with_defaults();
        engine
            .ingest(&FeedbackRecord::failure("click_action", Point::new(100, 100), Offset::new(-5.0, 0.0), 0.5))
            .unwrap();
        engine
            .ingest(&FeedbackRecord::failure("click_action", Point::new(120, 100), Offset::new(-5.0, 0.0), 0.5))
            .unwrap();
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.adjustments.len(), 2);

        let mut cfg = CalibrationConfig::default();
        cfg.matcher.cell_size = 64;
        let coarse = CalibrationEngine::new(cfg).unwrap();
        coarse.restore(snapshot).unwrap();
        assert_eq!(coarse.summary().adjustment_count, 1);
    }

    #[test]
    fn restore_rejects_unknown_version() {
        let engine = CalibrationEngine::with_defaults();
        let mut snapshot = engine.snapshot();
        snapshot.version = 99;
        assert!(matches!(engine.restore(snapshot), Err(CalibrationError::Snapshot(_))));
    }
}
