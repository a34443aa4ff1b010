/// Quantized storage of learned coordinate corrections.
///
/// Each grid cell holds at most one `AdjustmentRecord`. Writes to a cell go
/// through the map's entry lock, so merges on the same bucket serialize while
/// merges on other buckets proceed independently. Reads clone the record out
/// under a shard read lock and never observe a half-applied merge.
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::calibration::types::{AdjustmentRecord, BucketKey, Offset, Point};
use crate::config::LearningConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    Inserted,
    Corroborated,
    Conflicted,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub kind: MergeKind,
    pub key: BucketKey,
    pub record: AdjustmentRecord,
}

pub struct AdjustmentStore {
    cell_size: u32,
    records: DashMap<BucketKey, AdjustmentRecord>,
}

impl AdjustmentStore {
    pub fn new(cell_size: u32) -> Self {
        Self {
            cell_size: cell_size.max(1),
            records: DashMap::new(),
        }
    }

    pub fn cell_size(&self) -> u32 {
        self.cell_size
    }

    pub fn bucket_for(&self, point: Point) -> BucketKey {
        BucketKey::for_point(point, self.cell_size)
    }

    pub fn get(&self, key: &BucketKey) -> Option<AdjustmentRecord> {
        self.records.get(key).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Folds one observation into the bucket containing `anchor`.
    ///
    /// `confidence` is the blend weight of the new sample, clamped to `[0, 1]`.
    /// Only the stored record's confidence is held at `confidence_floor`.
    /// With `max_step_px` set, the sample may move the stored delta by at most
    /// that many pixels per component.
    pub fn merge(
        &self,
        anchor: Point,
        delta: Offset,
        confidence: f64,
        learning: &LearningConfig,
    ) -> MergeOutcome {
        let floor = learning.confidence_floor;
        let c_new = confidence.clamp(0.0, 1.0);
        let key = self.bucket_for(anchor);

        match self.records.entry(key) {
            Entry::Vacant(slot) => {
                let delta = limit_step(Offset::ZERO, delta, learning.max_step_px);
                let record = AdjustmentRecord::new(anchor, delta, c_new.max(floor));
                slot.insert(record.clone());
                MergeOutcome {
                    kind: MergeKind::Inserted,
                    key,
                    record,
                }
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                let delta = limit_step(existing.delta, delta, learning.max_step_px);
                let c_old = existing.confidence;
                let n_old = existing.sample_count as f64;
                let old_weight = c_old * n_old;
                let total = old_weight + c_new;

                let agrees = existing.delta.dot(&delta) >= 0.0;

                existing.delta = Offset::new(
                    (existing.delta.dx * old_weight + delta.dx * c_new) / total,
                    (existing.delta.dy * old_weight + delta.dy * c_new) / total,
                );
                existing.sample_count = existing.sample_count.saturating_add(1);
                let confidence = if agrees {
                    c_old + learning.corroboration_bonus
                } else {
                    c_old - learning.conflict_penalty
                };
                existing.confidence = confidence.clamp(floor, 1.0);
                existing.last_updated = Utc::now();

                MergeOutcome {
                    kind: if agrees {
                        MergeKind::Corroborated
                    } else {
                        MergeKind::Conflicted
                    },
                    key,
                    record: existing.clone(),
                }
            }
        }
    }

    /// Records whose bucket lies within `radius_cells` of `center` on both axes.
    pub fn neighbourhood(&self, center: BucketKey, radius_cells: u32) -> Vec<AdjustmentRecord> {
        let r = radius_cells as i32;
        let mut found = Vec::new();
        for col in center.col.saturating_sub(r)..=center.col.saturating_add(r) {
            for row in center.row.saturating_sub(r)..=center.row.saturating_add(r) {
                if let Some(record) = self.records.get(&BucketKey { col, row }) {
                    found.push(record.clone());
                }
            }
        }
        found
    }

    pub fn entries(&self) -> Vec<(BucketKey, AdjustmentRecord)> {
        self.records
            .iter()
            .map(|r| (*r.key(), r.value().clone()))
            .collect()
    }

    pub fn replace_all(&self, entries: impl IntoIterator<Item = (BucketKey, AdjustmentRecord)>) {
        self.records.clear();
        for (key, record) in entries {
            self.records.insert(key, record);
        }
    }

    pub fn clear(&self) {
        self.records.clear();
    }
}

/// Pulls `sample` to within `max_step` of `current` on each axis.
fn limit_step(current: Offset, sample: Offset, max_step: Option<f64>) -> Offset {
    let Some(limit) = max_step else {
        return sample;
    };
    let step = Offset::new(sample.dx - current.dx, sample.dy - current.dy).clamp_components(limit);
    let limited = Offset::new(current.dx + step.dx, current.dy + step.dy);
    if limited != sample {
        tracing::debug!(
            raw_dx = sample.dx,
            raw_dy = sample.dy,
            dx = limited.dx,
            dy = limited.dy,
            limit,
            "sample limited to max step"
        );
    }
    limited
}
