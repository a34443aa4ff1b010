use std::cmp::Ordering;

use crate::calibration::store::AdjustmentStore;
use crate::calibration::types::{AdjustmentRecord, Offset, Point};
use crate::config::MatcherConfig;

/// How a lookup resolved, for logging and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchSource {
    ExactBucket,
    Neighbour { distance: f64 },
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionMatch {
    pub source: MatchSource,
    /// Delta already scaled by the effective confidence.
    pub scaled_delta: Offset,
    pub weight: f64,
}

impl RegionMatch {
    pub fn none() -> Self {
        Self {
            source: MatchSource::None,
            scaled_delta: Offset::ZERO,
            weight: 0.0,
        }
    }
}

/// Maps a query coordinate to the most relevant stored correction.
pub struct RegionMatcher {
    config: MatcherConfig,
}

impl RegionMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn radius_px(&self) -> f64 {
        self.config.search_radius_px()
    }

    /// 1. exact bucket → `delta * confidence`
    /// 2. nearest anchor within the radius → `delta * confidence * (1 - d / radius)`
    /// 3. otherwise no adjustment
    pub fn lookup(&self, store: &AdjustmentStore, query: Point) -> RegionMatch {
        let key = store.bucket_for(query);

        if let Some(record) = store.get(&key) {
            return RegionMatch {
                source: MatchSource::ExactBucket,
                scaled_delta: record.delta.scale(record.confidence),
                weight: record.confidence,
            };
        }

        let radius = self.radius_px();
        let best = store
            .neighbourhood(key, self.config.search_radius_cells)
            .into_iter()
            .map(|record| (record.anchor().distance_to(&query), record))
            .filter(|(distance, _)| *distance <= radius)
            .min_by(|a, b| compare_candidates(a, b));

        match best {
            Some((distance, record)) => {
                let weight = record.confidence * (1.0 - distance / radius).max(0.0);
                RegionMatch {
                    source: MatchSource::Neighbour { distance },
                    scaled_delta: record.delta.scale(weight),
                    weight,
                }
            }
            None => RegionMatch::none(),
        }
    }
}

/// Nearest first; ties go to higher confidence, then more samples, then most recent.
fn compare_candidates(a: &(f64, AdjustmentRecord), b: &(f64, AdjustmentRecord)) -> Ordering {
    let (da, ra) = a;
    let (db, rb) = b;
    da.total_cmp(db)
        .then_with(|| rb.confidence.total_cmp(&ra.confidence))
        .then_with(|| rb.sample_count.cmp(&ra.sample_count))
        .then_with(|| rb.last_updated.cmp(&ra.last_updated))
}
