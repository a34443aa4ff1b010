use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calibration::strategy::StrategyOverride;
use crate::calibration::types::{AdjustmentRecord, BucketKey};
use crate::errors::{CalibrationError, CalibrationResult};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotAdjustment {
    pub bucket: BucketKey,
    pub record: AdjustmentRecord,
}

/// Point-in-time copy of an engine's learned state.
///
/// Each record is copied atomically; the snapshot as a whole is not a single
/// consistent cut if ingests run while it is taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub version: u32,
    pub taken_at: DateTime<Utc>,
    pub cell_size: u32,
    pub adjustments: Vec<SnapshotAdjustment>,
    pub strategies: Vec<StrategyOverride>,
    #[serde(default)]
    pub total_feedback_processed: u64,
    #[serde(default)]
    pub rejected_feedback: u64,
}

/// JSON file holding an `EngineSnapshot` between agent sessions.
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<local data dir>/SeeClaw/calibration.json`, falling back to the working directory.
    pub fn default_location() -> Self {
        let path = match dirs::data_local_dir() {
            Some(base) => base.join("SeeClaw").join("calibration.json"),
            None => PathBuf::from("calibration.json"),
        };
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes to a sibling temp file first so a crash never leaves a torn snapshot.
    pub fn save(&self, snapshot: &EngineSnapshot) -> CalibrationResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::info!(
            path = %self.path.display(),
            adjustments = snapshot.adjustments.len(),
            strategies = snapshot.strategies.len(),
            "calibration snapshot saved"
        );
        Ok(())
    }

    /// `Ok(None)` when no snapshot has been written yet.
    pub fn load(&self) -> CalibrationResult<Option<EngineSnapshot>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no calibration snapshot yet");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot: EngineSnapshot = serde_json::from_str(&content).map_err(|e| {
            CalibrationError::Snapshot(format!("{}: {e}", self.path.display()))
        })?;
        tracing::info!(
            path = %self.path.display(),
            adjustments = snapshot.adjustments.len(),
            "calibration snapshot loaded"
        );
        Ok(Some(snapshot))
    }
}
