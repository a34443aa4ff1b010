/// Queue-driven ingest: one tokio task owns the receiving end of a feedback
/// channel and folds records into the engine in arrival order.
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::calibration::engine::CalibrationEngine;
use crate::calibration::types::FeedbackRecord;
use crate::errors::{CalibrationError, CalibrationResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub accepted: u64,
    pub rejected: u64,
}

#[derive(Clone)]
pub struct FeedbackSender {
    tx: mpsc::Sender<FeedbackRecord>,
}

impl FeedbackSender {
    pub async fn submit(&self, record: FeedbackRecord) -> CalibrationResult<()> {
        self.tx
            .send(record)
            .await
            .map_err(|_| CalibrationError::Cancelled)
    }

    pub fn try_submit(&self, record: FeedbackRecord) -> CalibrationResult<()> {
        self.tx.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                CalibrationError::Executor("feedback queue is full".into())
            }
            mpsc::error::TrySendError::Closed(_) => CalibrationError::Cancelled,
        })
    }
}

pub struct FeedbackWorker;

impl FeedbackWorker {
    /// Spawns the worker. It exits once every `FeedbackSender` is dropped.
    pub fn spawn(engine: Arc<CalibrationEngine>, buffer: usize) -> (FeedbackSender, JoinHandle<WorkerStats>) {
        let (tx, rx) = mpsc::channel::<FeedbackRecord>(buffer.max(1));
        tracing::info!(buffer, "spawning calibration feedback worker");
        let handle = tokio::spawn(run(engine, rx));
        (FeedbackSender { tx }, handle)
    }
}

async fn run(engine: Arc<CalibrationEngine>, mut rx: mpsc::Receiver<FeedbackRecord>) -> WorkerStats {
    let mut stats = WorkerStats::default();
    while let Some(record) = rx.recv().await {
        // rejection is already logged by the engine
        match engine.ingest(&record) {
            Ok(_) => stats.accepted += 1,
            Err(_) => stats.rejected += 1,
        }
    }
    tracing::info!(
        accepted = stats.accepted,
        rejected = stats.rejected,
        "calibration feedback worker exited"
    );
    stats
}
