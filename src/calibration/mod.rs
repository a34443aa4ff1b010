pub mod engine;
pub mod ingestor;
pub mod matcher;
pub mod snapshot;
pub mod store;
pub mod strategy;
pub mod types;
pub mod worker;

pub use engine::{CalibrationEngine, CalibrationSummary};
pub use ingestor::IngestReport;
pub use matcher::{MatchSource, RegionMatch};
pub use snapshot::{EngineSnapshot, SnapshotFile};
pub use strategy::{ExecutionPolicy, StrategyOverride};
pub use types::{AdjustmentRecord, BucketKey, FeedbackRecord, Offset, Point, DEFAULT_TASK_TYPE};
pub use worker::{FeedbackSender, FeedbackWorker, WorkerStats};
