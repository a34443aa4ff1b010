pub mod calibration;
pub mod config;
pub mod errors;
pub mod executor;

pub use calibration::{CalibrationEngine, CalibrationSummary, FeedbackRecord, Offset, Point};
pub use config::{load_config, CalibrationConfig};
pub use errors::{CalibrationError, CalibrationResult};
pub use executor::CalibratedExecutor;

/// Installs the fmt subscriber used by SeeClaw binaries. `RUST_LOG` overrides
/// the default `info` filter. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}
