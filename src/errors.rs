use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Invalid feedback: {0}")]
    InvalidFeedback(String),

    #[error("Coordinate ({x}, {y}) is outside the configured screen bounds")]
    OutOfRangeCoordinate { x: i32, y: i32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Action cancelled")]
    Cancelled,
}

impl CalibrationError {
    /// True for errors caused by the feedback itself rather than the environment.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CalibrationError::InvalidFeedback(_) | CalibrationError::OutOfRangeCoordinate { .. }
        )
    }
}

impl serde::Serialize for CalibrationError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type CalibrationResult<T> = Result<T, CalibrationError>;
