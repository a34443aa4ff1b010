use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{CalibrationError, CalibrationResult};

const CONFIG_FILE_NAME: &str = "calibration.toml";
const CONFIG_ENV_VAR: &str = "SEECLAW_CALIBRATION_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Device screen size. When absent only negative coordinates are out of range.
    #[serde(default)]
    pub screen: Option<ScreenBounds>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Side length of one quantization cell, in pixels.
    #[serde(default = "default_cell_size")]
    pub cell_size: u32,
    /// Neighbourhood searched on an exact-bucket miss, in cells.
    #[serde(default = "default_search_radius_cells")]
    pub search_radius_cells: u32,
}

impl MatcherConfig {
    pub fn search_radius_px(&self) -> f64 {
        (self.cell_size * self.search_radius_cells) as f64
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            cell_size: default_cell_size(),
            search_radius_cells: default_search_radius_cells(),
        }
    }
}

fn default_cell_size() -> u32 {
    16
}

fn default_search_radius_cells() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Added to a record's confidence when new evidence agrees in direction.
    #[serde(default = "default_corroboration_bonus")]
    pub corroboration_bonus: f64,
    /// Subtracted from a record's confidence when new evidence points the other way.
    #[serde(default = "default_conflict_penalty")]
    pub conflict_penalty: f64,
    /// Lowest confidence a record can hold. Must be > 0.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
    /// Minimum weight assigned to feedback from a successful action.
    #[serde(default = "default_success_confidence")]
    pub success_confidence: f64,
    /// Largest per-axis move one sample can make to a stored delta, in pixels.
    /// `None` disables it.
    #[serde(default)]
    pub max_step_px: Option<f64>,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            corroboration_bonus: default_corroboration_bonus(),
            conflict_penalty: default_conflict_penalty(),
            confidence_floor: default_confidence_floor(),
            success_confidence: default_success_confidence(),
            max_step_px: None,
        }
    }
}

fn default_corroboration_bonus() -> f64 {
    0.1
}

fn default_conflict_penalty() -> f64 {
    0.2
}

fn default_confidence_floor() -> f64 {
    0.1
}

fn default_success_confidence() -> f64 {
    0.9
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Offset component (px) above which a task type's policy is escalated.
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold_px: f64,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: f64,
    #[serde(default = "default_retry_delay_secs")]
    pub default_retry_delay_secs: f64,
    #[serde(default = "default_escalated_timeout_secs")]
    pub escalated_timeout_secs: f64,
    #[serde(default = "default_escalated_retry_delay_secs")]
    pub escalated_retry_delay_secs: f64,
}

impl StrategyConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.default_timeout_secs)
    }

    pub fn default_retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.default_retry_delay_secs)
    }

    pub fn escalated_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.escalated_timeout_secs)
    }

    pub fn escalated_retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.escalated_retry_delay_secs)
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            escalation_threshold_px: default_escalation_threshold(),
            default_timeout_secs: default_timeout_secs(),
            default_retry_delay_secs: default_retry_delay_secs(),
            escalated_timeout_secs: default_escalated_timeout_secs(),
            escalated_retry_delay_secs: default_escalated_retry_delay_secs(),
        }
    }
}

fn default_escalation_threshold() -> f64 {
    30.0
}

fn default_timeout_secs() -> f64 {
    5.0
}

fn default_retry_delay_secs() -> f64 {
    1.0
}

fn default_escalated_timeout_secs() -> f64 {
    10.0
}

fn default_escalated_retry_delay_secs() -> f64 {
    1.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Taps issued per request when the policy requires verification.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_max_attempts() -> u32 {
    2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenBounds {
    pub width: u32,
    pub height: u32,
}

impl ScreenBounds {
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as i64) < self.width as i64 && (y as i64) < self.height as i64
    }

    /// Largest on-screen x, never below 0.
    pub fn max_x(&self) -> i32 {
        last_pixel(self.width)
    }

    pub fn max_y(&self) -> i32 {
        last_pixel(self.height)
    }
}

fn last_pixel(extent: u32) -> i32 {
    i32::try_from(extent).unwrap_or(i32::MAX).saturating_sub(1).max(0)
}

impl CalibrationConfig {
    /// Rejects values that would break the merge or lookup arithmetic.
    pub fn validate(&self) -> CalibrationResult<()> {
        if self.matcher.cell_size == 0 {
            return Err(CalibrationError::Config("matcher.cell_size must be > 0".into()));
        }
        if self.matcher.search_radius_cells == 0 {
            return Err(CalibrationError::Config(
                "matcher.search_radius_cells must be >= 1".into(),
            ));
        }
        let l = &self.learning;
        if !(l.confidence_floor > 0.0 && l.confidence_floor <= 1.0) {
            return Err(CalibrationError::Config(
                "learning.confidence_floor must be in (0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&l.success_confidence) {
            return Err(CalibrationError::Config(
                "learning.success_confidence must be in [0, 1]".into(),
            ));
        }
        if l.corroboration_bonus < 0.0 || l.conflict_penalty < 0.0 {
            return Err(CalibrationError::Config(
                "learning bonus/penalty must be non-negative".into(),
            ));
        }
        if let Some(step) = l.max_step_px {
            if !(step > 0.0 && step.is_finite()) {
                return Err(CalibrationError::Config(
                    "learning.max_step_px must be a positive number".into(),
                ));
            }
        }
        let s = &self.strategy;
        let secs = [
            s.default_timeout_secs,
            s.default_retry_delay_secs,
            s.escalated_timeout_secs,
            s.escalated_retry_delay_secs,
        ];
        if secs.iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(CalibrationError::Config(
                "strategy durations must be finite and non-negative".into(),
            ));
        }
        if !(s.escalation_threshold_px.is_finite() && s.escalation_threshold_px >= 0.0) {
            return Err(CalibrationError::Config(
                "strategy.escalation_threshold_px must be finite and non-negative".into(),
            ));
        }
        if self.executor.max_attempts == 0 {
            return Err(CalibrationError::Config("executor.max_attempts must be >= 1".into()));
        }
        if let Some(screen) = &self.screen {
            if screen.width == 0 || screen.height == 0 {
                return Err(CalibrationError::Config("screen dimensions must be > 0".into()));
            }
            if i32::try_from(screen.width).is_err() || i32::try_from(screen.height).is_err() {
                return Err(CalibrationError::Config(format!(
                    "screen dimensions must not exceed {} px",
                    i32::MAX
                )));
            }
        }
        Ok(())
    }
}

fn resolve_config_path() -> CalibrationResult<PathBuf> {
    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(explicit);
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config path taken from environment");
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} points to a missing file");
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join(CONFIG_FILE_NAME);
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join(CONFIG_FILE_NAME);
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(CalibrationError::Config(format!(
        "{CONFIG_FILE_NAME} not found via {CONFIG_ENV_VAR}, next to executable or in working directory"
    )))
}

pub fn load_config() -> CalibrationResult<CalibrationConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> CalibrationResult<CalibrationConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: CalibrationConfig = toml::from_str(&content)?;
    config.validate()?;
    tracing::info!(
        path = %path.display(),
        cell_size = config.matcher.cell_size,
        radius_cells = config.matcher.search_radius_cells,
        "calibration config loaded"
    );
    Ok(config)
}

pub fn save_config(config: &CalibrationConfig, path: &Path) -> CalibrationResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "calibration config saved");
    Ok(())
}
