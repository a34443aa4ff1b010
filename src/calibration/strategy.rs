use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::StrategyConfig;

/// Per-task-type policy override written on escalation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyOverride {
    pub task_type: String,
    pub timeout: Duration,
    pub retry_delay: Duration,
    pub verification_required: bool,
    pub escalated_at: DateTime<Utc>,
    /// Number of ingested records whose observed miss exceeded the threshold.
    pub escalations: u32,
}

/// Policy the dispatcher should use for one task type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPolicy {
    pub timeout: Duration,
    pub retry_delay: Duration,
    pub verification_required: bool,
}

impl ExecutionPolicy {
    pub fn defaults(config: &StrategyConfig) -> Self {
        Self {
            timeout: config.default_timeout(),
            retry_delay: config.default_retry_delay(),
            verification_required: false,
        }
    }
}

impl From<&StrategyOverride> for ExecutionPolicy {
    fn from(o: &StrategyOverride) -> Self {
        Self {
            timeout: o.timeout,
            retry_delay: o.retry_delay,
            verification_required: o.verification_required,
        }
    }
}

pub struct StrategyTable {
    config: StrategyConfig,
    overrides: DashMap<String, StrategyOverride>,
}

impl StrategyTable {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            config,
            overrides: DashMap::new(),
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn get(&self, task_type: &str) -> Option<StrategyOverride> {
        self.overrides.get(task_type).map(|r| r.clone())
    }

    /// The override if one exists, otherwise the configured defaults.
    pub fn policy_for(&self, task_type: &str) -> ExecutionPolicy {
        self.overrides
            .get(task_type)
            .map(|r| ExecutionPolicy::from(r.value()))
            .unwrap_or_else(|| ExecutionPolicy::defaults(&self.config))
    }

    pub fn exceeds_threshold(&self, max_component_px: f64) -> bool {
        max_component_px > self.config.escalation_threshold_px
    }

    /// Tightens the policy for `task_type`. Never loosens an existing override.
    pub fn escalate(&self, task_type: &str) -> StrategyOverride {
        let escalated_timeout = self.config.escalated_timeout();
        let escalated_retry = self.config.escalated_retry_delay();
        let defaults = ExecutionPolicy::defaults(&self.config);

        let mut entry = self
            .overrides
            .entry(task_type.to_string())
            .or_insert_with(|| StrategyOverride {
                task_type: task_type.to_string(),
                timeout: defaults.timeout,
                retry_delay: defaults.retry_delay,
                verification_required: false,
                escalated_at: Utc::now(),
                escalations: 0,
            });
        let o = entry.value_mut();
        o.timeout = o.timeout.max(escalated_timeout);
        o.retry_delay = o.retry_delay.max(escalated_retry);
        o.verification_required = true;
        o.escalated_at = Utc::now();
        o.escalations = o.escalations.saturating_add(1);
        o.clone()
    }

    pub fn reset(&self, task_type: &str) -> Option<StrategyOverride> {
        self.overrides.remove(task_type).map(|(_, v)| v)
    }

    pub fn reset_all(&self) {
        self.overrides.clear();
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    pub fn entries(&self) -> Vec<StrategyOverride> {
        self.overrides.iter().map(|r| r.value().clone()).collect()
    }

    pub fn replace_all(&self, overrides: impl IntoIterator<Item = StrategyOverride>) {
        self.overrides.clear();
        for o in overrides {
            self.overrides.insert(o.task_type.clone(), o);
        }
    }
}
