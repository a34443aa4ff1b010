/// Boundary between the action pipeline and the calibration engine.
///
/// Every tap goes through [`CalibratedExecutor::execute`]:
///
/// 1. Resolve the execution policy and the learned correction for the request.
/// 2. Dispatch the corrected point, bounded by `policy.timeout`.
/// 3. Ask the reflector for a verdict (same bound). When the policy requires
///    verification a successful verdict is confirmed once more after `retry_delay`.
/// 4. Turn the verdict into one `FeedbackRecord` and ingest it.
/// 5. On failure under a verification policy, wait `retry_delay` and retry.
///
/// If the returned future is dropped before a verdict arrives nothing is ingested.
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use uuid::Uuid;

use crate::calibration::engine::CalibrationEngine;
use crate::calibration::strategy::ExecutionPolicy;
use crate::calibration::types::{FeedbackRecord, Offset};
use crate::config::ExecutorConfig;
use crate::errors::{CalibrationError, CalibrationResult};
use crate::executor::traits::{ActionDispatcher, Reflector};
use crate::executor::types::{DispatchedTap, ReflectorVerdict, TapReport, TapRequest};

pub struct CalibratedExecutor {
    engine: Arc<CalibrationEngine>,
    dispatcher: Arc<dyn ActionDispatcher>,
    reflector: Arc<dyn Reflector>,
    config: ExecutorConfig,
}

impl CalibratedExecutor {
    pub fn new(
        engine: Arc<CalibrationEngine>,
        dispatcher: Arc<dyn ActionDispatcher>,
        reflector: Arc<dyn Reflector>,
    ) -> Self {
        let config = engine.config().executor.clone();
        Self {
            engine,
            dispatcher,
            reflector,
            config,
        }
    }

    pub fn engine(&self) -> &Arc<CalibrationEngine> {
        &self.engine
    }

    pub async fn execute(&self, request: TapRequest) -> CalibrationResult<TapReport> {
        let action_id = Uuid::new_v4();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            // re-read every attempt: the previous ingest may have escalated it
            let policy = self.engine.policy_for(&request.task_type);
            let dispatched = self.engine.lookup_and_apply(request.requested);
            let tap = DispatchedTap {
                action_id,
                task_type: request.task_type.clone(),
                requested: request.requested,
                dispatched,
                attempt,
            };

            tracing::debug!(
                action_id = %action_id,
                task_type = %request.task_type,
                attempt,
                req_x = request.requested.x,
                req_y = request.requested.y,
                x = dispatched.x,
                y = dispatched.y,
                "dispatching calibrated tap"
            );

            bounded(policy.timeout, self.dispatcher.tap(dispatched, &policy)).await?;
            let verdict = self.judge(&tap, &policy).await?;

            let feedback = feedback_for(&tap, &verdict);
            let feedback_error = match self.engine.ingest(&feedback) {
                Ok(_) => None,
                Err(e) => Some(e.to_string()),
            };

            let retry = !verdict.success && policy.verification_required && attempt < max_attempts;
            if !retry {
                if !verdict.success {
                    tracing::info!(
                        action_id = %action_id,
                        task_type = %request.task_type,
                        attempts = attempt,
                        "tap did not hit its target"
                    );
                }
                return Ok(TapReport {
                    action_id,
                    task_type: request.task_type,
                    requested: request.requested,
                    dispatched,
                    success: verdict.success,
                    attempts: attempt,
                    feedback_error,
                });
            }

            tracing::debug!(
                action_id = %action_id,
                retry_delay = ?policy.retry_delay,
                "verification failed; retrying tap"
            );
            tokio::time::sleep(policy.retry_delay).await;
        }
    }

    /// Runs independent requests concurrently.
    pub async fn execute_batch(&self, requests: Vec<TapRequest>) -> Vec<CalibrationResult<TapReport>> {
        join_all(requests.into_iter().map(|r| self.execute(r))).await
    }

    async fn judge(&self, tap: &DispatchedTap, policy: &ExecutionPolicy) -> CalibrationResult<ReflectorVerdict> {
        let verdict = bounded(policy.timeout, self.reflector.reflect(tap)).await?;
        if !(verdict.success && policy.verification_required) {
            return Ok(verdict);
        }
        tokio::time::sleep(policy.retry_delay).await;
        let confirmation = bounded(policy.timeout, self.reflector.reflect(tap)).await?;
        if !confirmation.success {
            tracing::info!(action_id = %tap.action_id, "success verdict not confirmed");
        }
        Ok(confirmation)
    }
}

async fn bounded<T>(
    limit: Duration,
    fut: impl std::future::Future<Output = CalibrationResult<T>>,
) -> CalibrationResult<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| CalibrationError::Timeout(limit))?
}

/// Re-expresses the verdict relative to the caller's request so the stored
/// correction covers the full distance, not only the residual after the
/// correction already applied. The residual travels as `observed_miss`.
fn feedback_for(tap: &DispatchedTap, verdict: &ReflectorVerdict) -> FeedbackRecord {
    let applied = tap.dispatched.offset_from(&tap.requested);
    let measured = verdict
        .measured_offset
        .or_else(|| verdict.target_estimate.map(|t| tap.dispatched.offset_from(&t)));

    let (offset, observed_miss) = match measured {
        Some(m) => (Some(Offset::new(m.dx - applied.dx, m.dy - applied.dy)), Some(m)),
        // a bare success means the dispatched point was right
        None if verdict.success => (Some(-applied), Some(Offset::ZERO)),
        None => (None, None),
    };

    FeedbackRecord {
        task_type: tap.task_type.clone(),
        requested_coords: tap.requested,
        target_estimate: verdict.target_estimate,
        offset,
        observed_miss,
        success: verdict.success,
        confidence: verdict.confidence,
    }
}
