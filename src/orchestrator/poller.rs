//! Status polling task.
//!
//! One task per session ticks on a fixed interval, applies each status
//! response under the session lock, and on completion stops ticking before
//! handing over to the preview reconciler.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::client::redact_id;
use crate::api::service::JobServiceOps;
use crate::api::types::JobStatusResponse;
use crate::config::MIN_POLL_INTERVAL_MS;
use crate::error::AppError;
use crate::orchestrator::aggregator::merge;
use crate::orchestrator::session::SessionRegistry;
use crate::orchestrator::Shared;
use crate::preview::reconciler::{PreviewReconciler, ReconciledResults};
use crate::state::{Job, JobTransition};

/// What the loop does after a status response was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    /// The session was replaced or stopped.
    Stale,
    Continue,
    /// Timer stopped; reconcile results next.
    Completed,
    /// Failed or deleted; nothing more to do.
    Finished,
}

/// Attaches `job` to the session and spawns its status task.
///
/// Called with the session lock held so the task cannot observe the session
/// before its handle is recorded. Must run inside a tokio runtime.
pub(crate) fn launch_poller<S: JobServiceOps>(
    shared: &Arc<Shared<S>>,
    sessions: &mut SessionRegistry,
    generation: u64,
    job: Job,
) -> bool {
    let Some(session) = sessions.live_mut(generation) else {
        debug!("[POLL] Session {} replaced before polling started", generation);
        return false;
    };

    let job_id = job.id.clone();
    let cancel = session.cancel.clone();
    session.job = Some(job.clone());
    shared.aggregator.track_job(job);

    let handle = tokio::spawn(run_session(
        Arc::clone(shared),
        generation,
        job_id,
        cancel,
    ));
    sessions.attach_timer(generation, handle)
}

async fn run_session<S: JobServiceOps>(
    shared: Arc<Shared<S>>,
    generation: u64,
    job_id: String,
    cancel: CancellationToken,
) {
    let period = shared
        .settings
        .poll_interval
        .max(Duration::from_millis(MIN_POLL_INTERVAL_MS));
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "[POLL] Polling job {} every {}ms",
        redact_id(&job_id),
        period.as_millis()
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            response = shared.service.get_job_status(&job_id) => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    "[POLL] Status check for job {} failed, will retry: {}",
                    redact_id(&job_id),
                    e
                );
                continue;
            }
        };

        match apply_tick(&shared, generation, &response) {
            TickOutcome::Continue => {}
            TickOutcome::Completed => break,
            TickOutcome::Stale | TickOutcome::Finished => return,
        }
    }

    let reconciler = PreviewReconciler::new(&shared.service, &shared.settings);
    match reconciler.reconcile(&job_id, &cancel).await {
        Ok(results) => publish_results(&shared, generation, &results),
        Err(AppError::Cancelled) => {
            debug!("[PREVIEW] Reconciliation for job {} cancelled", redact_id(&job_id));
        }
        Err(e) => {
            warn!(
                "[PREVIEW] Reconciliation for job {} failed: {}",
                redact_id(&job_id),
                e
            );
        }
    }
}

fn apply_tick<S>(
    shared: &Shared<S>,
    generation: u64,
    response: &JobStatusResponse,
) -> TickOutcome {
    let mut sessions = shared.lock_sessions();
    let Some(job) = sessions
        .live_mut(generation)
        .and_then(|session| session.job.as_mut())
    else {
        debug!("[POLL] Dropping status from replaced session {}", generation);
        return TickOutcome::Stale;
    };

    let transition = job.apply(response);
    let job = job.clone();
    shared.aggregator.job_updated(&job, transition);

    match transition {
        JobTransition::Completed => {
            sessions.stop_timer(generation);
            info!("[POLL] Job {} completed", redact_id(&job.id));
            TickOutcome::Completed
        }
        JobTransition::Failed => {
            sessions.finish(generation);
            warn!(
                "[POLL] Job {} failed: {}",
                redact_id(&job.id),
                job.error_message.as_deref().unwrap_or("no message")
            );
            TickOutcome::Finished
        }
        JobTransition::Deleted => {
            sessions.finish(generation);
            info!("[POLL] Job {} was deleted", redact_id(&job.id));
            TickOutcome::Finished
        }
        JobTransition::StartedProcessing => {
            info!("[POLL] Job {} is processing", redact_id(&job.id));
            TickOutcome::Continue
        }
        JobTransition::Progressed | JobTransition::Unchanged => {
            debug!(
                "[POLL] Job {} {} ({:?}%)",
                redact_id(&job.id),
                job.status,
                job.progress
            );
            TickOutcome::Continue
        }
    }
}

fn publish_results<S>(shared: &Shared<S>, generation: u64, results: &ReconciledResults) {
    let mut sessions = shared.lock_sessions();
    let Some(session) = sessions.live(generation) else {
        debug!(
            "[PREVIEW] Discarding results for job {} from replaced session",
            redact_id(&results.job_id)
        );
        return;
    };

    shared
        .aggregator
        .store_results(merge(results, session.merge_outputs));
    sessions.finish(generation);
    info!(
        "[PREVIEW] Results for job {} published ({} points)",
        redact_id(&results.job_id),
        results.preview.total_points()
    );
}
