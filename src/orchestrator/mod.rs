//! Job lifecycle orchestration.
//!
//! [`JobOrchestrator`] drives one job at a time from upload through status
//! polling to reconciled results, and publishes a [`ResultView`] that
//! subscribers can watch.
//!
//! # Usage
//!
//! ```ignore
//! let orchestrator = JobOrchestrator::new(ApiClient::new(&settings)?, settings);
//! let job_id = orchestrator.submit(&files, &config, &CancellationToken::new()).await?;
//! let view = orchestrator.wait_until_settled().await;
//! ```

pub mod aggregator;
mod poller;
mod session;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::client::redact_id;
use crate::api::service::JobServiceOps;
use crate::api::types::JobStatus;
use crate::api::upload::{ProgressCallback, UploadProgress};
use crate::config::{ClientSettings, ProcessingConfig};
use crate::error::AppError;
use crate::state::Job;
use crate::validation::validate_submission;

pub use aggregator::{
    merge, DownloadEntry, FilePointCount, ResultAggregator, ResultSummary, ResultView,
};

use session::SessionRegistry;

/// State shared between the orchestrator handle and its polling task.
pub(crate) struct Shared<S> {
    pub(crate) service: S,
    pub(crate) settings: ClientSettings,
    sessions: Mutex<SessionRegistry>,
    pub(crate) aggregator: ResultAggregator,
}

impl<S> Shared<S> {
    pub(crate) fn new(service: S, settings: ClientSettings) -> Self {
        Self {
            service,
            settings,
            sessions: Mutex::new(SessionRegistry::default()),
            aggregator: ResultAggregator::new(),
        }
    }

    /// Never held across an await.
    pub(crate) fn lock_sessions(&self) -> MutexGuard<'_, SessionRegistry> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drives a single processing job at a time.
///
/// Starting a new job (or stopping) tears down the previous session
/// synchronously; nothing from it is published afterwards.
pub struct JobOrchestrator<S: JobServiceOps> {
    shared: Arc<Shared<S>>,
}

impl<S: JobServiceOps> JobOrchestrator<S> {
    pub fn new(service: S, settings: ClientSettings) -> Self {
        Self {
            shared: Arc::new(Shared::new(service, settings)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ResultView> {
        self.shared.aggregator.subscribe()
    }

    pub fn view(&self) -> ResultView {
        self.shared.aggregator.current()
    }

    /// True while a status timer is ticking.
    pub fn is_polling(&self) -> bool {
        self.shared.lock_sessions().timer_alive()
    }

    pub fn active_job_id(&self) -> Option<String> {
        self.shared.lock_sessions().current_job_id()
    }

    /// Validates and uploads the files, then starts polling the new job.
    ///
    /// Any previous job is stopped once validation passes.
    ///
    /// # Arguments
    ///
    /// * `files` - `.las`/`.laz` inputs
    /// * `config` - Processing options sent with the upload
    /// * `cancel` - Aborts the upload when cancelled
    ///
    /// # Returns
    ///
    /// The job id assigned by the service.
    ///
    /// # Errors
    ///
    /// - `AppError::Validation` before any request is made
    /// - Transport errors from the upload
    /// - `AppError::Cancelled` if `cancel` fires or the session is replaced mid-upload
    pub async fn submit(
        &self,
        files: &[PathBuf],
        config: &ProcessingConfig,
        cancel: &CancellationToken,
    ) -> Result<String, AppError> {
        let validated = validate_submission(files, config).await?;
        let total_bytes: u64 = validated.iter().map(|f| f.size_bytes).sum();

        let (generation, session_cancel) = {
            let mut sessions = self.shared.lock_sessions();
            let begun = sessions.begin(config.merge_outputs);
            self.shared.aggregator.begin_upload(total_bytes);
            begun
        };

        let on_progress = self.progress_callback(generation);
        let upload = tokio::select! {
            biased;
            _ = session_cancel.cancelled() => Err(AppError::Cancelled),
            result = self.shared.service.submit_job(
                &validated,
                config,
                Some(on_progress),
                cancel,
            ) => result,
        };

        let mut sessions = self.shared.lock_sessions();
        match upload {
            Ok(response) => {
                if sessions.live(generation).is_none() {
                    return Err(AppError::Cancelled);
                }
                let job = Job::from_upload(&response);
                info!(
                    "[UPLOAD] Job {} accepted ({} file(s), status {})",
                    redact_id(&job.id),
                    response.files_uploaded,
                    response.status
                );
                poller::launch_poller(&self.shared, &mut sessions, generation, job);
                Ok(response.job_id)
            }
            Err(e) => {
                if sessions.live(generation).is_some() {
                    match e {
                        AppError::Cancelled => self.shared.aggregator.stopped(),
                        _ => self.shared.aggregator.upload_failed(&e),
                    }
                    sessions.finish(generation);
                }
                Err(e)
            }
        }
    }

    /// Starts polling an existing job, replacing any current session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if `job_id` is blank.
    pub fn start_polling(&self, job_id: &str, merge_outputs: bool) -> Result<(), AppError> {
        let job_id = job_id.trim();
        if job_id.is_empty() {
            return Err(AppError::Validation("Job id is required".into()));
        }

        let mut sessions = self.shared.lock_sessions();
        let (generation, _) = sessions.begin(merge_outputs);
        poller::launch_poller(
            &self.shared,
            &mut sessions,
            generation,
            Job::new(job_id, JobStatus::Queued),
        );
        Ok(())
    }

    /// Stops the current session, if any. Returns whether one was running.
    pub fn stop(&self) -> bool {
        let mut sessions = self.shared.lock_sessions();
        let stopped = sessions.stop();
        if stopped {
            self.shared.aggregator.stopped();
            info!("[POLL] Session stopped");
        }
        stopped
    }

    /// Waits until the current job reaches a final view.
    ///
    /// Only returns once a job has been submitted or polled; an idle
    /// orchestrator never settles.
    pub async fn wait_until_settled(&self) -> ResultView {
        let mut rx = self.subscribe();
        let view = match rx.wait_for(ResultView::is_settled).await {
            Ok(view) => view.clone(),
            Err(_) => self.view(),
        };
        view
    }

    fn progress_callback(&self, generation: u64) -> ProgressCallback {
        let shared = Arc::downgrade(&self.shared);
        Arc::new(move |progress: UploadProgress| {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let sessions = shared.lock_sessions();
            if sessions.live(generation).is_some() {
                shared.aggregator.upload_progress(progress);
            }
        })
    }
}

impl<S: JobServiceOps> Drop for JobOrchestrator<S> {
    fn drop(&mut self) {
        self.shared.lock_sessions().stop();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
