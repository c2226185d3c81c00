//! Client-side job state.
//!
//! A [`Job`] is created from the upload response and afterwards only changes
//! by applying status responses from the poller. Once terminal it is frozen.

use serde::Serialize;

use crate::api::types::{JobStatus, JobStatusResponse, UploadResponse};
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Job
// ─────────────────────────────────────────────────────────────────────────────

/// The tracked processing job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    /// Percent complete, never decreasing.
    pub progress: Option<u8>,
    /// Set only when the job failed.
    pub error_message: Option<String>,
    pub input_files: Vec<String>,
    pub updated_at: Option<String>,
}

/// What a status response changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTransition {
    Unchanged,
    Progressed,
    /// First observation of `processing`.
    StartedProcessing,
    Completed,
    Failed,
    Deleted,
}

impl JobTransition {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobTransition::Completed | JobTransition::Failed | JobTransition::Deleted
        )
    }
}

impl Job {
    pub fn new(id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            id: id.into(),
            status,
            progress: None,
            error_message: None,
            input_files: Vec::new(),
            updated_at: None,
        }
    }

    /// Builds the job from an upload response.
    ///
    /// A terminal status straight from the upload is not trusted; the job
    /// starts as queued and the first poll settles it.
    pub fn from_upload(response: &UploadResponse) -> Self {
        let status = if response.status.is_terminal() || response.status == JobStatus::Unknown {
            JobStatus::Queued
        } else {
            response.status
        };
        Self::new(response.job_id.clone(), status)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies a status response.
    ///
    /// Terminal jobs ignore further responses. An unknown status keeps the
    /// current one. Progress only moves forward.
    pub fn apply(&mut self, response: &JobStatusResponse) -> JobTransition {
        if self.is_terminal() {
            return JobTransition::Unchanged;
        }

        let previous_status = self.status;
        let previous_progress = self.progress;

        if let Some(percent) = response.progress_percent() {
            self.progress = Some(self.progress.map_or(percent, |current| current.max(percent)));
        }
        if !response.input_files.is_empty() {
            self.input_files = response.input_files.clone();
        }
        if response.updated_at.is_some() {
            self.updated_at = response.updated_at.clone();
        }

        if response.status != JobStatus::Unknown {
            self.status = response.status;
        }

        match self.status {
            JobStatus::Completed => {
                self.progress = Some(100);
                JobTransition::Completed
            }
            JobStatus::Failed => {
                self.error_message = response
                    .error_message
                    .as_deref()
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string);
                JobTransition::Failed
            }
            JobStatus::Deleted => JobTransition::Deleted,
            JobStatus::Processing if previous_status != JobStatus::Processing => {
                JobTransition::StartedProcessing
            }
            _ if self.progress != previous_progress => JobTransition::Progressed,
            _ => JobTransition::Unchanged,
        }
    }

    /// The failure as an error, if the job failed.
    pub fn failure(&self) -> Option<AppError> {
        (self.status == JobStatus::Failed).then(|| AppError::JobFailed {
            job_id: self.id.clone(),
            message: self.error_message.clone().unwrap_or_default(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JobPhase
// ─────────────────────────────────────────────────────────────────────────────

/// Coarse phase shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Idle,
    Uploading,
    Queued,
    Processing,
    Completed,
    Failed,
    Deleted,
    Stopped,
}

impl JobPhase {
    pub fn from_status(status: JobStatus) -> Self {
        match status {
            JobStatus::Queued | JobStatus::Unknown => JobPhase::Queued,
            JobStatus::Processing => JobPhase::Processing,
            JobStatus::Completed => JobPhase::Completed,
            JobStatus::Failed => JobPhase::Failed,
            JobStatus::Deleted => JobPhase::Deleted,
        }
    }

    /// Display label, with the percentage where one applies.
    pub fn label(self, progress: Option<u8>) -> String {
        match (self, progress) {
            (JobPhase::Idle, _) => "Ready".into(),
            (JobPhase::Uploading, Some(p)) => format!("Uploading... {}%", p),
            (JobPhase::Uploading, None) => "Uploading...".into(),
            (JobPhase::Queued, _) => "Queued".into(),
            (JobPhase::Processing, Some(p)) => format!("Processing... {}%", p),
            (JobPhase::Processing, None) => "Processing...".into(),
            (JobPhase::Completed, _) => "Completed".into(),
            (JobPhase::Failed, _) => "Failed".into(),
            (JobPhase::Deleted, _) => "Deleted".into(),
            (JobPhase::Stopped, _) => "Stopped".into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: JobStatus, progress: Option<f64>) -> JobStatusResponse {
        JobStatusResponse {
            job_id: "job-1".into(),
            status,
            created_at: None,
            updated_at: None,
            completed_at: None,
            progress,
            input_files: vec![],
            output_files: None,
            error_message: None,
        }
    }

    #[test]
    fn first_processing_observation_is_reported_once() {
        let mut job = Job::new("job-1", JobStatus::Queued);

        assert_eq!(
            job.apply(&response(JobStatus::Processing, Some(10.0))),
            JobTransition::StartedProcessing
        );
        assert_eq!(
            job.apply(&response(JobStatus::Processing, Some(40.0))),
            JobTransition::Progressed
        );
        assert_eq!(
            job.apply(&response(JobStatus::Processing, Some(40.0))),
            JobTransition::Unchanged
        );
    }

    #[test]
    fn progress_never_decreases() {
        let mut job = Job::new("job-1", JobStatus::Processing);
        job.apply(&response(JobStatus::Processing, Some(60.0)));
        job.apply(&response(JobStatus::Processing, Some(35.0)));
        assert_eq!(job.progress, Some(60));
    }

    #[test]
    fn terminal_job_is_frozen() {
        let mut job = Job::new("job-1", JobStatus::Processing);
        assert_eq!(
            job.apply(&response(JobStatus::Completed, None)),
            JobTransition::Completed
        );
        assert_eq!(
            job.apply(&response(JobStatus::Failed, None)),
            JobTransition::Unchanged
        );
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, Some(100));
    }

    #[test]
    fn failure_surfaces_backend_message() {
        let mut job = Job::new("job-1", JobStatus::Processing);
        let mut failed = response(JobStatus::Failed, None);
        failed.error_message = Some("Invalid LAS header".into());

        assert_eq!(job.apply(&failed), JobTransition::Failed);
        let presentation = job.failure().unwrap().to_presentation();
        assert_eq!(presentation.message, "Invalid LAS header");
    }

    #[test]
    fn failure_without_message_uses_generic_text() {
        let mut job = Job::new("job-1", JobStatus::Queued);
        let mut failed = response(JobStatus::Failed, None);
        failed.error_message = Some("   ".into());

        job.apply(&failed);
        assert_eq!(job.error_message, None);
        assert_eq!(job.failure().unwrap().to_presentation().message, "Processing failed");
    }

    #[test]
    fn unknown_status_keeps_current_one() {
        let mut job = Job::new("job-1", JobStatus::Processing);
        assert_eq!(
            job.apply(&response(JobStatus::Unknown, Some(20.0))),
            JobTransition::Progressed
        );
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[test]
    fn upload_with_terminal_status_starts_queued() {
        let upload = UploadResponse {
            job_id: "job-1".into(),
            status: JobStatus::Completed,
            message: None,
            files_uploaded: 1,
        };
        assert_eq!(Job::from_upload(&upload).status, JobStatus::Queued);
    }

    #[test]
    fn labels_include_percentages() {
        assert_eq!(JobPhase::Uploading.label(Some(42)), "Uploading... 42%");
        assert_eq!(JobPhase::Processing.label(Some(60)), "Processing... 60%");
        assert_eq!(JobPhase::Processing.label(None), "Processing...");
        assert_eq!(JobPhase::Failed.label(Some(60)), "Failed");
    }
}
