//! Read-only presentation of the current job.
//!
//! The view is published through a `watch` channel and only ever replaced
//! whole, so subscribers never observe a half-applied update.

use serde::Serialize;
use tokio::sync::watch;

use crate::api::upload::UploadProgress;
use crate::error::{AppError, ErrorPresentation};
use crate::preview::reconciler::{PreviewSource, ReconciledResults};
use crate::preview::types::PreviewSnapshot;
use crate::state::{Job, JobPhase, JobTransition};

/// Substrings that mark merged outputs in the download list.
const MERGED_OUTPUT_MARKERS: &[&str] = &["merged", "output"];

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilePointCount {
    pub name: String,
    pub points: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadEntry {
    pub name: String,
    pub url: String,
}

/// Results of one completed job, ready for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSummary {
    pub preview: PreviewSnapshot,
    pub source: PreviewSource,
    pub total_points: u64,
    /// Per-file counts; empty for single-file previews.
    pub files: Vec<FilePointCount>,
    pub downloads: Vec<DownloadEntry>,
    pub downloads_expire_at: Option<String>,
    /// Non-fatal problem to show next to the results.
    pub notice: Option<ErrorPresentation>,
}

/// Everything a subscriber needs to render the current job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultView {
    pub job: Option<Job>,
    pub upload: Option<UploadProgress>,
    pub preview_loading: bool,
    pub results: Option<ResultSummary>,
    pub failure: Option<ErrorPresentation>,
    pub stopped: bool,
}

impl ResultView {
    pub fn phase(&self) -> JobPhase {
        if self.stopped {
            return JobPhase::Stopped;
        }
        match (&self.job, &self.upload, &self.failure) {
            (Some(job), _, _) => JobPhase::from_status(job.status),
            (None, Some(_), _) => JobPhase::Uploading,
            (None, None, Some(_)) => JobPhase::Failed,
            (None, None, None) => JobPhase::Idle,
        }
    }

    pub fn status_label(&self) -> String {
        let phase = self.phase();
        let progress = match phase {
            JobPhase::Uploading => self.upload.map(|u| u.percent()),
            _ => self.job.as_ref().and_then(|j| j.progress),
        };
        phase.label(progress)
    }

    /// True once nothing further will be published for this job.
    pub fn is_settled(&self) -> bool {
        match self.phase() {
            JobPhase::Stopped | JobPhase::Failed | JobPhase::Deleted => true,
            JobPhase::Completed => self.results.is_some(),
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Merge
// ─────────────────────────────────────────────────────────────────────────────

/// Combines reconciled preview and manifest data into a summary.
///
/// With `merge_outputs`, only merged files are offered for download.
pub fn merge(results: &ReconciledResults, merge_outputs: bool) -> ResultSummary {
    let files = match &results.preview {
        PreviewSnapshot::Multi(multi) => multi
            .files
            .iter()
            .enumerate()
            .map(|(i, file)| FilePointCount {
                name: file.display_name(&format!("File {}", i + 1)),
                points: file.point_count(),
            })
            .collect(),
        _ => Vec::new(),
    };

    let (downloads, downloads_expire_at) = match &results.manifest {
        Some(manifest) => {
            let entries = manifest
                .urls
                .iter()
                .filter(|(name, _)| !merge_outputs || is_merged_output(name))
                .map(|(name, url)| DownloadEntry {
                    name: name.clone(),
                    url: url.clone(),
                })
                .collect();
            (entries, Some(manifest.expires_at.clone()))
        }
        None => (Vec::new(), None),
    };

    let notice = (!results.preview_available()).then(|| {
        AppError::PreviewUnavailable {
            job_id: results.job_id.clone(),
        }
        .to_presentation()
    });

    ResultSummary {
        preview: results.preview.clone(),
        source: results.source,
        total_points: results.preview.total_points(),
        files,
        downloads,
        downloads_expire_at,
        notice,
    }
}

fn is_merged_output(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    MERGED_OUTPUT_MARKERS.iter().any(|m| lower.contains(m))
}

// ─────────────────────────────────────────────────────────────────────────────
// ResultAggregator
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the published [`ResultView`].
///
/// Callers serialize updates through the session lock; this type only
/// publishes.
#[derive(Debug)]
pub struct ResultAggregator {
    tx: watch::Sender<ResultView>,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultAggregator {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ResultView::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<ResultView> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> ResultView {
        self.tx.borrow().clone()
    }

    fn publish(&self, view: ResultView) {
        self.tx.send_replace(view);
    }

    fn replace_with(&self, update: impl FnOnce(&mut ResultView)) {
        let mut view = self.current();
        update(&mut view);
        self.publish(view);
    }

    pub fn begin_upload(&self, total_bytes: u64) {
        self.publish(ResultView {
            upload: Some(UploadProgress {
                bytes_sent: 0,
                total_bytes,
            }),
            ..ResultView::default()
        });
    }

    pub fn upload_progress(&self, progress: UploadProgress) {
        self.replace_with(|view| view.upload = Some(progress));
    }

    pub fn upload_failed(&self, error: &AppError) {
        self.publish(ResultView {
            failure: Some(error.to_presentation()),
            ..ResultView::default()
        });
    }

    /// Starts showing a new job, discarding anything from the previous one.
    pub fn track_job(&self, job: Job) {
        self.publish(ResultView {
            job: Some(job),
            ..ResultView::default()
        });
    }

    pub fn job_updated(&self, job: &Job, transition: JobTransition) {
        self.replace_with(|view| {
            view.job = Some(job.clone());
            match transition {
                JobTransition::StartedProcessing | JobTransition::Completed => {
                    view.preview_loading = true;
                }
                JobTransition::Failed => {
                    view.preview_loading = false;
                    view.failure = job.failure().map(|e| e.to_presentation());
                }
                JobTransition::Deleted => view.preview_loading = false,
                JobTransition::Progressed | JobTransition::Unchanged => {}
            }
        });
    }

    pub fn store_results(&self, summary: ResultSummary) {
        self.replace_with(|view| {
            view.preview_loading = false;
            view.results = Some(summary);
        });
    }

    /// Marks the view stopped unless it already settled.
    pub fn stopped(&self) {
        self.replace_with(|view| {
            if !view.is_settled() {
                view.stopped = true;
                view.preview_loading = false;
            }
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
