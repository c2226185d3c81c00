//! Scripted fake of the processing service for orchestrator tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::service::{JobServiceOps, ServiceFuture};
use crate::api::types::{DownloadManifest, JobStatus, JobStatusResponse, UploadResponse};
use crate::api::upload::{ProgressCallback, UploadProgress};
use crate::config::ProcessingConfig;
use crate::error::AppError;
use crate::preview::types::PreviewSnapshot;
use crate::validation::SubmissionFile;

/// A scripted reply. Errors become `AppError::ConnectionFailed`.
type Scripted<T> = Result<T, String>;

/// Pops the next reply; the last one repeats forever.
fn next_reply<T: Clone>(queue: &mut VecDeque<Scripted<T>>) -> Option<Scripted<T>> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

fn into_result<T>(reply: Option<Scripted<T>>, missing: &str) -> Result<T, AppError> {
    match reply {
        Some(Ok(value)) => Ok(value),
        Some(Err(message)) => Err(AppError::ConnectionFailed(message)),
        None => Err(AppError::ConnectionFailed(missing.to_string())),
    }
}

pub(crate) fn status_response(
    job_id: &str,
    status: JobStatus,
    progress: Option<f64>,
) -> JobStatusResponse {
    JobStatusResponse {
        job_id: job_id.to_string(),
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

pub(crate) fn manifest(job_id: &str, files: &[(&str, &str)]) -> DownloadManifest {
    DownloadManifest {
        job_id: job_id.to_string(),
        urls: files
            .iter()
            .map(|(name, url)| (name.to_string(), url.to_string()))
            .collect(),
        expires_at: "2026-10-18T12:00:00Z".to_string(),
    }
}

#[derive(Default)]
struct FakeState {
    statuses: Mutex<HashMap<String, VecDeque<Scripted<JobStatusResponse>>>>,
    status_delays: Mutex<HashMap<String, Duration>>,
    status_calls: Mutex<Vec<String>>,
    previews: Mutex<VecDeque<Scripted<PreviewSnapshot>>>,
    preview_delay: Mutex<Duration>,
    preview_calls: AtomicU32,
    manifest: Mutex<Option<Scripted<DownloadManifest>>>,
    manifest_calls: AtomicU32,
    raw: Mutex<HashMap<String, Scripted<String>>>,
    raw_calls: AtomicU32,
    upload: Mutex<Option<Scripted<UploadResponse>>>,
    upload_delay: Mutex<Duration>,
}

/// Cloneable handle; clones share the same script and call log.
#[derive(Clone, Default)]
pub(crate) struct FakeJobService {
    state: Arc<FakeState>,
}

impl FakeJobService {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_status(&self, job_id: &str, reply: Scripted<JobStatusResponse>) -> &Self {
        self.state
            .statuses
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Scripts a sequence of plain statuses for `job_id`.
    pub(crate) fn with_statuses(&self, job_id: &str, statuses: &[JobStatus]) -> &Self {
        for status in statuses {
            self.push_status(job_id, Ok(status_response(job_id, *status, None)));
        }
        self
    }

    pub(crate) fn with_status_delay(&self, job_id: &str, delay: Duration) -> &Self {
        self.state
            .status_delays
            .lock()
            .unwrap()
            .insert(job_id.to_string(), delay);
        self
    }

    pub(crate) fn push_preview(&self, reply: Scripted<PreviewSnapshot>) -> &Self {
        self.state.previews.lock().unwrap().push_back(reply);
        self
    }

    pub(crate) fn with_preview_delay(&self, delay: Duration) -> &Self {
        *self.state.preview_delay.lock().unwrap() = delay;
        self
    }

    pub(crate) fn with_manifest(&self, reply: Scripted<DownloadManifest>) -> &Self {
        *self.state.manifest.lock().unwrap() = Some(reply);
        self
    }

    pub(crate) fn with_raw(&self, url: &str, reply: Scripted<String>) -> &Self {
        self.state.raw.lock().unwrap().insert(url.to_string(), reply);
        self
    }

    pub(crate) fn with_upload(&self, reply: Scripted<UploadResponse>) -> &Self {
        *self.state.upload.lock().unwrap() = Some(reply);
        self
    }

    pub(crate) fn with_upload_delay(&self, delay: Duration) -> &Self {
        *self.state.upload_delay.lock().unwrap() = delay;
        self
    }

    pub(crate) fn status_calls(&self, job_id: &str) -> usize {
        self.state
            .status_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == job_id)
            .count()
    }

    pub(crate) fn preview_calls(&self) -> u32 {
        self.state.preview_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn manifest_calls(&self) -> u32 {
        self.state.manifest_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn raw_calls(&self) -> u32 {
        self.state.raw_calls.load(Ordering::SeqCst)
    }
}

impl JobServiceOps for FakeJobService {
    fn submit_job<'a>(
        &'a self,
        files: &'a [SubmissionFile],
        _config: &'a ProcessingConfig,
        on_progress: Option<ProgressCallback>,
        cancel: &'a CancellationToken,
    ) -> ServiceFuture<'a, UploadResponse> {
        let reply = self.state.upload.lock().unwrap().clone();
        let delay = *self.state.upload_delay.lock().unwrap();
        let total: u64 = files.iter().map(|f| f.size_bytes).sum();
        Box::pin(async move {
            if let Some(callback) = &on_progress {
                callback(UploadProgress { bytes_sent: total / 2, total_bytes: total });
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            let response = into_result(reply, "no upload scripted")?;
            if let Some(callback) = &on_progress {
                callback(UploadProgress { bytes_sent: total, total_bytes: total });
            }
            Ok(response)
        })
    }

    fn get_job_status<'a>(&'a self, job_id: &'a str) -> ServiceFuture<'a, JobStatusResponse> {
        self.state.status_calls.lock().unwrap().push(job_id.to_string());
        let reply = self
            .state
            .statuses
            .lock()
            .unwrap()
            .get_mut(job_id)
            .and_then(next_reply);
        let delay = self
            .state
            .status_delays
            .lock()
            .unwrap()
            .get(job_id)
            .copied()
            .unwrap_or_default();
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            into_result(reply, "no status scripted")
        })
    }

    fn get_job_preview<'a>(&'a self, _job_id: &'a str) -> ServiceFuture<'a, PreviewSnapshot> {
        self.state.preview_calls.fetch_add(1, Ordering::SeqCst);
        let reply = next_reply(&mut self.state.previews.lock().unwrap())
            .unwrap_or(Ok(PreviewSnapshot::Empty));
        let delay = *self.state.preview_delay.lock().unwrap();
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            into_result(Some(reply), "")
        })
    }

    fn get_download_manifest<'a>(
        &'a self,
        _job_id: &'a str,
        _expiry_hours: u32,
    ) -> ServiceFuture<'a, DownloadManifest> {
        self.state.manifest_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.state.manifest.lock().unwrap().clone();
        Box::pin(async move { into_result(reply, "no manifest scripted") })
    }

    fn fetch_raw<'a>(&'a self, url: &'a str) -> ServiceFuture<'a, String> {
        self.state.raw_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.state.raw.lock().unwrap().get(url).cloned();
        Box::pin(async move { into_result(reply, "no raw file scripted") })
    }
}
