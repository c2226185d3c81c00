//! Multipart job submission with byte-level progress.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Method};
use serde::Serialize;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::client::{decode_json, error_for_status, redact_id, ApiClient};
use crate::api::types::UploadResponse;
use crate::config::ProcessingConfig;
use crate::error::AppError;
use crate::validation::SubmissionFile;

// ─────────────────────────────────────────────────────────────────────────────
// Progress
// ─────────────────────────────────────────────────────────────────────────────

/// Bytes streamed so far for the whole submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadProgress {
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

impl UploadProgress {
    /// Whole percent sent, 0–100.
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 0;
        }
        let ratio = self.bytes_sent.min(self.total_bytes) as f64 / self.total_bytes as f64;
        (ratio * 100.0).round() as u8
    }
}

/// Invoked from the upload stream as chunks are read.
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

#[derive(Clone)]
struct ProgressTracker {
    sent: Arc<AtomicU64>,
    total: u64,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    fn new(total: u64, callback: Option<ProgressCallback>) -> Self {
        Self {
            sent: Arc::new(AtomicU64::new(0)),
            total,
            callback,
        }
    }

    /// Restarts the count for a re-streamed attempt.
    fn reset(&self) {
        self.sent.store(0, Ordering::SeqCst);
    }

    fn advance(&self, bytes: u64) {
        let sent = self.sent.fetch_add(bytes, Ordering::SeqCst) + bytes;
        self.report(sent);
    }

    fn finish(&self) {
        self.report(self.total);
    }

    fn report(&self, sent: u64) {
        if let Some(callback) = &self.callback {
            callback(UploadProgress {
                bytes_sent: sent.min(self.total),
                total_bytes: self.total,
            });
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Submission
// ─────────────────────────────────────────────────────────────────────────────

impl ApiClient {
    /// Uploads validated files and processing options as one multipart request.
    ///
    /// # Arguments
    ///
    /// * `files` - Files from [`crate::validation::validate_submission`]
    /// * `config` - Processing options, sent as text fields
    /// * `on_progress` - Called as bytes are streamed, and once with the total on success
    /// * `cancel` - Aborts the upload
    ///
    /// # Errors
    ///
    /// - `AppError::Validation` if `files` is empty or a file cannot be opened
    /// - `AppError::Cancelled` if `cancel` fires first
    /// - transport errors from the request
    pub async fn submit_job(
        &self,
        files: &[SubmissionFile],
        config: &ProcessingConfig,
        on_progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<UploadResponse, AppError> {
        if files.is_empty() {
            return Err(AppError::Validation("No files selected".into()));
        }

        let url = self.endpoint(&["api", "v1", "upload", ""])?;
        let total_bytes: u64 = files.iter().map(|f| f.size_bytes).sum();
        let tracker = ProgressTracker::new(total_bytes, on_progress);
        let fields = config.form_fields();

        info!(
            "[UPLOAD] Submitting {} file(s), {} bytes",
            files.len(),
            total_bytes
        );

        let http = self.http();
        let send = self.send_with_retry(Method::POST, &url, || {
            let tracker = tracker.clone();
            let url = url.clone();
            let fields = fields.clone();
            async move {
                tracker.reset();
                let form = build_form(files, &fields, &tracker).await?;
                Ok::<_, AppError>(http.post(url).multipart(form))
            }
        });

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("[UPLOAD] Cancelled");
                return Err(AppError::Cancelled);
            }
            response = send => response?,
        };

        let response = error_for_status(response).await?;
        let upload: UploadResponse = decode_json(response).await?;
        tracker.finish();

        info!(
            "[UPLOAD] Accepted {} file(s) as job {} ({})",
            upload.files_uploaded,
            redact_id(&upload.job_id),
            upload.status
        );

        Ok(upload)
    }
}

/// Builds a fresh multipart form; every file is re-opened and streamed.
async fn build_form(
    files: &[SubmissionFile],
    fields: &[(&'static str, String)],
    tracker: &ProgressTracker,
) -> Result<Form, AppError> {
    let mut form = Form::new();

    for file in files {
        let handle = File::open(&file.path).await.map_err(|e| {
            AppError::Validation(format!("Cannot open {}: {}", file.file_name, e))
        })?;

        let tracker = tracker.clone();
        let stream = ReaderStream::new(handle).inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                tracker.advance(bytes.len() as u64);
            }
        });

        let part = Part::stream_with_length(Body::wrap_stream(stream), file.size_bytes)
            .file_name(file.file_name.clone())
            .mime_str("application/octet-stream")
            .map_err(|e| AppError::Internal(format!("Invalid part content type: {}", e)))?;
        form = form.part("files", part);
    }

    for (name, value) in fields {
        form = form.text(*name, value.clone());
    }

    Ok(form)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
