//! Job status, preview, and result retrieval.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::Method;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use url::Url;

use crate::api::client::{
    error_for_status, redact_id, sanitize_url_for_logs, ApiClient, LoggingMode,
};
use crate::api::types::{DownloadManifest, JobStatusResponse};
use crate::error::AppError;
use crate::preview::types::{PreviewResponse, PreviewSnapshot};

impl ApiClient {
    /// Fetches the current status of a job.
    ///
    /// A `failed` job is a successful response here; callers decide what a
    /// terminal status means.
    ///
    /// # Errors
    ///
    /// Transport errors only.
    pub async fn get_job_status(&self, job_id: &str) -> Result<JobStatusResponse, AppError> {
        let url = self.endpoint(&["api", "v1", "jobs", job_id])?;
        let status: JobStatusResponse = self.get_json(&url).await?;

        info!(
            "[POLL] Job {} is {}{}",
            redact_id(job_id),
            status.status,
            status
                .progress_percent()
                .map(|p| format!(" ({}%)", p))
                .unwrap_or_default()
        );
        Ok(status)
    }

    /// Fetches the structured preview for a job, converted to its tagged shape.
    ///
    /// # Errors
    ///
    /// Transport errors only; an empty preview is a valid response.
    pub async fn get_job_preview(&self, job_id: &str) -> Result<PreviewSnapshot, AppError> {
        let url = self.endpoint(&["api", "v1", "jobs", job_id, "preview"])?;
        let response: PreviewResponse = self.get_json(&url).await?;
        Ok(PreviewSnapshot::from(response))
    }

    /// Fetches signed download URLs for a job's outputs.
    ///
    /// # Arguments
    ///
    /// * `job_id` - Job identifier
    /// * `expiry_hours` - Requested lifetime of the signed URLs
    ///
    /// # Errors
    ///
    /// Transport errors only.
    pub async fn get_download_manifest(
        &self,
        job_id: &str,
        expiry_hours: u32,
    ) -> Result<DownloadManifest, AppError> {
        let mut url = self.endpoint(&["api", "v1", "download", job_id])?;
        url.query_pairs_mut()
            .append_pair("expiry_hours", &expiry_hours.to_string());

        let manifest: DownloadManifest = self.get_json(&url).await?;
        info!(
            "[DOWNLOAD] Job {} has {} downloadable file(s), expiring {}",
            redact_id(job_id),
            manifest.urls.len(),
            manifest.expires_at
        );
        Ok(manifest)
    }

    /// Fetches a result file as text.
    ///
    /// # Errors
    ///
    /// - `AppError::Validation` if `url` is not an absolute URL
    /// - transport errors, or `AppError::InvalidResponse` if the body is not text
    pub async fn fetch_raw(&self, url: &str) -> Result<String, AppError> {
        let url = parse_result_url(url)?;
        let response = self.get_signed(&url).await?;
        response
            .text()
            .await
            .map_err(|_| AppError::InvalidResponse("Failed to read result file".to_string()))
    }

    /// Streams a result file to `dest`.
    ///
    /// Writes to a `.part` sibling first and renames on success, so `dest`
    /// never holds a partial file.
    ///
    /// # Returns
    ///
    /// Number of bytes written.
    ///
    /// # Errors
    ///
    /// Transport errors, or `AppError::Internal` for filesystem failures.
    pub async fn download_file(&self, url: &str, dest: &Path) -> Result<u64, AppError> {
        let url = parse_result_url(url)?;
        let temp_path = part_path(dest);

        if let Some(parent) = temp_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::Internal(format!("Failed to create output directory: {}", e))
            })?;
        }

        let response = self.get_signed(&url).await?;

        let written = match write_part(response, &temp_path, dest).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&temp_path).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!("[DOWNLOAD] Failed to remove {:?}: {}", temp_path, cleanup);
                    }
                }
                return Err(e);
            }
        };

        info!("[DOWNLOAD] Saved {:?} ({} bytes)", dest, written);
        Ok(written)
    }

    /// Downloads each `(file name, url)` entry into `dir`, one at a time.
    ///
    /// # Returns
    ///
    /// The paths written, in entry order.
    ///
    /// # Errors
    ///
    /// Stops at the first failure. Entry names that are not plain file names
    /// are rejected with `AppError::InvalidResponse`.
    pub async fn download_all<'a, I>(
        &self,
        entries: I,
        dir: &Path,
    ) -> Result<Vec<PathBuf>, AppError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut written = Vec::new();
        for (name, url) in entries {
            let file_name = safe_file_name(name)?;
            let dest = dir.join(file_name);
            self.download_file(url, &dest).await?;
            written.push(dest);
        }
        Ok(written)
    }

    /// GETs a signed result URL. The query string is never logged.
    async fn get_signed(&self, url: &Url) -> Result<reqwest::Response, AppError> {
        let http = self.http();
        let response = self
            .send_with_retry(Method::GET, url, || {
                std::future::ready(Ok::<_, AppError>(http.get(url.clone())))
            })
            .await?;

        error_for_status(response).await.map_err(|e| {
            warn!(
                "[DOWNLOAD] {} failed: {}",
                sanitize_url_for_logs(url, LoggingMode::PathOnly),
                e
            );
            e
        })
    }
}

/// Streams `response` into `temp_path`, then renames it over `dest`.
/// The caller removes `temp_path` on any error.
async fn write_part(
    response: reqwest::Response,
    temp_path: &Path,
    dest: &Path,
) -> Result<u64, AppError> {
    let mut file = File::create(temp_path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create temp file: {}", e)))?;

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|_| AppError::ConnectionFailed("Download interrupted".to_string()))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to write output file: {}", e)))?;
        written += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|e| AppError::Internal(format!("Failed to flush output file: {}", e)))?;
    drop(file);

    tokio::fs::rename(temp_path, dest).await.map_err(|e| {
        AppError::Internal(format!("Failed to rename temp file to final path: {}", e))
    })?;

    Ok(written)
}

fn parse_result_url(raw: &str) -> Result<Url, AppError> {
    Url::parse(raw).map_err(|_| AppError::Validation("Invalid result URL".to_string()))
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Keeps only a plain, non-traversing file name.
fn safe_file_name(name: &str) -> Result<&str, AppError> {
    let candidate = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default().trim();
    if candidate.is_empty() || candidate == "." || candidate == ".." {
        return Err(AppError::InvalidResponse(format!(
            "Unusable output file name: {}",
            name
        )));
    }
    Ok(candidate)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
