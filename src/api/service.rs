//! Service operations used by the orchestrator, behind a trait so tests can
//! substitute a scripted fake for the HTTP client.

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::api::client::ApiClient;
use crate::api::types::{DownloadManifest, JobStatusResponse, UploadResponse};
use crate::api::upload::ProgressCallback;
use crate::config::ProcessingConfig;
use crate::error::AppError;
use crate::preview::types::PreviewSnapshot;
use crate::validation::SubmissionFile;

/// Boxed future returned by [`JobServiceOps`] methods.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AppError>> + Send + 'a>>;

/// Operations the orchestrator needs from the processing service.
pub trait JobServiceOps: Send + Sync + 'static {
    /// Uploads validated files with their processing options.
    fn submit_job<'a>(
        &'a self,
        files: &'a [SubmissionFile],
        config: &'a ProcessingConfig,
        on_progress: Option<ProgressCallback>,
        cancel: &'a CancellationToken,
    ) -> ServiceFuture<'a, UploadResponse>;

    /// Gets the current job status.
    fn get_job_status<'a>(&'a self, job_id: &'a str) -> ServiceFuture<'a, JobStatusResponse>;

    /// Gets the structured preview.
    fn get_job_preview<'a>(&'a self, job_id: &'a str) -> ServiceFuture<'a, PreviewSnapshot>;

    /// Gets signed download URLs.
    fn get_download_manifest<'a>(
        &'a self,
        job_id: &'a str,
        expiry_hours: u32,
    ) -> ServiceFuture<'a, DownloadManifest>;

    /// Fetches a result file as text.
    fn fetch_raw<'a>(&'a self, url: &'a str) -> ServiceFuture<'a, String>;
}

/// Implementation of JobServiceOps for the real HTTP client.
impl JobServiceOps for ApiClient {
    fn submit_job<'a>(
        &'a self,
        files: &'a [SubmissionFile],
        config: &'a ProcessingConfig,
        on_progress: Option<ProgressCallback>,
        cancel: &'a CancellationToken,
    ) -> ServiceFuture<'a, UploadResponse> {
        Box::pin(ApiClient::submit_job(self, files, config, on_progress, cancel))
    }

    fn get_job_status<'a>(&'a self, job_id: &'a str) -> ServiceFuture<'a, JobStatusResponse> {
        Box::pin(ApiClient::get_job_status(self, job_id))
    }

    fn get_job_preview<'a>(&'a self, job_id: &'a str) -> ServiceFuture<'a, PreviewSnapshot> {
        Box::pin(ApiClient::get_job_preview(self, job_id))
    }

    fn get_download_manifest<'a>(
        &'a self,
        job_id: &'a str,
        expiry_hours: u32,
    ) -> ServiceFuture<'a, DownloadManifest> {
        Box::pin(ApiClient::get_download_manifest(self, job_id, expiry_hours))
    }

    fn fetch_raw<'a>(&'a self, url: &'a str) -> ServiceFuture<'a, String> {
        Box::pin(ApiClient::fetch_raw(self, url))
    }
}
