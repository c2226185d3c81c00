//! Post-completion result reconciliation.
//!
//! Once a job completes, the download manifest is requested straight away
//! while the preview endpoint is polled with bounded retries, since preview
//! data can lag behind the `completed` status. If the preview never becomes
//! usable, a CSV output named in the manifest is parsed instead.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::client::redact_id;
use crate::api::service::JobServiceOps;
use crate::api::types::DownloadManifest;
use crate::config::ClientSettings;
use crate::error::AppError;
use crate::preview::fallback;
use crate::preview::types::PreviewSnapshot;
use crate::retry::{poll_until, PollOutcome, RetryPolicy};

/// Where the stored preview came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewSource {
    /// The structured preview endpoint.
    Service,
    /// Parsed from a CSV output file.
    RawFile,
    /// No usable preview.
    None,
}

/// Everything fetched for one completion event.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledResults {
    pub job_id: String,
    pub preview: PreviewSnapshot,
    pub source: PreviewSource,
    pub preview_attempts: u32,
    /// `None` if the manifest request failed.
    pub manifest: Option<DownloadManifest>,
}

impl ReconciledResults {
    pub fn preview_available(&self) -> bool {
        self.source != PreviewSource::None
    }
}

pub struct PreviewReconciler<'a, S> {
    service: &'a S,
    policy: RetryPolicy,
    expiry_hours: u32,
}

impl<'a, S: JobServiceOps> PreviewReconciler<'a, S> {
    pub fn new(service: &'a S, settings: &ClientSettings) -> Self {
        Self {
            service,
            policy: RetryPolicy::new(settings.preview_attempts, settings.preview_retry_delay),
            expiry_hours: settings.download_expiry_hours,
        }
    }

    /// Fetches the manifest and preview for a completed job.
    ///
    /// A missing preview is not an error: the result then carries
    /// `PreviewSource::None` and an empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cancelled` if `cancel` fires before both fetches resolve.
    pub async fn reconcile(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ReconciledResults, AppError> {
        info!("[PREVIEW] Reconciling results for job {}", redact_id(job_id));

        let manifest = async {
            match self
                .service
                .get_download_manifest(job_id, self.expiry_hours)
                .await
            {
                Ok(manifest) => Some(manifest),
                Err(e) => {
                    warn!(
                        "[PREVIEW] Download manifest for job {} unavailable: {}",
                        redact_id(job_id),
                        e
                    );
                    None
                }
            }
        };

        let preview = poll_until(
            self.policy,
            cancel,
            |attempt| {
                debug!(
                    "[PREVIEW] Attempt {}/{} for job {}",
                    attempt,
                    self.policy.max_attempts(),
                    redact_id(job_id)
                );
                self.service.get_job_preview(job_id)
            },
            PreviewSnapshot::is_valid,
        );

        let (manifest, outcome) = tokio::join!(manifest, preview);

        let (preview, source, preview_attempts) = match outcome {
            PollOutcome::Satisfied { value, attempts } => {
                info!(
                    "[PREVIEW] Preview for job {} ready after {} attempt(s)",
                    redact_id(job_id),
                    attempts
                );
                (value, PreviewSource::Service, attempts)
            }
            PollOutcome::Exhausted { attempts } => {
                warn!(
                    "[PREVIEW] No preview for job {} after {} attempts, trying raw output",
                    redact_id(job_id),
                    attempts
                );
                let (snapshot, source) = self.fallback(job_id, manifest.as_ref()).await;
                (snapshot, source, attempts)
            }
            PollOutcome::Cancelled => return Err(AppError::Cancelled),
        };

        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        Ok(ReconciledResults {
            job_id: job_id.to_string(),
            preview,
            source,
            preview_attempts,
            manifest,
        })
    }

    async fn fallback(
        &self,
        job_id: &str,
        manifest: Option<&DownloadManifest>,
    ) -> (PreviewSnapshot, PreviewSource) {
        let Some((name, url)) = manifest.and_then(DownloadManifest::csv_entry) else {
            info!(
                "[PREVIEW] Job {} has no CSV output to build a preview from",
                redact_id(job_id)
            );
            return (PreviewSnapshot::Empty, PreviewSource::None);
        };

        match self.service.fetch_raw(url).await {
            Ok(text) => match fallback::snapshot_from_text(&text, name) {
                PreviewSnapshot::Empty => {
                    warn!("[PREVIEW] {} contained no usable points", name);
                    (PreviewSnapshot::Empty, PreviewSource::None)
                }
                snapshot => {
                    info!("[PREVIEW] Built preview for job {} from {}", redact_id(job_id), name);
                    (snapshot, PreviewSource::RawFile)
                }
            },
            Err(e) => {
                warn!("[PREVIEW] Failed to fetch {}: {}", name, e);
                (PreviewSnapshot::Empty, PreviewSource::None)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
