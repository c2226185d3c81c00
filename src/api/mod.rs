//! Surface generator service client.
//!
//! Provides:
//! - Transport with a single 502/503 retry and sanitized request logging
//! - Multipart job submission with upload progress
//! - Job status, preview, and download endpoints
//! - The `JobServiceOps` seam used by the orchestrator

pub mod client;
pub mod jobs;
pub mod service;
pub mod types;
pub mod upload;

pub use client::{sanitize_url_for_logs, ApiClient, LoggingMode};
pub use service::{JobServiceOps, ServiceFuture};
pub use types::{DownloadManifest, JobStatus, JobStatusResponse, UploadResponse};
pub use upload::{ProgressCallback, UploadProgress};
