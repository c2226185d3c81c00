//! Wire types for the surface generator service.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Job lifecycle status as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Deleted,
    /// Any status this client does not know; treated as still running.
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Returns true if no further transitions can happen.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Deleted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Deleted => "deleted",
            JobStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response to `POST /api/v1/upload/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub files_uploaded: u32,
}

/// Response to `GET /api/v1/jobs/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    /// Percent complete; the service may send integers or floats.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub input_files: Vec<String>,
    #[serde(default)]
    pub output_files: Option<Vec<String>>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl JobStatusResponse {
    /// Progress clamped to 0–100 and rounded, if the service reported one.
    pub fn progress_percent(&self) -> Option<u8> {
        self.progress
            .filter(|p| p.is_finite())
            .map(|p| p.clamp(0.0, 100.0).round() as u8)
    }
}

/// Response to `GET /api/v1/download/{id}`: file name → time-limited URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadManifest {
    pub job_id: String,
    #[serde(rename = "download_urls", default)]
    pub urls: BTreeMap<String, String>,
    pub expires_at: String,
}

impl DownloadManifest {
    /// First entry (by name) whose file name ends in `.csv`, case-insensitively.
    pub fn csv_entry(&self) -> Option<(&str, &str)> {
        self.urls
            .iter()
            .find(|(name, _)| name.to_ascii_lowercase().ends_with(".csv"))
            .map(|(name, url)| (name.as_str(), url.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_does_not_fail_decoding() {
        let status: JobStatus = serde_json::from_str("\"archiving\"").unwrap();
        assert_eq!(status, JobStatus::Unknown);
        assert!(!status.is_terminal());
    }

    #[test]
    fn status_response_tolerates_sparse_payload() {
        let response: JobStatusResponse =
            serde_json::from_str(r#"{"job_id":"j1","status":"processing","progress":41.6}"#)
                .unwrap();
        assert_eq!(response.progress_percent(), Some(42));
        assert!(response.input_files.is_empty());
        assert!(response.error_message.is_none());
    }

    #[test]
    fn progress_is_clamped() {
        let mut response: JobStatusResponse =
            serde_json::from_str(r#"{"job_id":"j1","status":"processing","progress":140}"#)
                .unwrap();
        assert_eq!(response.progress_percent(), Some(100));
        response.progress = Some(-3.0);
        assert_eq!(response.progress_percent(), Some(0));
    }

    #[test]
    fn manifest_finds_csv_case_insensitively() {
        let manifest: DownloadManifest = serde_json::from_str(
            r#"{"job_id":"j1","download_urls":{"surface.dxf":"https://x/a","Surface.CSV":"https://x/b"},"expires_at":"2026-10-18T12:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(manifest.csv_entry(), Some(("Surface.CSV", "https://x/b")));
    }
}
