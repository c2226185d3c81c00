use serde::Serialize;
use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for UI display.
/// Result URLs are pre-signed, so their signature parameters must never surface.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "sig=",
    "signature=",
    "token=",
    "x-amz-credential",
    "authorization:",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for UI display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) || msg.trim().is_empty() {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// User-friendly error presentation for the view layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Validation ────────────────────────────────────────────────────────────
    #[error("Invalid submission: {0}")]
    Validation(String),

    // ── Transport ─────────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    // ── Job lifecycle ─────────────────────────────────────────────────────────
    #[error("Job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("Preview unavailable for job {job_id}")]
    PreviewUnavailable { job_id: String },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Converts the error into a user-friendly presentation suitable for UI display.
    /// Never leaks signed URLs or their signature parameters.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Validation ────────────────────────────────────────────────────
            AppError::Validation(msg) => ErrorPresentation {
                title: "Cannot Start Processing".into(),
                message: sanitize_message(msg, "The submission is not valid."),
                action: Some("Fix the selection and try again".into()),
            },

            // ── Transport ─────────────────────────────────────────────────────
            AppError::ConnectionFailed(_) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: "Could not reach the processing service. Please check your internet connection.".into(),
                action: Some("Check network and retry".into()),
            },

            AppError::Http { status, message } => ErrorPresentation {
                title: "Service Error".into(),
                message: sanitize_message(
                    message,
                    &format!("The processing service returned an error (HTTP {}).", status),
                ),
                action: Some("Try again".into()),
            },

            AppError::RateLimited { retry_after_secs } => {
                let wait_msg = match retry_after_secs {
                    Some(secs) => format!("Please wait {} seconds before trying again.", secs),
                    None => "Please wait a moment before trying again.".into(),
                };
                ErrorPresentation {
                    title: "Too Many Requests".into(),
                    message: format!("The processing service is limiting requests. {}", wait_msg),
                    action: Some("Wait and retry".into()),
                }
            }

            AppError::NotFound(_) => ErrorPresentation {
                title: "Not Found".into(),
                message: "The job or file could not be found. It may have expired.".into(),
                action: Some("Submit the files again".into()),
            },

            AppError::InvalidResponse(_) => ErrorPresentation {
                title: "Unexpected Response".into(),
                message: "The processing service sent a response that could not be read.".into(),
                action: Some("Try again".into()),
            },

            // ── Job lifecycle ─────────────────────────────────────────────────
            AppError::JobFailed { job_id: _, message } => ErrorPresentation {
                title: "Processing Failed".into(),
                message: sanitize_message(message, "Processing failed"),
                action: Some("Review the configuration and try again".into()),
            },

            AppError::PreviewUnavailable { .. } => ErrorPresentation {
                title: "No Preview Available".into(),
                message: "Preview data is not available for this job. The output files can still be downloaded.".into(),
                action: None,
            },

            AppError::Cancelled => ErrorPresentation {
                title: "Cancelled".into(),
                message: "The operation was cancelled.".into(),
                action: None,
            },

            // ── Generic ───────────────────────────────────────────────────────
            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}

// Errors cross into the view layer as their presentation only.
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_presentation().serialize(serializer)
    }
}
