//! Pre-flight validation of a job submission.
//!
//! Everything here runs before any request is issued: the selected files must
//! exist, be non-empty point clouds (`.las` / `.laz`), and the processing options
//! must be within the ranges the service accepts.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::config::{ProcessingConfig, MAX_THRESHOLD, MIN_THRESHOLD};
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Accepted point cloud extensions (compared case-insensitively).
pub const ALLOWED_EXTENSIONS: &[&str] = &["las", "laz"];

/// Files above this size upload slowly enough to be worth a warning (2 GB).
const LARGE_FILE_THRESHOLD: u64 = 2 * 1024 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// A file that passed validation, ready to be streamed into an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionFile {
    pub path: PathBuf,
    /// File name sent in the multipart part.
    pub file_name: String,
    pub size_bytes: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Validates the selected files and processing options.
///
/// # Arguments
///
/// * `files` - Paths selected for upload
/// * `config` - Processing options for the job
///
/// # Returns
///
/// The files with their resolved names and sizes, in selection order.
///
/// # Errors
///
/// Returns `AppError::Validation` for the first problem found.
pub async fn validate_submission(
    files: &[PathBuf],
    config: &ProcessingConfig,
) -> Result<Vec<SubmissionFile>, AppError> {
    if files.is_empty() {
        return Err(AppError::Validation("No files selected".into()));
    }
    validate_config(config)?;

    let mut validated = Vec::with_capacity(files.len());
    for path in files {
        validated.push(validate_file(path).await?);
    }
    Ok(validated)
}

/// Validates processing options alone.
///
/// # Errors
///
/// Returns `AppError::Validation` if no output format is selected, the threshold
/// is outside the accepted range, or an optional field is set to an unusable value.
pub fn validate_config(config: &ProcessingConfig) -> Result<(), AppError> {
    if config.output_formats.is_empty() {
        return Err(AppError::Validation(
            "Select at least one output format".into(),
        ));
    }

    if !config.threshold.is_finite()
        || config.threshold < MIN_THRESHOLD
        || config.threshold > MAX_THRESHOLD
    {
        return Err(AppError::Validation(format!(
            "Threshold must be between {} and {} (got {})",
            MIN_THRESHOLD, MAX_THRESHOLD, config.threshold
        )));
    }

    if config.nth_point == Some(0) {
        return Err(AppError::Validation(
            "Point decimation (nth point) must be at least 1".into(),
        ));
    }

    if config.merge_outputs {
        if let Some(name) = &config.merged_output_name {
            if name.trim().is_empty() {
                return Err(AppError::Validation("Merged output name is empty".into()));
            }
            if name.contains(['/', '\\']) {
                return Err(AppError::Validation(
                    "Merged output name must not contain path separators".into(),
                ));
            }
        }
    }

    Ok(())
}

/// Returns true if the path carries an accepted point cloud extension.
pub fn has_point_cloud_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ALLOWED_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

async fn validate_file(path: &Path) -> Result<SubmissionFile, AppError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(String::from)
        .ok_or_else(|| {
            AppError::Validation(format!("Invalid file name: {}", path.display()))
        })?;

    if !has_point_cloud_extension(path) {
        return Err(AppError::Validation(format!(
            "{} is not a LAS/LAZ file",
            file_name
        )));
    }

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| AppError::Validation(format!("Cannot read {}: {}", file_name, e)))?;

    if !metadata.is_file() {
        return Err(AppError::Validation(format!("{} is not a file", file_name)));
    }
    if metadata.len() == 0 {
        return Err(AppError::Validation(format!("{} is empty", file_name)));
    }
    if metadata.len() > LARGE_FILE_THRESHOLD {
        warn!(
            "[UPLOAD] {} is {} bytes; upload may take a while",
            file_name,
            metadata.len()
        );
    }

    Ok(SubmissionFile {
        path: path.to_path_buf(),
        file_name,
        size_bytes: metadata.len(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
