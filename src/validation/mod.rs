//! Submission validation.
//!
//! Checks selected files and processing options before an upload is attempted,
//! so invalid selections never reach the service.

pub mod submission;

pub use submission::{
    has_point_cloud_extension, validate_config, validate_submission, SubmissionFile,
    ALLOWED_EXTENSIONS,
};
