//! Result previews.
//!
//! Provides:
//! - Preview data model and the wire shape of the preview endpoint
//! - CSV fallback parsing for when the endpoint never returns points
//! - Post-completion reconciliation of previews and download URLs

pub mod fallback;
pub mod reconciler;
pub mod types;

pub use reconciler::{PreviewReconciler, PreviewSource, ReconciledResults};
pub use types::{FilePreview, MultiFilePreview, PointRecord, PreviewSnapshot};
