pub mod api;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod preview;
pub mod retry;
pub mod state;
pub mod validation;

#[cfg(test)]
mod testing;

pub use api::{ApiClient, JobServiceOps};
pub use config::{ClientSettings, GridSpacing, OutputFormat, ProcessingConfig};
pub use error::{AppError, ErrorPresentation};
pub use orchestrator::{JobOrchestrator, ResultSummary, ResultView};
pub use preview::{PreviewSnapshot, PreviewSource};
pub use state::{Job, JobPhase};
