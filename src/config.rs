//! Processing options and client settings.
//!
//! `ProcessingConfig` is the per-job option set sent with an upload.
//! `ClientSettings` holds the transport and lifecycle tunables; its `Default`
//! carries the reference constants and `from_env()` layers environment overrides.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Production surface generator service.
pub const DEFAULT_API_BASE_URL: &str =
    "https://surface-gen-api.purplebush-adcf4e3b.eastus.azurecontainerapps.io";

/// Interval between status checks (ms).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3000;

/// Status polling never runs faster than this.
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Total preview attempts (1 initial + 5 retries).
pub const DEFAULT_PREVIEW_ATTEMPTS: u32 = 6;

/// Delay between preview attempts (ms).
pub const DEFAULT_PREVIEW_RETRY_DELAY_MS: u64 = 2000;

/// Delay before the transport's single 502/503 retry (ms).
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Request timeout (seconds). Uploads of large point clouds are slow.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Lifetime of signed download URLs (hours).
pub const DEFAULT_DOWNLOAD_EXPIRY_HOURS: u32 = 1;

/// Breakline detail threshold bounds.
pub const MIN_THRESHOLD: f64 = 0.1;
pub const MAX_THRESHOLD: f64 = 0.3;
pub const DEFAULT_THRESHOLD: f64 = 0.1;

const ENV_BASE_URL: &str = "SURFACE_GEN_API_BASE_URL";
const ENV_POLL_INTERVAL_MS: &str = "SURFACE_GEN_POLL_INTERVAL_MS";
const ENV_PREVIEW_ATTEMPTS: &str = "SURFACE_GEN_PREVIEW_ATTEMPTS";
const ENV_PREVIEW_DELAY_MS: &str = "SURFACE_GEN_PREVIEW_DELAY_MS";

// ─────────────────────────────────────────────────────────────────────────────
// Processing options
// ─────────────────────────────────────────────────────────────────────────────

/// Output grid spacing in feet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum GridSpacing {
    #[default]
    Feet25,
    Feet50,
}

impl GridSpacing {
    pub fn as_feet(self) -> u32 {
        match self {
            GridSpacing::Feet25 => 25,
            GridSpacing::Feet50 => 50,
        }
    }
}

impl TryFrom<u32> for GridSpacing {
    type Error = AppError;

    fn try_from(feet: u32) -> Result<Self, Self::Error> {
        match feet {
            25 => Ok(GridSpacing::Feet25),
            50 => Ok(GridSpacing::Feet50),
            other => Err(AppError::Validation(format!(
                "Grid spacing must be 25 or 50 feet (got {})",
                other
            ))),
        }
    }
}

impl From<GridSpacing> for u32 {
    fn from(spacing: GridSpacing) -> Self {
        spacing.as_feet()
    }
}

/// Output file format produced by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Dxf,
    Csv,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Dxf => "dxf",
            OutputFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dxf" => Ok(OutputFormat::Dxf),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(AppError::Validation(format!(
                "Unsupported output format '{}' (expected dxf or csv)",
                other
            ))),
        }
    }
}

/// Per-job processing options sent alongside the uploaded files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub grid_spacing: GridSpacing,
    pub threshold: f64,
    pub nth_point: Option<u32>,
    pub source_epsg: Option<u32>,
    pub target_epsg: Option<u32>,
    pub output_formats: Vec<OutputFormat>,
    pub merge_outputs: bool,
    pub merged_output_name: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            grid_spacing: GridSpacing::default(),
            threshold: DEFAULT_THRESHOLD,
            nth_point: None,
            source_epsg: None,
            target_epsg: None,
            output_formats: vec![OutputFormat::Dxf],
            merge_outputs: false,
            merged_output_name: None,
        }
    }
}

impl ProcessingConfig {
    /// Comma-joined output formats, duplicates removed, selection order kept.
    pub fn output_formats_param(&self) -> String {
        let mut seen: Vec<OutputFormat> = Vec::with_capacity(self.output_formats.len());
        for format in &self.output_formats {
            if !seen.contains(format) {
                seen.push(*format);
            }
        }
        seen.iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Multipart text fields for the upload request. Optional fields are only
    /// included when set; the merged output name only when merging.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("voxel_size", self.grid_spacing.as_feet().to_string()),
            ("threshold", self.threshold.to_string()),
        ];

        if let Some(nth) = self.nth_point {
            fields.push(("nth_point", nth.to_string()));
        }
        if let Some(epsg) = self.source_epsg {
            fields.push(("source_epsg", epsg.to_string()));
        }
        if let Some(epsg) = self.target_epsg {
            fields.push(("target_epsg", epsg.to_string()));
        }
        fields.push(("output_formats", self.output_formats_param()));
        fields.push(("merge_outputs", self.merge_outputs.to_string()));

        if self.merge_outputs {
            if let Some(name) = self.merged_output_name.as_deref().map(str::trim) {
                if !name.is_empty() {
                    fields.push(("merged_output_name", name.to_string()));
                }
            }
        }

        fields
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client settings
// ─────────────────────────────────────────────────────────────────────────────

/// Transport and lifecycle tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub base_url: Url,
    pub request_timeout: Duration,
    pub retry_delay: Duration,
    pub poll_interval: Duration,
    pub preview_attempts: u32,
    pub preview_retry_delay: Duration,
    pub download_expiry_hours: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            // Constant literal; parsing cannot fail.
            base_url: Url::parse(DEFAULT_API_BASE_URL)
                .unwrap_or_else(|_| unreachable!("default base URL is valid")),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            preview_attempts: DEFAULT_PREVIEW_ATTEMPTS,
            preview_retry_delay: Duration::from_millis(DEFAULT_PREVIEW_RETRY_DELAY_MS),
            download_expiry_hours: DEFAULT_DOWNLOAD_EXPIRY_HOURS,
        }
    }
}

impl ClientSettings {
    /// Defaults overridden by `SURFACE_GEN_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if the base URL override is not a valid URL.
    /// Unparseable numeric overrides are logged and ignored.
    pub fn from_env() -> Result<Self, AppError> {
        let mut settings = Self::default();

        if let Ok(raw) = std::env::var(ENV_BASE_URL) {
            settings = settings.with_base_url(&raw)?;
        }
        if let Some(ms) = env_number::<u64>(ENV_POLL_INTERVAL_MS) {
            settings = settings.with_poll_interval(Duration::from_millis(ms));
        }
        if let Some(attempts) = env_number::<u32>(ENV_PREVIEW_ATTEMPTS) {
            settings.preview_attempts = attempts.max(1);
        }
        if let Some(ms) = env_number::<u64>(ENV_PREVIEW_DELAY_MS) {
            settings.preview_retry_delay = Duration::from_millis(ms);
        }

        Ok(settings)
    }

    /// # Errors
    ///
    /// Returns `AppError::Validation` if `raw` is not an absolute http(s) URL.
    pub fn with_base_url(mut self, raw: &str) -> Result<Self, AppError> {
        let url = Url::parse(raw.trim())
            .map_err(|e| AppError::Validation(format!("Invalid API base URL: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(AppError::Validation(format!(
                "API base URL must be http(s): {}",
                raw
            )));
        }
        self.base_url = url;
        Ok(self)
    }

    /// Sets the status poll interval, raised to at least `MIN_POLL_INTERVAL_MS`.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(MIN_POLL_INTERVAL_MS));
        self
    }

    pub fn with_preview_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.preview_attempts = attempts.max(1);
        self.preview_retry_delay = delay;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_download_expiry_hours(mut self, hours: u32) -> Self {
        self.download_expiry_hours = hours.max(1);
        self
    }
}

fn env_number<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("[CONFIG] Ignoring {}: '{}' is not a valid number", key, raw);
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
