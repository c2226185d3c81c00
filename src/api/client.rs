//! HTTP transport for the surface generator service with safe logging.
//!
//! Every request goes through [`ApiClient::send_with_retry`], which retries once
//! on 502/503 after a short delay. Requests are described by a builder closure
//! so that bodies which cannot be cloned (streamed multipart uploads) are rebuilt
//! for the retry.

use std::future::Future;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{info, warn};
use url::Url;

use crate::config::ClientSettings;
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all service requests.
const CLIENT_USER_AGENT: &str = concat!("SurfaceGenClient/", env!("CARGO_PKG_VERSION"));

/// Query parameter keys (case-insensitive) that should have their values redacted.
/// Download URLs are pre-signed blob URLs carrying SAS parameters.
const SENSITIVE_QUERY_PARAMS: &[&str] = &[
    "sig",
    "signature",
    "token",
    "access_token",
    "skoid",
    "sktid",
    "x-amz-signature",
    "x-amz-credential",
    "x-amz-security-token",
];

/// Statuses the transport retries once.
const RETRYABLE_STATUSES: &[StatusCode] =
    &[StatusCode::BAD_GATEWAY, StatusCode::SERVICE_UNAVAILABLE];

// ─────────────────────────────────────────────────────────────────────────────
// LoggingMode
// ─────────────────────────────────────────────────────────────────────────────

/// Controls how URLs are sanitized for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingMode {
    /// Log only the path component. Strips scheme, host, query, and fragment.
    /// Example: `/api/v1/jobs/abc`
    #[default]
    PathOnly,

    /// Log path and query parameters, but redact sensitive values.
    /// Example: `/results/out.csv?sv=2021-08-06&sig=***`
    PathAndQueryRedacted,
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Sanitization
// ─────────────────────────────────────────────────────────────────────────────

fn is_sensitive_param(key: &str) -> bool {
    let key_lower = key.to_ascii_lowercase();
    SENSITIVE_QUERY_PARAMS
        .iter()
        .any(|&sensitive| key_lower == sensitive)
}

/// Sanitizes a URL for safe logging based on the specified mode.
///
/// # Returns
///
/// A string safe for logging that never contains the scheme, host, or fragment.
pub fn sanitize_url_for_logs(url: &Url, mode: LoggingMode) -> String {
    let path = url.path();

    match mode {
        LoggingMode::PathOnly => path.to_string(),
        LoggingMode::PathAndQueryRedacted => {
            let query_pairs: Vec<_> = url.query_pairs().collect();
            if query_pairs.is_empty() {
                return path.to_string();
            }

            let redacted_pairs: Vec<String> = query_pairs
                .into_iter()
                .map(|(key, value)| {
                    if is_sensitive_param(&key) {
                        format!("{}=***", key)
                    } else {
                        format!("{}={}", key, value)
                    }
                })
                .collect();

            format!("{}?{}", path, redacted_pairs.join("&"))
        }
    }
}

/// Redacts a job ID for logging (shows first 8 chars).
pub(crate) fn redact_id(id: &str) -> String {
    match id.char_indices().nth(8) {
        Some((idx, _)) => format!("{}...", &id[..idx]),
        None => id.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ApiClient
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable HTTP client bound to one service base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    retry_delay: Duration,
    logging_mode: LoggingMode,
}

impl ApiClient {
    /// Creates a client from the given settings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the HTTP client fails to initialize.
    pub fn new(settings: &ClientSettings) -> Result<Self, AppError> {
        let http = build_http_client(settings.request_timeout)?;
        Ok(Self {
            http,
            base_url: settings.base_url.clone(),
            retry_delay: settings.retry_delay,
            logging_mode: LoggingMode::default(),
        })
    }

    /// Updates the logging mode for URL sanitization.
    pub fn with_logging_mode(mut self, mode: LoggingMode) -> Self {
        self.logging_mode = mode;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Builds a service URL by appending percent-encoded path segments to the
    /// base URL. A trailing empty segment yields a trailing slash.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the base URL cannot carry a path.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<Url, AppError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::Internal("Base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sends a request, retrying once after `retry_delay` if the service answers
    /// 502 or 503.
    ///
    /// `build` is invoked once per attempt and must produce a fresh request.
    /// The returned response may carry any status; see [`error_for_status`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConnectionFailed` for network errors, or whatever error
    /// `build` produces.
    pub(crate) async fn send_with_retry<F, Fut>(
        &self,
        method: Method,
        url: &Url,
        build: F,
    ) -> Result<reqwest::Response, AppError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<reqwest::RequestBuilder, AppError>>,
    {
        let request = build().await?;
        let response = self.execute_with_logging(request, &method, url).await?;

        if !RETRYABLE_STATUSES.contains(&response.status()) {
            return Ok(response);
        }

        info!(
            "[API] {} {} -> {}, retrying in {}ms",
            method,
            sanitize_url_for_logs(url, self.logging_mode),
            response.status().as_u16(),
            self.retry_delay.as_millis()
        );
        drop(response);
        tokio::time::sleep(self.retry_delay).await;

        let request = build().await?;
        self.execute_with_logging(request, &method, url).await
    }

    /// GETs a service URL and decodes a JSON body.
    ///
    /// # Errors
    ///
    /// Transport errors, non-success statuses (via [`error_for_status`]), or
    /// `AppError::InvalidResponse` if the body does not decode.
    pub(crate) async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, AppError> {
        let http = &self.http;
        let response = self
            .send_with_retry(Method::GET, url, || {
                std::future::ready(Ok::<_, AppError>(http.get(url.clone())))
            })
            .await?;
        let response = error_for_status(response).await?;
        decode_json(response).await
    }

    /// Executes a request with timing, logging, and error handling.
    ///
    /// Never logs request bodies or raw reqwest errors (which may contain the
    /// full signed URL).
    async fn execute_with_logging(
        &self,
        request: reqwest::RequestBuilder,
        method: &Method,
        url: &Url,
    ) -> Result<reqwest::Response, AppError> {
        let start = Instant::now();
        let sanitized_url = sanitize_url_for_logs(url, self.logging_mode);

        let result = request.send().await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(response) => {
                let x_request_id = response
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");

                info!(
                    "[API] {} {} {} {}ms {}",
                    method,
                    sanitized_url,
                    response.status().as_u16(),
                    duration_ms,
                    x_request_id
                );

                Ok(response)
            }
            Err(e) => {
                info!("[API] {} {} FAILED {}ms", method, sanitized_url, duration_ms);

                let reason = if e.is_timeout() {
                    "Request to the processing service timed out"
                } else {
                    "Connection to the processing service failed"
                };
                Err(AppError::ConnectionFailed(reason.to_string()))
            }
        }
    }
}

/// Builds the configured HTTP client.
fn build_http_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Response handling
// ─────────────────────────────────────────────────────────────────────────────

/// Passes successful responses through and converts the rest into errors.
///
/// # Errors
///
/// - 429 → `AppError::RateLimited` with the `Retry-After` seconds if present
/// - 404 → `AppError::NotFound`
/// - otherwise `AppError::Http`, using the service's `detail` message when the
///   body carries one
pub(crate) async fn error_for_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        return Err(AppError::RateLimited {
            retry_after_secs: retry_after,
        });
    }

    if status == StatusCode::NOT_FOUND {
        return Err(AppError::NotFound(
            "Requested job or file not found".to_string(),
        ));
    }

    let body = response.text().await.unwrap_or_default();
    let message = extract_detail(&body).unwrap_or_else(|| {
        format!(
            "HTTP {} - {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown error")
        )
    });

    warn!("[API] Request failed with HTTP {}", status.as_u16());
    Err(AppError::Http {
        status: status.as_u16(),
        message,
    })
}

/// Extracts the service's error detail. It is either a string or a list of
/// validation entries with `msg` fields.
fn extract_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Array(entries) => {
            let messages: Vec<&str> = entries
                .iter()
                .filter_map(|entry| entry.get("msg").and_then(|m| m.as_str()))
                .collect();
            if messages.is_empty() {
                None
            } else {
                Some(messages.join("; "))
            }
        }
        _ => None,
    }
}

/// Decodes a JSON response body.
///
/// # Errors
///
/// Returns `AppError::InvalidResponse` if the body cannot be read or decoded.
pub(crate) async fn decode_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, AppError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|_| AppError::InvalidResponse("Failed to read response body".to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AppError::InvalidResponse(format!("Failed to parse response: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
