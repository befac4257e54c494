//! Probe executor: one bounded HTTP request against a tracked API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderName};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::db::entities::tracked_api;
use crate::monitoring::fingerprint::{ResponseShape, fingerprint};

/// Longest error message kept on a health-check record.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

const DEPRECATION: HeaderName = HeaderName::from_static("deprecation");
const SUNSET: HeaderName = HeaderName::from_static("sunset");
const WARNING: HeaderName = HeaderName::from_static("warning");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    Timeout,
    Connect,
    Tls,
    /// Any other failure while sending the request or reading the head.
    Request,
    /// The response head arrived but reading the body failed.
    Body,
    /// A response arrived with a status outside the expected family.
    UnexpectedStatus,
    /// The monitor itself could not run the probe. Says nothing about the
    /// target.
    Monitor,
}

impl ProbeErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProbeErrorKind::Timeout => "timeout",
            ProbeErrorKind::Connect => "connect",
            ProbeErrorKind::Tls => "tls",
            ProbeErrorKind::Request => "request",
            ProbeErrorKind::Body => "body",
            ProbeErrorKind::UnexpectedStatus => "unexpected_status",
            ProbeErrorKind::Monitor => "monitor",
        }
    }

    pub fn is_monitor_side(self) -> bool {
        matches!(self, ProbeErrorKind::Monitor)
    }
}

impl fmt::Display for ProbeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the response headers said about the API's lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeprecationSignal {
    #[default]
    None,
    Deprecated,
    /// An explicit `Deprecation: false`, which lifts a sticky DEPRECATED.
    Undeprecated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub checked_at: DateTime<Utc>,
    /// A response arrived and its status is in the expected family.
    pub success: bool,
    pub status_code: Option<u16>,
    pub latency: Duration,
    pub fingerprint: Option<String>,
    pub error_kind: Option<ProbeErrorKind>,
    pub error_message: Option<String>,
    pub deprecation: DeprecationSignal,
}

impl ProbeResult {
    pub fn failure(kind: ProbeErrorKind, message: impl Into<String>, latency: Duration) -> Self {
        Self {
            checked_at: Utc::now(),
            success: false,
            status_code: None,
            latency,
            fingerprint: None,
            error_kind: Some(kind),
            error_message: Some(truncate_chars(&message.into(), MAX_ERROR_MESSAGE_CHARS)),
            deprecation: DeprecationSignal::None,
        }
    }

    pub fn latency_ms(&self) -> u64 {
        u64::try_from(self.latency.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn is_monitor_error(&self) -> bool {
        self.error_kind.is_some_and(ProbeErrorKind::is_monitor_side)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub timeout_seconds: u64,
    pub max_body_bytes: usize,
    pub user_agent: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            max_body_bytes: 4096,
            user_agent: format!("apiwatch/{}", crate::version::VERSION),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

#[async_trait]
pub trait Prober: Send + Sync {
    /// Never fails: every outcome, including monitor-side trouble, is
    /// reported through the returned [`ProbeResult`].
    async fn probe(&self, api: &tracked_api::Model) -> ProbeResult;
}

pub struct HttpProber {
    client: Client,
    max_body_bytes: usize,
}

impl HttpProber {
    pub fn new(config: &ProbeConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, api: &tracked_api::Model) -> ProbeResult {
        let url = api.effective_health_check_url();
        let Ok(method) = Method::from_bytes(api.http_method.to_ascii_uppercase().as_bytes()) else {
            return ProbeResult::failure(
                ProbeErrorKind::Monitor,
                format!("unsupported HTTP method '{}'", api.http_method),
                Duration::ZERO,
            );
        };

        let start_time = Instant::now();
        let response = match self.client.request(method, url).send().await {
            Ok(response) => response,
            Err(e) => {
                let kind = classify_reqwest_error(&e);
                debug!(api_id = api.id, url, kind = %kind, error = %e, "Probe request failed.");
                return ProbeResult::failure(kind, error_chain(&e), start_time.elapsed());
            }
        };

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = read_body_prefix(response, self.max_body_bytes).await;
        let latency = start_time.elapsed();

        let mut result = ProbeResult {
            checked_at: Utc::now(),
            success: false,
            status_code: Some(status),
            latency,
            fingerprint: None,
            error_kind: None,
            error_message: None,
            deprecation: deprecation_signal(&headers),
        };

        let (prefix, complete) = match body {
            Ok(body) => body,
            Err(e) => {
                result.error_kind = Some(ProbeErrorKind::Body);
                result.error_message =
                    Some(truncate_chars(&error_chain(&e), MAX_ERROR_MESSAGE_CHARS));
                return result;
            }
        };

        let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .or(complete.then_some(prefix.len() as u64));
        result.fingerprint = Some(fingerprint(&ResponseShape {
            status,
            content_type,
            content_length,
            body_prefix: &prefix,
            body_complete: complete,
        }));

        let expected = u16::try_from(api.expected_status).unwrap_or(200);
        if same_status_family(status, expected) {
            result.success = true;
        } else {
            result.error_kind = Some(ProbeErrorKind::UnexpectedStatus);
            result.error_message = Some(format!("Expected status {expected} but got {status}"));
        }
        result
    }
}

pub fn same_status_family(observed: u16, expected: u16) -> bool {
    observed / 100 == expected / 100
}

/// Reads at most `limit` bytes. The flag is `true` when the whole body fit.
async fn read_body_prefix(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<(Vec<u8>, bool), reqwest::Error> {
    let mut buf = Vec::with_capacity(limit.min(8 * 1024));
    while let Some(chunk) = response.chunk().await? {
        let room = limit.saturating_sub(buf.len());
        if chunk.len() > room {
            buf.extend_from_slice(&chunk[..room]);
            return Ok((buf, false));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok((buf, true))
}

fn classify_reqwest_error(e: &reqwest::Error) -> ProbeErrorKind {
    if e.is_timeout() {
        ProbeErrorKind::Timeout
    } else if e.is_builder() {
        ProbeErrorKind::Monitor
    } else if e.is_connect() {
        if mentions_tls(e) {
            ProbeErrorKind::Tls
        } else {
            ProbeErrorKind::Connect
        }
    } else if e.is_body() || e.is_decode() {
        ProbeErrorKind::Body
    } else {
        ProbeErrorKind::Request
    }
}

fn mentions_tls(e: &reqwest::Error) -> bool {
    let chain = error_chain(e).to_ascii_lowercase();
    ["certificate", "tls", "handshake", "ssl"]
        .iter()
        .any(|needle| chain.contains(needle))
}

/// `reqwest` keeps the useful part of an error in its sources.
fn error_chain(e: &(dyn StdError + 'static)) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// Lifecycle hints from `Deprecation` (RFC 9745), `Sunset` (RFC 8594) and
/// `Warning: 299` headers.
pub fn deprecation_signal(headers: &HeaderMap) -> DeprecationSignal {
    let mut signal = DeprecationSignal::None;
    if let Some(value) = headers.get(DEPRECATION).and_then(|v| v.to_str().ok()) {
        if value.trim().eq_ignore_ascii_case("false") {
            signal = DeprecationSignal::Undeprecated;
        } else {
            return DeprecationSignal::Deprecated;
        }
    }
    if headers.contains_key(SUNSET) {
        return DeprecationSignal::Deprecated;
    }
    let deprecation_warning = headers
        .get_all(WARNING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| {
            let v = v.trim_start();
            v.starts_with("299") && v.to_ascii_lowercase().contains("deprecat")
        });
    if deprecation_warning {
        return DeprecationSignal::Deprecated;
    }
    signal
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn no_lifecycle_headers() {
        assert_eq!(deprecation_signal(&HeaderMap::new()), DeprecationSignal::None);
    }

    #[test]
    fn deprecation_header_marks_deprecated() {
        let h = headers(&[("deprecation", "@1688169599")]);
        assert_eq!(deprecation_signal(&h), DeprecationSignal::Deprecated);
        let h = headers(&[("deprecation", "true")]);
        assert_eq!(deprecation_signal(&h), DeprecationSignal::Deprecated);
    }

    #[test]
    fn explicit_false_lifts_deprecation() {
        let h = headers(&[("deprecation", "False")]);
        assert_eq!(deprecation_signal(&h), DeprecationSignal::Undeprecated);
    }

    #[test]
    fn sunset_wins_over_explicit_false() {
        let h = headers(&[("deprecation", "false"), ("sunset", "Wed, 11 Nov 2026 23:59:59 GMT")]);
        assert_eq!(deprecation_signal(&h), DeprecationSignal::Deprecated);
    }

    #[test]
    fn warning_299_mentioning_deprecation() {
        let h = headers(&[("warning", "299 - \"This endpoint is Deprecated\"")]);
        assert_eq!(deprecation_signal(&h), DeprecationSignal::Deprecated);
        let h = headers(&[("warning", "199 - \"deprecated soon\"")]);
        assert_eq!(deprecation_signal(&h), DeprecationSignal::None);
    }

    #[test]
    fn status_family() {
        assert!(same_status_family(204, 200));
        assert!(same_status_family(200, 200));
        assert!(!same_status_family(301, 200));
        assert!(!same_status_family(500, 200));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        let long = "x".repeat(MAX_ERROR_MESSAGE_CHARS + 20);
        let failure = ProbeResult::failure(ProbeErrorKind::Connect, long, Duration::ZERO);
        assert_eq!(
            failure.error_message.map(|m| m.chars().count()),
            Some(MAX_ERROR_MESSAGE_CHARS)
        );
    }

    #[test]
    fn monitor_side_errors() {
        assert!(ProbeErrorKind::Monitor.is_monitor_side());
        assert!(!ProbeErrorKind::Timeout.is_monitor_side());
    }
}
