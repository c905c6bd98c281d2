//! Outbound probe transport.
//!
//! Sends a [`ParsedRequest`] exactly as parsed: only caller-supplied headers
//! go on the wire, cookies are folded into a single `Cookie` header, and an
//! empty-valued `User-Agent` is omitted entirely so the probe can observe
//! what the server does when the header is absent.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::encoding;
use crate::error::Error;
use crate::model::{FieldMap, ParsedRequest, ResponseCookie, ResponseData, ValidationConfig};

const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);
const MAX_REDIRECTS: usize = 10;

/// One engine per batch: the underlying client is reused across probes so
/// connections are too.
pub struct HttpEngine {
    client: reqwest::Client,
}

impl HttpEngine {
    pub fn new(config: &ValidationConfig) -> Result<Self, Error> {
        let redirect_policy = if config.follow_redirect {
            redirect::Policy::limited(MAX_REDIRECTS)
        } else {
            redirect::Policy::none()
        };

        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout())
            .redirect(redirect_policy);

        if let Some(proxy_url) = config.proxy.as_deref() {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|err| Error::Transport(format!("invalid proxy URL: {err}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|err| Error::Transport(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }

    /// Sends the request once and buffers the full response.
    pub async fn send(&self, request: &ParsedRequest) -> Result<ResponseData, Error> {
        let method = http::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| Error::Transport(format!("invalid method '{}'", request.method)))?;

        let headers = build_headers(request)?;
        let mut builder = self
            .client
            .request(method, request.url.as_str())
            .headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let started = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;
        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();

        let mut headers = FieldMap::new();
        let mut cookies = Vec::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            if name == &reqwest::header::SET_COOKIE {
                if let Some(cookie) = parse_set_cookie(&value) {
                    cookies.push(cookie);
                }
            }
            // First value wins for repeated response headers.
            if !headers.contains_key(name.as_str()) {
                headers.insert(name.as_str().to_string(), value);
            }
        }
        let content_type = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.clone())
            .unwrap_or_default();

        let raw_body = response
            .bytes()
            .await
            .map_err(|err| Error::Transport(format!("failed to read response body: {err}")))?
            .to_vec();
        let duration = started.elapsed();

        let (body, detected_encoding) = encoding::auto_detect(&raw_body, &content_type);
        debug!(
            status = status_code,
            bytes = raw_body.len(),
            encoding = detected_encoding,
            url = %final_url,
            "probe response received"
        );

        Ok(ResponseData {
            status_code,
            headers,
            content_length: raw_body.len() as u64,
            character_count: body.chars().count(),
            detected_encoding: detected_encoding.to_string(),
            body,
            raw_body,
            cookies,
            url: final_url,
            duration,
        })
    }

    /// Retries transport failures up to `max_retries + 1` attempts with
    /// exponential backoff (100 ms · 2^attempt). Cancellation aborts the
    /// in-flight request or the backoff sleep immediately.
    pub async fn send_with_retry(
        &self,
        request: &ParsedRequest,
        config: &ValidationConfig,
        cancel: &CancellationToken,
    ) -> Result<ResponseData, Error> {
        let attempts = config.max_retries as u64 + 1;
        let mut last_error = None;

        for attempt in 0..attempts {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                outcome = self.send(request) => outcome,
            };
            match outcome {
                Ok(response) => return Ok(response),
                Err(err) => {
                    debug!(attempt, error = %err, "probe attempt failed");
                    last_error = Some(err);
                }
            }

            if attempt + 1 < attempts {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt as u32);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        let last_error = last_error.expect("at least one attempt runs");
        Err(Error::Transport(format!(
            "still failing after {attempts} attempt(s): {last_error}"
        )))
    }
}

/// Builds the outgoing header map. Headers go out exactly as parsed with
/// two exceptions: an empty-valued User-Agent is dropped, and an explicit
/// `Cookie` header is replaced by the cookie map when cookies exist.
fn build_headers(request: &ParsedRequest) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
        if name.eq_ignore_ascii_case("user-agent") && value.is_empty() {
            continue;
        }
        if name.eq_ignore_ascii_case("cookie") && !request.cookies.is_empty() {
            continue;
        }
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::Transport(format!("invalid header name '{name}'")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| Error::Transport(format!("invalid value for header '{name}'")))?;
        headers.insert(header_name, header_value);
    }

    if !request.cookies.is_empty() {
        let cookie_value = cookie_header_value(&request.cookies);
        headers.insert(
            reqwest::header::COOKIE,
            HeaderValue::from_str(&cookie_value)
                .map_err(|_| Error::Transport("invalid cookie value".to_string()))?,
        );
    }

    Ok(headers)
}

fn cookie_header_value(cookies: &FieldMap) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

fn parse_set_cookie(value: &str) -> Option<ResponseCookie> {
    let mut segments = value.split(';');
    let (name, cookie_value) = segments.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = ResponseCookie {
        name: name.to_string(),
        value: cookie_value.trim().to_string(),
        domain: String::new(),
        path: String::new(),
    };
    for segment in segments {
        if let Some((attribute, attribute_value)) = segment.split_once('=') {
            match attribute.trim().to_ascii_lowercase().as_str() {
                "domain" => cookie.domain = attribute_value.trim().to_string(),
                "path" => cookie.path = attribute_value.trim().to_string(),
                _ => {}
            }
        }
    }
    Some(cookie)
}
