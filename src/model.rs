use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Case-preserving, insertion-ordered field map. Duplicate names are
/// last-write-wins; iteration order is the order fields were first seen,
/// which is what the minimizer probes in.
pub type FieldMap = IndexMap<String, String>;

/// Canonical request produced by the parsers.
///
/// Constructed once by a parser and only ever deep-copied afterwards; the
/// minimizer works on clones and never mutates the original in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedRequest {
    pub method: String,
    pub url: String,
    pub headers: FieldMap,
    pub cookies: FieldMap,
    pub body: String,
    pub query_params: FieldMap,
    pub content_type: String,
}

impl ParsedRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: FieldMap::new(),
            cookies: FieldMap::new(),
            body: String::new(),
            query_params: FieldMap::new(),
            content_type: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    All,
    Any,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMatchingConfig {
    pub enabled: bool,
    pub texts: Vec<String>,
    pub match_mode: MatchMode,
    pub case_sensitive: bool,
}

impl Default for TextMatchingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            texts: Vec::new(),
            match_mode: MatchMode::All,
            case_sensitive: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LengthRangeConfig {
    pub enabled: bool,
    pub min_length: i64,
    /// Values <= 0 mean unbounded.
    pub max_length: i64,
}

impl Default for LengthRangeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_length: 0,
            max_length: -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingConfig {
    pub enabled: bool,
    pub calibration_text: String,
    pub supported_encodings: Vec<String>,
    pub detected_encoding: String,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            calibration_text: String::new(),
            supported_encodings: vec![
                "UTF-8".to_string(),
                "GBK".to_string(),
                "GB2312".to_string(),
                "Big5".to_string(),
            ],
            detected_encoding: "UTF-8".to_string(),
        }
    }
}

/// How a probe response is judged, plus the transport options every probe
/// shares. Modes are evaluated in a fixed priority order: custom expression,
/// 2xx gate, text matching, length range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationConfig {
    /// Per-request deadline in seconds; 0 falls back to 30 s.
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub follow_redirect: bool,
    pub user_agent: String,
    #[serde(default)]
    pub proxy: Option<String>,

    pub use_custom_expr: bool,
    pub expression: String,
    pub text_matching: TextMatchingConfig,
    pub length_range: LengthRangeConfig,
    #[serde(default)]
    pub encoding: EncodingConfig,

    /// Never probe the User-Agent header away when set.
    pub preserve_user_agent: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            follow_redirect: true,
            user_agent: concat!("reqslim/", env!("CARGO_PKG_VERSION")).to_string(),
            proxy: None,
            use_custom_expr: false,
            expression: String::new(),
            text_matching: TextMatchingConfig::default(),
            length_range: LengthRangeConfig::default(),
            encoding: EncodingConfig::default(),
            preserve_user_agent: true,
        }
    }
}

impl ValidationConfig {
    pub fn timeout(&self) -> Duration {
        if self.timeout_secs == 0 {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(self.timeout_secs)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// A fully buffered response with both the raw bytes and the decoded text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    pub status_code: u16,
    pub headers: FieldMap,
    /// Body decoded to text with the detected codec.
    pub body: String,
    #[serde(skip)]
    pub raw_body: Vec<u8>,
    pub cookies: Vec<ResponseCookie>,
    /// Final URL after redirects.
    pub url: String,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// Size of the raw body in bytes.
    pub content_length: u64,
    /// Code points in the decoded body.
    pub character_count: usize,
    pub detected_encoding: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Header,
    Cookie,
}

impl FieldKind {
    pub fn label(self) -> &'static str {
        match self {
            FieldKind::Header => "header",
            FieldKind::Cookie => "cookie",
        }
    }
}

/// What a single probe observed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub status_code: Option<u16>,
    pub response_excerpt: Option<String>,
}

/// The verdict for one header or cookie: whether the server still accepted
/// the request after the field was removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldTestResult {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub value: String,
    pub probe: ProbeOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTestResult {
    pub original_request: ParsedRequest,
    pub original_passed: bool,
    pub original_error: Option<String>,
    pub header_results: Vec<FieldTestResult>,
    pub cookie_results: Vec<FieldTestResult>,
    pub cumulative_headers: IndexMap<String, FieldTestResult>,
    pub cumulative_cookies: IndexMap<String, FieldTestResult>,
    pub simplified_request: ParsedRequest,
    pub simplified_code: String,
    #[serde(with = "duration_millis")]
    pub test_duration: Duration,
    pub total_tests: usize,
    pub passed_tests: usize,
}

/// One progress record per minimization step, delivered synchronously to the
/// caller's sink in probe order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestProgress {
    pub current_step: String,
    pub total_steps: usize,
    pub completed_steps: usize,
    /// Percentage in [0, 100].
    pub progress: f64,
    pub message: String,
    pub field_result: Option<FieldTestResult>,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
