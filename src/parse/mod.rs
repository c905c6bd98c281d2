mod curl;
mod raw;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;
use crate::model::{FieldMap, ParsedRequest};

pub use curl::CurlParser;
pub use raw::RawParser;

pub(crate) const ALLOWED_METHODS: [&str; 7] =
    ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// Input formats the facade can dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestFormat {
    Raw,
    Curl,
    Unknown,
}

impl RequestFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestFormat::Raw => "raw",
            RequestFormat::Curl => "curl",
            RequestFormat::Unknown => "unknown",
        }
    }
}

/// A format-specific parser: recognizes its own input and produces the
/// canonical request. The facade is a dispatcher over these capabilities.
pub trait RequestParser {
    fn detect(&self, input: &str) -> bool;
    fn parse(&self, input: &str) -> Result<ParsedRequest, Error>;
}

/// Detects the input format, trying the curl detector before the raw one.
pub fn detect_format(input: &str) -> RequestFormat {
    if CurlParser.detect(input) {
        RequestFormat::Curl
    } else if RawParser.detect(input) {
        RequestFormat::Raw
    } else {
        RequestFormat::Unknown
    }
}

/// Parses by auto-detection and validates the result.
pub fn parse(input: &str) -> Result<ParsedRequest, Error> {
    if input.trim().is_empty() {
        return Err(Error::Parse("input is empty".to_string()));
    }

    let request = match detect_format(input) {
        RequestFormat::Curl => CurlParser.parse(input)?,
        RequestFormat::Raw => RawParser.parse(input)?,
        RequestFormat::Unknown => {
            return Err(Error::Parse(
                "unrecognized input; expected a raw HTTP request or a curl command".to_string(),
            ));
        }
    };
    validate(&request)?;
    Ok(request)
}

/// Parses with an explicit format tag (`raw`/`http`/`curl`) and validates.
pub fn parse_with_format(input: &str, format: &str) -> Result<ParsedRequest, Error> {
    let request = match format.to_ascii_lowercase().as_str() {
        "curl" => CurlParser.parse(input)?,
        "raw" | "http" => RawParser.parse(input)?,
        other => return Err(Error::Parse(format!("unsupported input format '{other}'"))),
    };
    validate(&request)?;
    Ok(request)
}

/// Post-parse validation shared by every facade entry point: the request
/// must carry a known method and an absolute http(s) URL.
pub fn validate(request: &ParsedRequest) -> Result<(), Error> {
    if request.method.is_empty() {
        return Err(Error::Parse("request method is empty".to_string()));
    }
    if request.url.is_empty() {
        return Err(Error::Parse("request URL is empty".to_string()));
    }
    if !request.url.starts_with("http://") && !request.url.starts_with("https://") {
        return Err(Error::Parse(
            "request URL must start with http:// or https://".to_string(),
        ));
    }
    Url::parse(&request.url).map_err(|err| Error::Parse(format!("invalid URL: {err}")))?;
    if !ALLOWED_METHODS.contains(&request.method.as_str()) {
        return Err(Error::Parse(format!(
            "unsupported HTTP method '{}'",
            request.method
        )));
    }
    Ok(())
}

/// Splits a `Cookie` header value (`name1=v1; name2=v2`) into pairs. Entries
/// without a name are dropped; names and values are trimmed.
pub(crate) fn decompose_cookie_header(value: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for entry in value.split(';') {
        let entry = entry.trim();
        if let Some(equals) = entry.find('=') {
            if equals == 0 {
                continue;
            }
            let name = entry[..equals].trim().to_string();
            let cookie_value = entry[equals + 1..].trim().to_string();
            pairs.push((name, cookie_value));
        }
    }
    pairs
}

/// Extracts query parameters from the textual query component. Values are
/// kept verbatim, without percent-decoding, so the URL stays authoritative
/// and the generated snippet round-trips byte for byte. First value wins on
/// duplicate names.
pub(crate) fn query_params_from_url(url: &str) -> FieldMap {
    let mut params = FieldMap::new();
    let Some((_, query)) = url.split_once('?') else {
        return params;
    };
    for pair in query.split('&') {
        if let Some((name, value)) = pair.split_once('=') {
            if name.is_empty() || params.contains_key(name) {
                continue;
            }
            params.insert(name.to_string(), value.to_string());
        }
    }
    params
}
