use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Error;
use crate::model::{FieldMap, ParsedRequest};

use super::{decompose_cookie_header, query_params_from_url, RequestParser, ALLOWED_METHODS};

static REQUEST_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(GET|POST|PUT|DELETE|PATCH|HEAD|OPTIONS)\s+\S+(\s+HTTP/\d\.\d)?$")
        .expect("static request-line pattern")
});

/// Parses an RFC-7230-style textual request: request line, header block,
/// blank line, body. Accepts both CRLF and LF line endings.
pub struct RawParser;

impl RequestParser for RawParser {
    fn detect(&self, input: &str) -> bool {
        let first_line = input.trim().lines().next().unwrap_or("").trim();
        REQUEST_LINE.is_match(first_line)
    }

    fn parse(&self, input: &str) -> Result<ParsedRequest, Error> {
        if input.trim().is_empty() {
            return Err(Error::Parse("request text is empty".to_string()));
        }

        let normalized = input.replace("\r\n", "\n");
        let lines: Vec<&str> = normalized.split('\n').collect();

        let mut index = 0;
        while index < lines.len() && lines[index].trim().is_empty() {
            index += 1;
        }
        let Some(request_line) = lines.get(index) else {
            return Err(Error::Parse("missing request line".to_string()));
        };
        let (method, url) = parse_request_line(request_line.trim())?;
        index += 1;

        let mut headers = FieldMap::new();
        let mut cookies = FieldMap::new();
        let mut body_start = lines.len();
        for (offset, line) in lines[index..].iter().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                body_start = index + offset + 1;
                break;
            }
            if let Some(colon) = line.find(':') {
                if colon == 0 {
                    continue;
                }
                let name = line[..colon].trim().to_string();
                let value = line[colon + 1..].trim().to_string();
                if name.eq_ignore_ascii_case("cookie") {
                    for (cookie_name, cookie_value) in decompose_cookie_header(&value) {
                        cookies.insert(cookie_name, cookie_value);
                    }
                }
                headers.insert(name, value);
            }
        }

        let body = if body_start < lines.len() {
            lines[body_start..].join("\n").trim().to_string()
        } else {
            String::new()
        };

        let content_type = headers
            .get("Content-Type")
            .or_else(|| headers.get("content-type"))
            .cloned()
            .unwrap_or_default();

        Ok(ParsedRequest {
            method,
            url: url.clone(),
            headers,
            cookies,
            body,
            query_params: query_params_from_url(&url),
            content_type,
        })
    }
}

fn parse_request_line(line: &str) -> Result<(String, String), Error> {
    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| Error::Parse("missing request line".to_string()))?
        .to_ascii_uppercase();
    let url = parts
        .next()
        .ok_or_else(|| Error::Parse(format!("request line '{line}' has no target")))?
        .to_string();

    if !ALLOWED_METHODS.contains(&method.as_str()) {
        return Err(Error::Parse(format!("unsupported HTTP method '{method}'")));
    }

    Ok((method, url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> ParsedRequest {
        RawParser.parse(input).expect("parse raw request")
    }

    #[test]
    fn parses_request_with_cookies() {
        let request = parse("GET /x HTTP/1.1\r\nHost: a.test\r\nCookie: s=1; u=bob\r\n\r\n");
        assert_eq!(request.method, "GET");
        assert_eq!(request.url, "/x");
        assert_eq!(request.headers.get("Host").unwrap(), "a.test");
        assert_eq!(request.headers.get("Cookie").unwrap(), "s=1; u=bob");
        assert_eq!(request.cookies.get("s").unwrap(), "1");
        assert_eq!(request.cookies.get("u").unwrap(), "bob");
    }

    #[test]
    fn parses_body_after_blank_line() {
        let request = parse(
            "POST https://a.test/submit HTTP/1.1\nContent-Type: application/json\n\n{\"k\":1}\n",
        );
        assert_eq!(request.body, "{\"k\":1}");
        assert_eq!(request.content_type, "application/json");
    }

    #[test]
    fn lowercase_content_type_header_is_found() {
        let request = parse("POST https://a.test/ HTTP/1.1\ncontent-type: text/plain\n\nhi");
        assert_eq!(request.content_type, "text/plain");
    }

    #[test]
    fn duplicate_headers_are_last_write_wins() {
        let request = parse("GET https://a.test/ HTTP/1.1\nX-K: 1\nX-K: 2\n\n");
        assert_eq!(request.headers.get("X-K").unwrap(), "2");
        assert_eq!(request.headers.len(), 1);
    }

    #[test]
    fn method_is_uppercased_and_validated() {
        let request = parse("get https://a.test/ HTTP/1.1\n\n");
        assert_eq!(request.method, "GET");

        let err = RawParser.parse("FETCH https://a.test/ HTTP/1.1\n\n").unwrap_err();
        assert!(err.to_string().contains("unsupported HTTP method"));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(RawParser.parse("").is_err());
        assert!(RawParser.parse("  \n \n").is_err());
    }

    #[test]
    fn missing_target_is_rejected() {
        let err = RawParser.parse("GET\n\n").unwrap_err();
        assert!(err.to_string().contains("no target"));
    }

    #[test]
    fn query_params_are_extracted_without_decoding() {
        let request = parse("GET https://a.test/p?foo=bar&q=a%20b HTTP/1.1\n\n");
        assert_eq!(request.query_params.get("foo").unwrap(), "bar");
        assert_eq!(request.query_params.get("q").unwrap(), "a%20b");
    }

    #[test]
    fn leading_blank_lines_are_skipped() {
        let request = parse("\n\nGET https://a.test/ HTTP/1.1\nHost: a.test\n\n");
        assert_eq!(request.method, "GET");
        assert_eq!(request.headers.len(), 1);
    }

    #[test]
    fn detects_request_lines_with_and_without_version() {
        assert!(RawParser.detect("GET /path HTTP/1.1\nHost: a.test"));
        assert!(RawParser.detect("POST https://a.test/x"));
        assert!(!RawParser.detect("curl https://a.test/x"));
        assert!(!RawParser.detect("random text"));
        assert!(!RawParser.detect("GET"));
    }

    #[test]
    fn parsing_twice_yields_equal_requests() {
        let input = "GET https://a.test/p?x=1 HTTP/1.1\nHost: a.test\nCookie: a=1\n\n";
        assert_eq!(parse(input), parse(input));
    }
}
