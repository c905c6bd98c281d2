use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Error;
use crate::model::{FieldMap, ParsedRequest};

use super::{decompose_cookie_header, query_params_from_url, RequestParser};

static LINE_CONTINUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\\s*\n\s*").expect("static continuation pattern"));

/// Parses a `curl` invocation: shell-style tokenization (quote spans and
/// backslash escapes), then flag recognition for the subset curl emits when
/// exporting a request (`-X`, `-H`, `-b`, `-d` and long forms).
pub struct CurlParser;

impl RequestParser for CurlParser {
    fn detect(&self, input: &str) -> bool {
        let trimmed = input.trim();
        trimmed == "curl" || trimmed.starts_with("curl ")
    }

    fn parse(&self, input: &str) -> Result<ParsedRequest, Error> {
        if input.trim().is_empty() {
            return Err(Error::Parse("curl command is empty".to_string()));
        }

        let joined = LINE_CONTINUATION.replace_all(input, " ");
        let tokens = tokenize(joined.trim());

        let mut method: Option<String> = None;
        let mut headers = FieldMap::new();
        let mut cookies = FieldMap::new();
        let mut body = String::new();
        let mut url: Option<String> = None;

        let mut index = 0;
        while index < tokens.len() {
            let token = tokens[index].as_str();
            match token {
                "curl" => {}
                "-X" | "--request" => {
                    let value = flag_value(&tokens, &mut index, token)?;
                    method = Some(value.to_ascii_uppercase());
                }
                "-H" | "--header" => {
                    let value = flag_value(&tokens, &mut index, token)?;
                    if let Some(colon) = value.find(':') {
                        if colon > 0 {
                            let name = value[..colon].trim().to_string();
                            headers.insert(name, value[colon + 1..].trim().to_string());
                        }
                    }
                }
                "-b" | "--cookie" => {
                    let value = flag_value(&tokens, &mut index, token)?;
                    for (name, cookie_value) in decompose_cookie_header(&value) {
                        cookies.insert(name, cookie_value);
                    }
                }
                "-d" | "--data" | "--data-raw" => {
                    body = flag_value(&tokens, &mut index, token)?;
                }
                other if other.starts_with('-') => {
                    // Unrecognized switch: treat the following token as its
                    // value unless that token looks like another flag.
                    if tokens
                        .get(index + 1)
                        .is_some_and(|next| !next.starts_with('-'))
                    {
                        index += 1;
                    }
                }
                other => {
                    if url.is_none() {
                        url = Some(other.to_string());
                    }
                }
            }
            index += 1;
        }

        let url = url.ok_or_else(|| Error::Parse("no request URL in curl command".to_string()))?;

        let content_type = headers
            .get("Content-Type")
            .or_else(|| headers.get("content-type"))
            .cloned()
            .unwrap_or_default();

        Ok(ParsedRequest {
            method: method.unwrap_or_else(|| "GET".to_string()),
            url: url.clone(),
            headers,
            cookies,
            body,
            query_params: query_params_from_url(&url),
            content_type,
        })
    }
}

fn flag_value(tokens: &[String], index: &mut usize, flag: &str) -> Result<String, Error> {
    *index += 1;
    tokens
        .get(*index)
        .cloned()
        .ok_or_else(|| Error::Parse(format!("flag '{flag}' is missing its value")))
}

/// Splits a command string into tokens. Quote spans keep their content as a
/// single token with the quotes stripped; a backslash escapes the next
/// character both inside and outside quotes.
fn tokenize(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in command.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '\'' | '"' if quote.is_none() => quote = Some(ch),
            ch if quote == Some(ch) => quote = None,
            ' ' | '\t' | '\n' if quote.is_none() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            ch => current.push(ch),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> ParsedRequest {
        CurlParser.parse(input).expect("parse curl command")
    }

    #[test]
    fn parses_minimal_get() {
        let request =
            parse("curl 'https://api.example.com/v1/ping' -H 'X-Trace: 1' -H 'Accept: */*'");
        assert_eq!(request.method, "GET");
        assert_eq!(request.url, "https://api.example.com/v1/ping");
        assert_eq!(request.headers.get("X-Trace").unwrap(), "1");
        assert_eq!(request.headers.get("Accept").unwrap(), "*/*");
        assert!(request.cookies.is_empty());
        assert!(request.body.is_empty());
    }

    #[test]
    fn parses_method_cookies_and_body() {
        let request = parse(
            "curl -X post 'https://a.test/login' -b 'sid=abc; lang=en' -d '{\"user\":\"bob\"}'",
        );
        assert_eq!(request.method, "POST");
        assert_eq!(request.cookies.get("sid").unwrap(), "abc");
        assert_eq!(request.cookies.get("lang").unwrap(), "en");
        assert_eq!(request.body, "{\"user\":\"bob\"}");
    }

    #[test]
    fn body_does_not_promote_method() {
        let request = parse("curl 'https://a.test/x' -d 'payload'");
        assert_eq!(request.method, "GET");
        assert_eq!(request.body, "payload");
    }

    #[test]
    fn last_data_flag_wins() {
        let request = parse("curl 'https://a.test/x' -d 'one' --data-raw 'two'");
        assert_eq!(request.body, "two");
    }

    #[test]
    fn line_continuations_are_joined() {
        let request = parse("curl 'https://a.test/x' \\\n  -H 'X-A: 1' \\\n  -H 'X-B: 2'");
        assert_eq!(request.headers.get("X-A").unwrap(), "1");
        assert_eq!(request.headers.get("X-B").unwrap(), "2");
    }

    #[test]
    fn url_after_flags_is_found() {
        let request = parse("curl -X PUT -H 'X-A: 1' https://a.test/target");
        assert_eq!(request.url, "https://a.test/target");
    }

    #[test]
    fn unknown_flag_values_are_not_mistaken_for_the_url() {
        let request = parse("curl --max-time 5 https://a.test/path");
        assert_eq!(request.url, "https://a.test/path");

        let request = parse("curl --connect-timeout 10 -H 'X-A: 1' https://a.test/other");
        assert_eq!(request.url, "https://a.test/other");
        assert_eq!(request.headers.get("X-A").unwrap(), "1");
    }

    #[test]
    fn unknown_flag_followed_by_another_flag_consumes_nothing() {
        let request = parse("curl -s -X POST https://a.test/x");
        assert_eq!(request.method, "POST");
        assert_eq!(request.url, "https://a.test/x");
    }

    #[test]
    fn double_quotes_and_escapes() {
        let request = parse(r#"curl "https://a.test/q" -H "X-Note: say \"hi\"""#);
        assert_eq!(request.headers.get("X-Note").unwrap(), "say \"hi\"");
    }

    #[test]
    fn missing_url_is_rejected() {
        let err = CurlParser.parse("curl -H 'X-A: 1'").unwrap_err();
        assert!(err.to_string().contains("no request URL"));
    }

    #[test]
    fn missing_flag_value_is_rejected() {
        let err = CurlParser.parse("curl https://a.test/ -H").unwrap_err();
        assert!(err.to_string().contains("missing its value"));
    }

    #[test]
    fn detection_requires_leading_curl() {
        assert!(CurlParser.detect("curl https://a.test/"));
        assert!(CurlParser.detect("  curl"));
        assert!(!CurlParser.detect("wget https://a.test/"));
        assert!(!CurlParser.detect("curled https://a.test/"));
    }

    #[test]
    fn tokenizer_handles_quoted_spaces() {
        let tokens = tokenize("a 'b c' \"d e\" f");
        assert_eq!(tokens, vec!["a", "b c", "d e", "f"]);
    }
}
