//! Stable facade for external collaborators (CLI, UI shells, event buses).
//!
//! Everything the outside world calls goes through [`RequestService`]; the
//! submodules stay free to evolve behind it.

use serde_json::{json, Value as Json};
use tokio_util::sync::CancellationToken;

use crate::encoding;
use crate::engine::HttpEngine;
use crate::error::Error;
use crate::minimize::{Minimizer, ProgressSink};
use crate::model::{BatchTestResult, ParsedRequest, ResponseData, ValidationConfig};
use crate::parse::{self, RequestFormat};
use crate::pycode;
use crate::validate;

#[derive(Default)]
pub struct RequestService;

impl RequestService {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_request(&self, input: &str) -> Result<ParsedRequest, Error> {
        parse::parse(input)
    }

    pub fn parse_request_with_format(
        &self,
        input: &str,
        format: &str,
    ) -> Result<ParsedRequest, Error> {
        parse::parse_with_format(input, format)
    }

    pub fn detect_input_type(&self, input: &str) -> RequestFormat {
        parse::detect_format(input)
    }

    pub fn generate_python_code(&self, request: &ParsedRequest) -> String {
        pycode::generate(request)
    }

    /// Sends the request once, without retries or validation.
    pub async fn test_single_request(
        &self,
        request: &ParsedRequest,
        config: &ValidationConfig,
    ) -> Result<ResponseData, Error> {
        let engine = HttpEngine::new(config)?;
        engine.send(request).await
    }

    /// Sends the request with the configured retry policy.
    pub async fn test_request_with_retry(
        &self,
        request: &ParsedRequest,
        config: &ValidationConfig,
        cancel: &CancellationToken,
    ) -> Result<ResponseData, Error> {
        let engine = HttpEngine::new(config)?;
        engine.send_with_retry(request, config, cancel).await
    }

    /// Runs the full cumulative-removal minimization. Progress is delivered
    /// synchronously through `sink`; cancelling the token aborts the batch
    /// with [`Error::Cancelled`] and no partial result.
    pub async fn test_field_necessity(
        &self,
        request: &ParsedRequest,
        config: &ValidationConfig,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<BatchTestResult, Error> {
        let engine = HttpEngine::new(config)?;
        Minimizer::new(&engine, config, sink, cancel)
            .run(request)
            .await
    }

    pub fn validate_expression(&self, expression: &str) -> Result<(), Error> {
        validate::validate_expression(expression)
    }

    pub fn default_validation_config(&self) -> ValidationConfig {
        ValidationConfig::default()
    }

    pub fn request_summary(&self, request: &ParsedRequest) -> Json {
        let request_type = if request.content_type.is_empty() {
            "Unknown"
        } else if request.content_type.to_lowercase().contains("json") {
            "JSON"
        } else if request.content_type.to_lowercase().contains("form") {
            "Form"
        } else {
            "Other"
        };

        json!({
            "method": request.method,
            "url": request.url,
            "headerCount": request.headers.len(),
            "cookieCount": request.cookies.len(),
            "hasBody": !request.body.is_empty(),
            "contentType": request.content_type,
            "queryParams": request.query_params.len(),
            "requestType": request_type,
        })
    }

    pub fn test_statistics(&self, result: &BatchTestResult) -> Json {
        let required_headers = result.header_results.iter().filter(|f| f.required).count();
        let required_cookies = result.cookie_results.iter().filter(|f| f.required).count();

        let original_fields =
            result.original_request.headers.len() + result.original_request.cookies.len();
        let simplified_fields =
            result.simplified_request.headers.len() + result.simplified_request.cookies.len();
        let simplification_rate = if original_fields > 0 {
            format!(
                "{:.1}%",
                (original_fields - simplified_fields) as f64 / original_fields as f64 * 100.0
            )
        } else {
            "0%".to_string()
        };

        json!({
            "totalTests": result.total_tests,
            "passedTests": result.passed_tests,
            "failedTests": result.total_tests.saturating_sub(result.passed_tests),
            "testDurationMs": result.test_duration.as_millis() as u64,
            "originalPassed": result.original_passed,
            "requiredHeaders": required_headers,
            "optionalHeaders": result.header_results.len() - required_headers,
            "requiredCookies": required_cookies,
            "optionalCookies": result.cookie_results.len() - required_cookies,
            "simplificationRate": simplification_rate,
        })
    }

    pub fn detect_encoding(&self, body: &[u8], calibration: &str) -> Result<&'static str, Error> {
        encoding::detect_by_calibration(body, calibration)
    }

    pub fn decode_response(&self, body: &[u8], encoding_name: &str) -> Result<String, Error> {
        encoding::decode(body, encoding_name)
    }

    pub fn auto_detect_encoding(&self, body: &[u8]) -> (String, &'static str) {
        encoding::auto_detect(body, "")
    }

    pub fn supported_encodings(&self) -> Vec<&'static str> {
        encoding::supported_encodings()
    }

    pub fn common_encodings(&self) -> Vec<&'static str> {
        encoding::common_encodings()
    }

    /// Calibration detection against a captured response, preferring the raw
    /// bytes over a re-encoding of the decoded text.
    pub fn detect_encoding_from_response(
        &self,
        response: &ResponseData,
        calibration: &str,
    ) -> Result<&'static str, Error> {
        self.detect_encoding(response_bytes(response), calibration)
    }

    pub fn decode_response_from_response(
        &self,
        response: &ResponseData,
        encoding_name: &str,
    ) -> Result<String, Error> {
        self.decode_response(response_bytes(response), encoding_name)
    }

    pub fn auto_detect_encoding_from_response(
        &self,
        response: &ResponseData,
    ) -> (String, &'static str) {
        self.auto_detect_encoding(response_bytes(response))
    }
}

fn response_bytes(response: &ResponseData) -> &[u8] {
    if response.raw_body.is_empty() {
        response.body.as_bytes()
    } else {
        &response.raw_body
    }
}
