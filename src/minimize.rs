//! Cumulative-removal field-necessity solver.
//!
//! Starting from a deep copy of the original header and cookie maps, each
//! field is removed once, in parse order, and the stripped request is sent
//! to the server. A removal that still validates is kept; one that breaks
//! validation is reverted. Removals are additive across probes, so the
//! whole run costs `|headers| + |cookies| + 1` requests.
//!
//! The probe loop is strictly sequential: the working state mutates between
//! probes, so issuing probes in parallel would test inconsistent requests.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::HttpEngine;
use crate::error::Error;
use crate::model::{
    BatchTestResult, FieldKind, FieldMap, FieldTestResult, ParsedRequest, ProbeOutcome,
    TestProgress, ValidationConfig,
};
use crate::validate;

const RESPONSE_EXCERPT_LEN: usize = 100;

/// Capability the caller supplies to observe progress. Invoked synchronously
/// from the probe task, one call per step, in probe order.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, progress: TestProgress);
}

/// Sink that drops every event.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn publish(&self, _progress: TestProgress) {}
}

struct WorkingState {
    headers: FieldMap,
    cookies: FieldMap,
}

pub struct Minimizer<'a> {
    engine: &'a HttpEngine,
    config: &'a ValidationConfig,
    sink: &'a dyn ProgressSink,
    cancel: &'a CancellationToken,
}

impl<'a> Minimizer<'a> {
    pub fn new(
        engine: &'a HttpEngine,
        config: &'a ValidationConfig,
        sink: &'a dyn ProgressSink,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            engine,
            config,
            sink,
            cancel,
        }
    }

    pub async fn run(&self, original: &ParsedRequest) -> Result<BatchTestResult, Error> {
        let started = Instant::now();
        let total_steps = original.headers.len() + original.cookies.len() + 1;
        let mut completed_steps = 0usize;

        self.publish(
            total_steps,
            completed_steps,
            "testing original request",
            None,
        );

        let original_response = match self
            .engine
            .send_with_retry(original, self.config, self.cancel)
            .await
        {
            Ok(response) => response,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => return Err(Error::original_failed(err.to_string())),
        };
        match validate::evaluate(self.config, &original_response) {
            Ok(true) => {}
            Ok(false) => {
                return Err(Error::OriginalFailed {
                    message: "the original request did not pass validation".to_string(),
                    response: Some(Box::new(original_response)),
                });
            }
            Err(err) => return Err(err),
        }
        completed_steps += 1;
        info!(
            headers = original.headers.len(),
            cookies = original.cookies.len(),
            "original request validated; starting field probes"
        );

        let mut state = WorkingState {
            headers: original.headers.clone(),
            cookies: original.cookies.clone(),
        };
        let mut result = BatchTestResult {
            original_request: original.clone(),
            original_passed: true,
            original_error: None,
            header_results: Vec::new(),
            cookie_results: Vec::new(),
            cumulative_headers: Default::default(),
            cumulative_cookies: Default::default(),
            simplified_request: original.clone(),
            simplified_code: String::new(),
            test_duration: Default::default(),
            total_tests: total_steps,
            passed_tests: 0,
        };

        let header_order: Vec<String> = original.headers.keys().cloned().collect();
        for name in header_order {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let Some(value) = state.headers.get(&name).cloned() else {
                continue;
            };

            let is_user_agent = name.eq_ignore_ascii_case("user-agent");
            if is_user_agent && self.config.preserve_user_agent {
                let field = FieldTestResult {
                    name: name.clone(),
                    kind: FieldKind::Header,
                    required: true,
                    value,
                    probe: ProbeOutcome {
                        success: true,
                        ..ProbeOutcome::default()
                    },
                };
                result.passed_tests += 1;
                completed_steps += 1;
                self.record_header(&mut result, field.clone());
                self.publish(
                    total_steps,
                    completed_steps,
                    &format!("header '{name}' preserved"),
                    Some(field),
                );
                continue;
            }

            // The engine omits an empty-valued User-Agent, so blanking it
            // probes absence while keeping the slot restorable.
            if is_user_agent {
                state.headers.insert(name.clone(), String::new());
            } else {
                state.headers.shift_remove(&name);
            }

            let probe_request = build_request_from_state(&state, original);
            let probe = self.probe(&probe_request).await?;
            let required = !probe.success;
            if required {
                state.headers.insert(name.clone(), value.clone());
            }

            let field = FieldTestResult {
                name: name.clone(),
                kind: FieldKind::Header,
                required,
                value,
                probe,
            };
            if field.probe.success {
                result.passed_tests += 1;
            }
            completed_steps += 1;
            debug!(
                header = %name,
                required,
                "header probe finished"
            );
            self.record_header(&mut result, field.clone());
            self.publish(
                total_steps,
                completed_steps,
                &format!(
                    "header '{name}' {}",
                    if required { "required" } else { "optional" }
                ),
                Some(field),
            );
        }

        let cookie_order: Vec<String> = original.cookies.keys().cloned().collect();
        for name in cookie_order {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let Some(value) = state.cookies.get(&name).cloned() else {
                continue;
            };

            state.cookies.shift_remove(&name);
            let probe_request = build_request_from_state(&state, original);
            let probe = self.probe(&probe_request).await?;
            let required = !probe.success;
            if required {
                state.cookies.insert(name.clone(), value.clone());
            }

            let field = FieldTestResult {
                name: name.clone(),
                kind: FieldKind::Cookie,
                required,
                value,
                probe,
            };
            if field.probe.success {
                result.passed_tests += 1;
            }
            completed_steps += 1;
            debug!(cookie = %name, required, "cookie probe finished");
            result.cookie_results.push(field.clone());
            result
                .cumulative_cookies
                .insert(field.name.clone(), field.clone());
            self.publish(
                total_steps,
                completed_steps,
                &format!(
                    "cookie '{name}' {}",
                    if required { "required" } else { "optional" }
                ),
                Some(field),
            );
        }

        result.simplified_request = build_simplified_request(original, &result);
        result.simplified_code = crate::pycode::generate(&result.simplified_request);
        result.test_duration = started.elapsed();

        info!(
            required_headers = result.simplified_request.headers.len(),
            required_cookies = result.simplified_request.cookies.len(),
            duration_ms = result.test_duration.as_millis() as u64,
            "minimization finished"
        );
        self.publish(total_steps, completed_steps, "minimization complete", None);

        Ok(result)
    }

    /// One field probe: send with retry, then validate. Transport and
    /// expression failures become a failed outcome; a configuration error
    /// or cancellation aborts the batch.
    async fn probe(&self, request: &ParsedRequest) -> Result<ProbeOutcome, Error> {
        let response = match self
            .engine
            .send_with_retry(request, self.config, self.cancel)
            .await
        {
            Ok(response) => response,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => {
                return Ok(ProbeOutcome {
                    success: false,
                    error: Some(err.to_string()),
                    status_code: None,
                    response_excerpt: None,
                });
            }
        };

        let excerpt = Some(excerpt(&response.body));
        match validate::evaluate(self.config, &response) {
            Ok(success) => Ok(ProbeOutcome {
                success,
                error: None,
                status_code: Some(response.status_code),
                response_excerpt: excerpt,
            }),
            Err(err @ Error::ConfigRejected(_)) => Err(err),
            Err(err) => Ok(ProbeOutcome {
                success: false,
                error: Some(err.to_string()),
                status_code: Some(response.status_code),
                response_excerpt: excerpt,
            }),
        }
    }

    fn record_header(&self, result: &mut BatchTestResult, field: FieldTestResult) {
        result.header_results.push(field.clone());
        result.cumulative_headers.insert(field.name.clone(), field);
    }

    fn publish(
        &self,
        total_steps: usize,
        completed_steps: usize,
        message: &str,
        field_result: Option<FieldTestResult>,
    ) {
        self.sink.publish(TestProgress {
            current_step: message.to_string(),
            total_steps,
            completed_steps,
            progress: completed_steps as f64 / total_steps as f64 * 100.0,
            message: message.to_string(),
            field_result,
        });
    }
}

/// A probe request is the working state plus everything else from the
/// original, verbatim.
fn build_request_from_state(state: &WorkingState, original: &ParsedRequest) -> ParsedRequest {
    ParsedRequest {
        method: original.method.clone(),
        url: original.url.clone(),
        headers: state.headers.clone(),
        cookies: state.cookies.clone(),
        body: original.body.clone(),
        query_params: original.query_params.clone(),
        content_type: original.content_type.clone(),
    }
}

/// Keeps only the fields found to be required, with their original values.
fn build_simplified_request(original: &ParsedRequest, result: &BatchTestResult) -> ParsedRequest {
    let mut simplified = ParsedRequest {
        method: original.method.clone(),
        url: original.url.clone(),
        headers: FieldMap::new(),
        cookies: FieldMap::new(),
        body: original.body.clone(),
        query_params: original.query_params.clone(),
        content_type: original.content_type.clone(),
    };

    for field in &result.header_results {
        if field.required {
            if let Some(value) = original.headers.get(&field.name) {
                simplified.headers.insert(field.name.clone(), value.clone());
            }
        }
    }
    for field in &result.cookie_results {
        if field.required {
            if let Some(value) = original.cookies.get(&field.name) {
                simplified.cookies.insert(field.name.clone(), value.clone());
            }
        }
    }

    simplified
}

fn excerpt(body: &str) -> String {
    if body.chars().count() <= RESPONSE_EXCERPT_LEN {
        return body.to_string();
    }
    let cut: String = body.chars().take(RESPONSE_EXCERPT_LEN).collect();
    format!("{cut}...")
}
