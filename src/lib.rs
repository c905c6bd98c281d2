pub mod cli;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod logging;
pub mod minimize;
pub mod model;
pub mod parse;
pub mod pycode;
pub mod service;
pub mod settings;
pub mod validate;

use std::io::Read;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use error::Error;

use crate::cli::Cli;
use crate::minimize::ProgressSink;
use crate::model::{ParsedRequest, TestProgress};
use crate::service::RequestService;
use crate::settings::Settings;

pub async fn run(cli: Cli, settings: Settings) -> Result<()> {
    let input = read_input(&cli.input)?;
    let service = RequestService::new();

    if cli.detect_only {
        println!("{}", service.detect_input_type(&input).as_str());
        return Ok(());
    }

    let request = match cli.format {
        Some(format) => service.parse_request_with_format(&input, format.as_str())?,
        None => service.parse_request(&input)?,
    };
    info!(
        method = %request.method,
        url = %request.url,
        headers = request.headers.len(),
        cookies = request.cookies.len(),
        "request parsed"
    );

    let config = settings.validation_config();

    if cli.probe_only {
        let response = service.test_single_request(&request, &config).await?;
        println!(
            "{} {} ({} bytes, {} chars, {}, {} ms)",
            response.status_code,
            response.url,
            response.content_length,
            response.character_count,
            response.detected_encoding,
            response.duration.as_millis()
        );
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let result = service
        .test_field_necessity(&request, &config, &LogSink, &cancel)
        .await?;

    for field in result.header_results.iter().chain(&result.cookie_results) {
        println!(
            "{:>8} {:<10} {}",
            if field.required { "required" } else { "optional" },
            field.kind.label(),
            field.name
        );
    }
    println!();
    println!("minimized request:");
    println!("{}", render_request(&result.simplified_request));

    if cli.emit_code {
        println!();
        println!("{}", result.simplified_code);
    }

    let statistics = service.test_statistics(&result);
    info!(
        total = result.total_tests,
        passed = result.passed_tests,
        simplification = %statistics["simplificationRate"],
        "batch finished"
    );

    Ok(())
}

/// Progress sink that forwards each step to the tracing subscriber.
struct LogSink;

impl ProgressSink for LogSink {
    fn publish(&self, progress: TestProgress) {
        info!(
            step = progress.completed_steps,
            total = progress.total_steps,
            percent = progress.progress as u64,
            "{}",
            progress.message
        );
    }
}

fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("reading request from stdin")?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(source).with_context(|| format!("reading request from {source}"))
    }
}

fn render_request(request: &ParsedRequest) -> String {
    let mut text = format!("{} {}\n", request.method, request.url);
    for (name, value) in &request.headers {
        if name.eq_ignore_ascii_case("cookie") {
            continue;
        }
        text.push_str(&format!("{name}: {value}\n"));
    }
    if !request.cookies.is_empty() {
        let cookies: Vec<String> = request
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        text.push_str(&format!("Cookie: {}\n", cookies.join("; ")));
    }
    if !request.body.is_empty() {
        text.push('\n');
        text.push_str(&request.body);
    }
    text
}
