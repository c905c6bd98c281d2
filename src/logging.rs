use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogFormat;

/// Probe-level logs stay at info; the HTTP client internals are noisy at
/// that level and would drown the per-field verdicts, so they start at warn.
const DEFAULT_FILTER: &str = "info,hyper_util=warn,reqwest=warn,rustls=warn";

const FILTER_ENV: &str = "REQSLIM_LOG";

pub fn init_logger(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_env(FILTER_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match format {
        LogFormat::Json => fmt::fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .try_init()
            .map_err(|err| anyhow!(err))?,
        // Interactive runs read like a progress log: no timestamps, no
        // module targets, one line per probe.
        LogFormat::Text => fmt::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .compact()
            .try_init()
            .map_err(|err| anyhow!(err))?,
    }

    Ok(())
}
