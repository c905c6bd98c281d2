//! Response validation.
//!
//! A probe passes when the configured predicate accepts the response. Modes
//! are tried in a strict priority order, first applicable wins:
//!
//! 1. custom expression (when enabled and non-empty)
//! 2. the 2xx status gate
//! 3. text matching
//! 4. length range
//!
//! A config with no mode enabled is rejected as a configuration error
//! rather than silently passing or failing.

pub mod eval;
pub mod expr;

use crate::error::Error;
use crate::model::{LengthRangeConfig, MatchMode, ResponseData, TextMatchingConfig, ValidationConfig};

pub use expr::validate_expression;

/// Evaluates the configured validation modes against a response.
pub fn evaluate(config: &ValidationConfig, response: &ResponseData) -> Result<bool, Error> {
    if config.use_custom_expr && !config.expression.trim().is_empty() {
        return eval::evaluate(&config.expression, response);
    }

    if !(200..300).contains(&response.status_code) {
        return Ok(false);
    }

    if config.text_matching.enabled {
        return Ok(check_text_matching(&config.text_matching, &response.body));
    }

    if config.length_range.enabled {
        return Ok(check_length_range(&config.length_range, &response.body));
    }

    Err(Error::ConfigRejected(
        "no validation rule enabled; configure text matching, a length range, or a custom \
         expression"
            .to_string(),
    ))
}

/// With no needles configured, any non-empty body passes. Otherwise `any`
/// passes on the first hit and `all` requires every non-empty needle.
fn check_text_matching(config: &TextMatchingConfig, body: &str) -> bool {
    if config.texts.is_empty() {
        return !body.is_empty();
    }

    let haystack = if config.case_sensitive {
        body.to_string()
    } else {
        body.to_lowercase()
    };

    let mut all_matched = true;
    for needle in &config.texts {
        if needle.is_empty() {
            continue;
        }
        let needle = if config.case_sensitive {
            needle.clone()
        } else {
            needle.to_lowercase()
        };
        let hit = haystack.contains(&needle);
        match config.match_mode {
            MatchMode::Any if hit => return true,
            MatchMode::Any => {}
            MatchMode::All => all_matched &= hit,
        }
    }

    match config.match_mode {
        MatchMode::Any => false,
        MatchMode::All => all_matched,
    }
}

/// Byte length of the decoded body; `max_length <= 0` means unbounded.
fn check_length_range(config: &LengthRangeConfig, body: &str) -> bool {
    let length = body.len() as i64;
    length >= config.min_length && (config.max_length <= 0 || length <= config.max_length)
}
