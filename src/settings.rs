use std::path::{Path, PathBuf};

use anyhow::{Result, bail, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::cli::{Cli, LogFormat};
use crate::model::{
    EncodingConfig, LengthRangeConfig, MatchMode, TextMatchingConfig, ValidationConfig,
};
use crate::validate;

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_follow_redirect() -> bool {
    true
}

fn default_user_agent() -> String {
    concat!("reqslim/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_preserve_user_agent() -> bool {
    true
}

fn default_text_matching_enabled() -> bool {
    true
}

fn default_match_mode() -> MatchMode {
    MatchMode::All
}

fn default_max_length() -> i64 {
    -1
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_log_format")]
    pub log: LogFormat,

    /// Per-request deadline in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_follow_redirect")]
    pub follow_redirect: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default = "default_preserve_user_agent")]
    pub preserve_user_agent: bool,

    /// Custom validation expression; when set it overrides the other modes.
    #[serde(default)]
    pub expression: Option<String>,

    #[serde(default = "default_text_matching_enabled")]
    pub text_matching: bool,
    #[serde(default)]
    pub match_texts: Vec<String>,
    #[serde(default = "default_match_mode")]
    pub match_mode: MatchMode,
    #[serde(default)]
    pub case_sensitive: bool,

    #[serde(default)]
    pub length_check: bool,
    #[serde(default)]
    pub min_length: i64,
    #[serde(default = "default_max_length")]
    pub max_length: i64,

    #[serde(default)]
    pub calibration_text: Option<String>,
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(config_path) = resolve_config_path(cli)? {
            builder = builder.add_source(File::from(config_path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("REQSLIM")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.timeout > 0,
            "timeout must be greater than 0 seconds (got {})",
            self.timeout
        );
        ensure!(
            self.min_length >= 0,
            "min_length must not be negative (got {})",
            self.min_length
        );
        if self.length_check && self.max_length > 0 {
            ensure!(
                self.max_length >= self.min_length,
                "max_length {} is smaller than min_length {}",
                self.max_length,
                self.min_length
            );
        }
        if let Some(expression) = self.expression.as_deref() {
            if let Err(err) = validate::validate_expression(expression) {
                bail!("invalid validation expression: {err}");
            }
        }
        Ok(())
    }

    /// Lowers the settings into the core validation config.
    pub fn validation_config(&self) -> ValidationConfig {
        let expression = self.expression.clone().unwrap_or_default();
        ValidationConfig {
            timeout_secs: self.timeout,
            max_retries: self.max_retries,
            follow_redirect: self.follow_redirect,
            user_agent: self.user_agent.clone(),
            proxy: self.proxy.clone(),
            use_custom_expr: !expression.is_empty(),
            expression,
            text_matching: TextMatchingConfig {
                enabled: self.text_matching,
                texts: self.match_texts.clone(),
                match_mode: self.match_mode,
                case_sensitive: self.case_sensitive,
            },
            length_range: LengthRangeConfig {
                enabled: self.length_check,
                min_length: self.min_length,
                max_length: self.max_length,
            },
            encoding: EncodingConfig {
                enabled: self.calibration_text.is_some(),
                calibration_text: self.calibration_text.clone().unwrap_or_default(),
                ..EncodingConfig::default()
            },
            preserve_user_agent: self.preserve_user_agent,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log: default_log_format(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            follow_redirect: default_follow_redirect(),
            user_agent: default_user_agent(),
            proxy: None,
            preserve_user_agent: default_preserve_user_agent(),
            expression: None,
            text_matching: default_text_matching_enabled(),
            match_texts: Vec::new(),
            match_mode: default_match_mode(),
            case_sensitive: false,
            length_check: false,
            min_length: 0,
            max_length: default_max_length(),
            calibration_text: None,
        }
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

fn resolve_config_path(cli: &Cli) -> Result<Option<PathBuf>> {
    if let Some(path) = cli.config.as_deref() {
        ensure!(
            path.exists(),
            "configuration file {} does not exist",
            path.display()
        );
        return Ok(Some(path.to_path_buf()));
    }

    let candidate = Path::new("reqslim.toml");
    if candidate.exists() {
        return Ok(Some(candidate.to_path_buf()));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_produce_a_usable_validation_config() {
        let settings = Settings::default();
        settings.validate().expect("defaults validate");

        let config = settings.validation_config();
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.max_retries, 3);
        assert!(config.text_matching.enabled);
        assert!(!config.use_custom_expr);
        assert!(config.preserve_user_agent);
    }

    #[test]
    fn expression_setting_enables_custom_mode() {
        let settings = Settings {
            expression: Some("response.status_code == 200".to_string()),
            ..Settings::default()
        };
        settings.validate().expect("expression validates");

        let config = settings.validation_config();
        assert!(config.use_custom_expr);
        assert_eq!(config.expression, "response.status_code == 200");
    }

    #[test]
    fn invalid_expression_is_rejected_at_load_time() {
        let settings = Settings {
            expression: Some("os.system('rm')".to_string()),
            ..Settings::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("invalid validation expression"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let settings = Settings {
            timeout: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn inverted_length_bounds_are_rejected() {
        let settings = Settings {
            length_check: true,
            min_length: 100,
            max_length: 10,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());

        // Unbounded max is fine regardless of min.
        let settings = Settings {
            length_check: true,
            min_length: 100,
            max_length: -1,
            ..Settings::default()
        };
        settings.validate().expect("unbounded max validates");
    }

    #[test]
    fn load_reads_config_file_and_environment_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("reqslim.toml");
        std::fs::write(
            &path,
            "timeout = 10\nmatch_texts = [\"ok\", \"done\"]\nmatch_mode = \"any\"\nmax_retries = 1\n",
        )
        .expect("write config");

        let cli = Cli {
            input: "-".to_string(),
            config: Some(path),
            format: None,
            detect_only: false,
            probe_only: false,
            emit_code: false,
        };
        let settings = Settings::load(&cli).expect("load settings");
        assert_eq!(settings.timeout, 10);
        assert_eq!(settings.max_retries, 1);
        assert_eq!(settings.match_texts, vec!["ok", "done"]);
        assert!(matches!(settings.match_mode, MatchMode::Any));
        // Untouched knobs keep their defaults.
        assert!(settings.follow_redirect);
        assert!(settings.preserve_user_agent);
    }

    #[test]
    fn load_rejects_missing_explicit_config() {
        let cli = Cli {
            input: "-".to_string(),
            config: Some(PathBuf::from("/definitely/not/here.toml")),
            format: None,
            detect_only: false,
            probe_only: false,
            emit_code: false,
        };
        let err = Settings::load(&cli).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn calibration_text_enables_encoding_detection() {
        let settings = Settings {
            calibration_text: Some("欢迎".to_string()),
            ..Settings::default()
        };
        let config = settings.validation_config();
        assert!(config.encoding.enabled);
        assert_eq!(config.encoding.calibration_text, "欢迎");
    }
}
