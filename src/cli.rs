use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "reqslim",
    about = "HTTP request minimizer: find the fields a server actually needs"
)]
pub struct Cli {
    /// Captured request to minimize: a file path, or '-' for stdin. The
    /// content may be a raw HTTP request or a curl command line.
    pub input: String,

    /// Path to the configuration file (defaults to ./reqslim.toml if present).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Force the input format instead of auto-detecting.
    #[arg(long, value_enum)]
    pub format: Option<InputFormat>,

    /// Only report the detected input format and exit.
    #[arg(long)]
    pub detect_only: bool,

    /// Send the request once and report the response; skip minimization.
    #[arg(long)]
    pub probe_only: bool,

    /// Print the generated Python snippet for the minimized request.
    #[arg(long)]
    pub emit_code: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum InputFormat {
    Raw,
    Curl,
}

impl InputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            InputFormat::Raw => "raw",
            InputFormat::Curl => "curl",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}
