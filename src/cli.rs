use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Parsed command-line intent.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(
    name = "picframe",
    version,
    about = "Picture-frame agent: shows the server's current image on the framebuffer"
)]
pub struct Cli {
    #[command(flatten)]
    pub options: RunOptions,

    #[command(subcommand)]
    pub mode: Option<RunMode>,
}

impl Cli {
    pub fn mode(&self) -> RunMode {
        self.mode.unwrap_or_default()
    }
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Probe the network, show the current image, then refresh every hour (default)
    #[default]
    Run,
    /// Run a single settings/download/display cycle and exit
    Once,
    /// Print how long until the next scheduled refresh and exit
    NextWake,
}

/// Overrides for config file values; `None` when not given on the CLI.
#[derive(Args, Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOptions {
    /// Config file (default: ~/.picframe/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Internal server base URL, e.g. http://192.168.86.167:3000
    #[arg(long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    /// External server base URL used off the home network
    #[arg(long, global = true, value_name = "URL")]
    pub external_url: Option<String>,

    /// Directory where downloaded images are kept
    #[arg(long, global = true, value_name = "DIR")]
    pub image_dir: Option<PathBuf>,

    /// Append log lines to this file
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// error, warn, info, debug or trace
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Minute past the hour at which the image is refreshed (0-59)
    #[arg(long, global = true, value_name = "MINUTE", value_parser = clap::value_parser!(u32).range(0..60))]
    pub refresh_minute: Option<u32>,

    /// Skip the startup network/clock checks
    #[arg(long, global = true)]
    pub skip_probe: bool,
}
