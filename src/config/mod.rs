use crate::{app::LogLevel, display::PATH_PLACEHOLDER, remote::BaseUrl, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub mod loader;

pub const DEFAULT_INTERNAL_BASE_URL: &str = "http://192.168.86.167:3000";
pub const DEFAULT_IMAGE_DIR: &str = "/home/pi/images";
pub const DEFAULT_LOG_FILE: &str = "/home/pi/image_display.log";
pub const DEFAULT_REFRESH_MINUTE: u32 = 1;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_PING_HOST: &str = "8.8.8.8";
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_REACHABILITY_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_VIEWER_PROGRAM: &str = "fbi";
pub const DEFAULT_FRAMEBUFFER_DEVICE: &str = "/dev/fb0";
pub const DEFAULT_CURSOR_BLINK_PATH: &str = "/sys/class/graphics/fbcon/cursor_blink";
pub const DEFAULT_VIEWER_START_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_TERMINATE_WAIT_MS: u64 = 1_000;
const CONFIG_DIR_NAME: &str = ".picframe";
const CONFIG_FILE_NAME: &str = "config.toml";

fn default_time_sync_command() -> Vec<String> {
    ["sudo", "timedatectl", "set-ntp", "true"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_viewer_args() -> Vec<String> {
    ["-d", "{device}", "-T", "1", "--noverbose", "-a", "{path}"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// User-supplied settings loaded from the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub internal_base_url: String,
    pub external_base_url: Option<String>,
    /// Gateway addresses starting with this prefix mean "internal network".
    pub internal_gateway_prefix: Option<String>,
    pub image_dir: PathBuf,
    pub log_file: Option<PathBuf>,
    pub log_level: String,
    pub refresh_minute: u32,
    pub http_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub ping_host: String,
    pub probe_interval_secs: u64,
    pub reachability_timeout_secs: u64,
    pub time_sync_command: Vec<String>,
    pub viewer_program: String,
    pub viewer_args: Vec<String>,
    pub framebuffer_device: PathBuf,
    pub cursor_blink_path: PathBuf,
    pub viewer_start_timeout_ms: u64,
    pub terminate_wait_ms: u64,
    pub skip_probe: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            internal_base_url: DEFAULT_INTERNAL_BASE_URL.to_string(),
            external_base_url: None,
            internal_gateway_prefix: None,
            image_dir: PathBuf::from(DEFAULT_IMAGE_DIR),
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            log_level: LogLevel::default().to_string(),
            refresh_minute: DEFAULT_REFRESH_MINUTE,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            ping_host: DEFAULT_PING_HOST.to_string(),
            probe_interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
            reachability_timeout_secs: DEFAULT_REACHABILITY_TIMEOUT_SECS,
            time_sync_command: default_time_sync_command(),
            viewer_program: DEFAULT_VIEWER_PROGRAM.to_string(),
            viewer_args: default_viewer_args(),
            framebuffer_device: PathBuf::from(DEFAULT_FRAMEBUFFER_DEVICE),
            cursor_blink_path: PathBuf::from(DEFAULT_CURSOR_BLINK_PATH),
            viewer_start_timeout_ms: DEFAULT_VIEWER_START_TIMEOUT_MS,
            terminate_wait_ms: DEFAULT_TERMINATE_WAIT_MS,
            skip_probe: false,
        }
    }
}

impl Config {
    pub fn load_or_default() -> Result<Self> {
        loader::load_or_default()
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        loader::load_from_path(path)
    }
}

pub(crate) fn validate(cfg: &Config) -> Result<()> {
    BaseUrl::parse(&cfg.internal_base_url)
        .map_err(|e| Error::Config(format!("internal_base_url: {e}")))?;
    if let Some(external) = cfg.external_base_url.as_deref() {
        BaseUrl::parse(external).map_err(|e| Error::Config(format!("external_base_url: {e}")))?;
    }
    if cfg.image_dir.as_os_str().is_empty() {
        return Err(Error::Config("image_dir must not be empty".into()));
    }
    LogLevel::from_str(&cfg.log_level).map_err(|e| Error::Config(format!("log_level: {e}")))?;
    if cfg.refresh_minute > 59 {
        return Err(Error::Config(format!(
            "refresh_minute must be between 0 and 59 (got {})",
            cfg.refresh_minute
        )));
    }
    if cfg.http_timeout_secs == 0 {
        return Err(Error::Config("http_timeout_secs must be at least 1".into()));
    }
    if cfg.download_timeout_secs == 0 {
        return Err(Error::Config(
            "download_timeout_secs must be at least 1".into(),
        ));
    }
    if cfg.probe_interval_secs == 0 {
        return Err(Error::Config("probe_interval_secs must be at least 1".into()));
    }
    if cfg.ping_host.trim().is_empty() {
        return Err(Error::Config("ping_host must not be empty".into()));
    }
    if cfg.viewer_program.trim().is_empty() {
        return Err(Error::Config("viewer_program must not be empty".into()));
    }
    if !cfg.viewer_args.iter().any(|arg| arg.contains(PATH_PLACEHOLDER)) {
        return Err(Error::Config(format!(
            "viewer_args must contain the {PATH_PLACEHOLDER} placeholder"
        )));
    }
    Ok(())
}
