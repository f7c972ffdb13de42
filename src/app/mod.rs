use crate::{
    cli::RunOptions,
    config::Config,
    display::{DisplayDriver, DisplayOptions, SystemSupervisor},
    probe::{NetworkPlan, ProbeOptions, Prober, SystemHost},
    remote::{BaseUrl, ReqwestTransport},
    retry::Sleeper,
    Error, Result,
};
use chrono::Local;
use std::{fs, path::PathBuf, str::FromStr, time::Duration};

mod lifecycle;
mod logger;
pub mod scheduler;

pub use lifecycle::InterruptibleSleeper;
pub use logger::{LogLevel, Logger};
use scheduler::{CycleOutcome, Scheduler};

/// Config for the agent after file values and CLI overrides are merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub image_dir: PathBuf,
    pub log_file: Option<PathBuf>,
    pub log_level: LogLevel,
    pub refresh_minute: u32,
    pub download_timeout: Duration,
    pub probe: ProbeOptions,
    pub display: DisplayOptions,
    pub skip_probe: bool,
}

impl AppConfig {
    /// CLI values win over file values; the merged result is validated as a whole.
    pub fn from_sources(mut config: Config, opts: RunOptions) -> Result<Self> {
        if let Some(url) = opts.base_url {
            config.internal_base_url = url;
        }
        if let Some(url) = opts.external_url {
            config.external_base_url = Some(url);
        }
        if let Some(dir) = opts.image_dir {
            config.image_dir = dir;
        }
        if let Some(path) = opts.log_file {
            config.log_file = Some(path);
        }
        if let Some(level) = opts.log_level {
            config.log_level = level;
        }
        if let Some(minute) = opts.refresh_minute {
            config.refresh_minute = minute;
        }
        config.skip_probe |= opts.skip_probe;
        crate::config::validate(&config)?;

        let log_level = LogLevel::from_str(&config.log_level).map_err(Error::Config)?;
        let external_base_url = config
            .external_base_url
            .as_deref()
            .map(BaseUrl::parse)
            .transpose()?;

        Ok(Self {
            image_dir: config.image_dir,
            log_file: config.log_file,
            log_level,
            refresh_minute: config.refresh_minute,
            download_timeout: Duration::from_secs(config.download_timeout_secs),
            probe: ProbeOptions {
                internal_base_url: BaseUrl::parse(&config.internal_base_url)?,
                external_base_url,
                internal_gateway_prefix: config.internal_gateway_prefix,
                ping_host: config.ping_host,
                probe_interval: Duration::from_secs(config.probe_interval_secs),
                reachability_timeout: Duration::from_secs(config.reachability_timeout_secs),
                http_timeout: Duration::from_secs(config.http_timeout_secs),
                time_sync_command: config.time_sync_command,
            },
            display: DisplayOptions {
                viewer_program: config.viewer_program,
                viewer_args: config.viewer_args,
                framebuffer_device: config.framebuffer_device,
                cursor_blink_path: config.cursor_blink_path,
                start_timeout: Duration::from_millis(config.viewer_start_timeout_ms),
                terminate_wait: Duration::from_millis(config.terminate_wait_ms),
            },
            skip_probe: config.skip_probe,
        })
    }
}

pub struct App {
    config: AppConfig,
    logger: Logger,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        let logger = Logger::new(config.log_level, config.log_file.clone());
        Self { config, logger }
    }

    pub fn from_options(opts: RunOptions) -> Result<Self> {
        let cfg_file = match opts.config.as_deref() {
            Some(path) => Config::load_from_path(path)?,
            None => Config::load_or_default()?,
        };
        let merged = AppConfig::from_sources(cfg_file, opts)?;
        Ok(Self::new(merged))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Daemon entry point: probe, draw, then refresh hourly until SIGINT/SIGTERM.
    pub fn run(&self) -> Result<()> {
        let sleeper = InterruptibleSleeper::new(lifecycle::create_shutdown_flag()?);
        let transport = self.transport()?;
        self.logger.info(format!(
            "picframe {} starting (images in {}, refresh at minute {})",
            env!("CARGO_PKG_VERSION"),
            self.config.image_dir.display(),
            self.config.refresh_minute
        ));
        if let Some(path) = self.logger.path() {
            self.logger.debug(format!("Logging to {}", path.display()));
        }
        self.prepare_image_dir();

        let plan = self.network_plan(&sleeper)?;
        if !sleeper.is_running() {
            self.logger.info("Shutdown requested during startup.");
            return Ok(());
        }
        let display = DisplayDriver::new(
            self.config.display.clone(),
            SystemSupervisor::new(),
            &self.logger,
        );
        let mut scheduler = Scheduler::new(
            plan,
            &self.config.image_dir,
            &transport,
            display,
            self.config.refresh_minute,
            &self.logger,
        );
        scheduler.run(&sleeper, Local::now);
        Ok(())
    }

    /// Single cycle for cron-style use and manual checks.
    pub fn run_once(&self) -> Result<CycleOutcome> {
        let sleeper = InterruptibleSleeper::new(lifecycle::create_shutdown_flag()?);
        let transport = self.transport()?;
        self.prepare_image_dir();

        let plan = self.network_plan(&sleeper)?;
        let display = DisplayDriver::new(
            self.config.display.clone(),
            SystemSupervisor::new(),
            &self.logger,
        );
        let mut scheduler = Scheduler::new(
            plan,
            &self.config.image_dir,
            &transport,
            display,
            self.config.refresh_minute,
            &self.logger,
        );
        scheduler.prepare();
        Ok(scheduler.run_cycle())
    }

    pub fn next_wake(&self) -> Duration {
        scheduler::next_wake(&Local::now(), self.config.refresh_minute)
    }

    /// A missing or unwritable image dir only costs this cycle's download.
    fn prepare_image_dir(&self) {
        if let Err(err) = fs::create_dir_all(&self.config.image_dir) {
            self.logger.warn(format!(
                "Cannot create image directory {}: {err}; will retry on the next cycle.",
                self.config.image_dir.display()
            ));
        }
    }

    fn transport(&self) -> Result<ReqwestTransport> {
        ReqwestTransport::new(self.config.probe.http_timeout, self.config.download_timeout)
    }

    fn network_plan<S: Sleeper + ?Sized>(&self, sleeper: &S) -> Result<NetworkPlan> {
        if self.config.skip_probe {
            self.logger.info("Skipping startup network checks.");
            return Ok(NetworkPlan::unprobed(&self.config.probe));
        }
        let host = SystemHost::new()?;
        let mut prober = Prober::new(&self.config.probe, host, sleeper, &self.logger);
        Ok(prober.probe())
    }
}
