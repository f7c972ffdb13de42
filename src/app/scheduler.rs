//! Hourly refresh loop: settings, cache, and display, once at startup and then
//! at a fixed minute past every hour.

use crate::{
    app::Logger,
    cache::ImageCache,
    display::{DisplayDriver, DisplayOutcome, ProcessSupervisor},
    probe::NetworkPlan,
    remote::{HttpTransport, ImageName, SettingsClient},
    retry::Sleeper,
};
use chrono::{DateTime, TimeZone, Timelike};
use std::path::{Path, PathBuf};
use std::time::Duration;

const HOUR_MS: u64 = 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Init,
    DisplayImmediate,
    Wait,
    Refresh,
    Stopped,
}

/// Result of one settings/cache/display pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Displayed(PathBuf),
    Unchanged(PathBuf),
    NoSettings,
    DownloadFailed,
    DisplayFailed(String),
}

/// Time from `now` until the next `HH:minute:00`. Exactly on the mark is zero.
pub fn next_wake<Tz: TimeZone>(now: &DateTime<Tz>, minute: u32) -> Duration {
    let nanos = u64::from(now.nanosecond().min(999_999_999));
    let into_hour_ms =
        (u64::from(now.minute()) * 60 + u64::from(now.second())) * 1_000 + nanos / 1_000_000;
    let target_ms = u64::from(minute.min(59)) * 60_000;
    let wait_ms = if into_hour_ms <= target_ms {
        target_ms - into_hour_ms
    } else {
        HOUR_MS - into_hour_ms + target_ms
    };
    Duration::from_millis(wait_ms)
}

pub struct Scheduler<'a, T: HttpTransport + ?Sized, S: ProcessSupervisor> {
    plan: NetworkPlan,
    image_dir: &'a Path,
    transport: &'a T,
    display: DisplayDriver<'a, S>,
    refresh_minute: u32,
    logger: &'a Logger,
    state: SchedulerState,
    shown: Option<ImageName>,
    display_failed: bool,
}

impl<'a, T: HttpTransport + ?Sized, S: ProcessSupervisor> Scheduler<'a, T, S> {
    pub fn new(
        plan: NetworkPlan,
        image_dir: &'a Path,
        transport: &'a T,
        display: DisplayDriver<'a, S>,
        refresh_minute: u32,
        logger: &'a Logger,
    ) -> Self {
        Self {
            plan,
            image_dir,
            transport,
            display,
            refresh_minute,
            logger,
            state: SchedulerState::Init,
            shown: None,
            display_failed: false,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn display(&self) -> &DisplayDriver<'a, S> {
        &self.display
    }

    /// Name of the image currently on screen, if the last draw succeeded.
    pub fn shown(&self) -> Option<&ImageName> {
        self.shown.as_ref()
    }

    /// Console preparation done once before the first draw.
    pub fn prepare(&mut self) {
        self.display.hide_cursor();
    }

    /// One pass. Never fails; problems are logged and leave the screen as is.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let settings_client = SettingsClient::new(self.transport, self.logger);
        let Some((base, settings)) = settings_client.fetch_first(&self.plan.bases) else {
            self.logger.warn("No settings available this cycle; keeping the current image.");
            return CycleOutcome::NoSettings;
        };

        let cache = ImageCache::new(self.image_dir, self.transport, self.logger);
        let Some(image) = cache.ensure(&base, &settings) else {
            return CycleOutcome::DownloadFailed;
        };

        let changed = self.shown.as_ref() != Some(&image.name);
        if !(changed || image.downloaded || settings.force_update || self.display_failed) {
            self.logger.info(format!("Image {} unchanged; not redrawing.", image.name));
            return CycleOutcome::Unchanged(image.path);
        }

        match self.display.show(&image.path) {
            DisplayOutcome::Shown => {
                self.shown = Some(image.name);
                self.display_failed = false;
                CycleOutcome::Displayed(image.path)
            }
            DisplayOutcome::Failed(reason) => {
                self.shown = None;
                self.display_failed = true;
                CycleOutcome::DisplayFailed(reason)
            }
        }
    }

    /// Advance the state machine by one transition.
    pub fn step<Sl, Tz, C>(&mut self, sleeper: &Sl, clock: C) -> SchedulerState
    where
        Sl: Sleeper + ?Sized,
        Tz: TimeZone,
        C: Fn() -> DateTime<Tz>,
    {
        self.state = match self.state {
            SchedulerState::Init => {
                self.prepare();
                SchedulerState::DisplayImmediate
            }
            SchedulerState::DisplayImmediate | SchedulerState::Refresh => {
                self.run_cycle();
                SchedulerState::Wait
            }
            SchedulerState::Wait => {
                let wait = next_wake(&clock(), self.refresh_minute);
                self.logger.info(format!(
                    "Next refresh in {}.",
                    humantime::format_duration(Duration::from_secs(wait.as_secs()))
                ));
                if sleeper.sleep(wait) {
                    SchedulerState::Refresh
                } else {
                    SchedulerState::Stopped
                }
            }
            SchedulerState::Stopped => SchedulerState::Stopped,
        };
        self.state
    }

    /// Loop until the sleeper reports shutdown.
    pub fn run<Sl, Tz, C>(&mut self, sleeper: &Sl, clock: C)
    where
        Sl: Sleeper + ?Sized,
        Tz: TimeZone,
        C: Fn() -> DateTime<Tz>,
    {
        while self.step(sleeper, &clock) != SchedulerState::Stopped {}
        self.logger.info("Shutdown requested; scheduler stopped.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::LogLevel;
    use crate::display::fake::{FakeSupervisor, ViewerBehavior};
    use crate::display::DisplayOptions;
    use crate::probe::NetworkPosition;
    use crate::remote::fake::FakeTransport;
    use crate::remote::BaseUrl;
    use crate::retry::RecordingSleeper;
    use chrono::Utc;
    use std::time::SystemTime;

    const BASE: &str = "http://frame.test";

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, h, m, s).unwrap()
    }

    fn plan() -> NetworkPlan {
        NetworkPlan {
            position: NetworkPosition::Internal,
            bases: vec![BaseUrl::parse(BASE).unwrap()],
        }
    }

    fn display_options(dir: &Path) -> DisplayOptions {
        DisplayOptions {
            viewer_program: "fbi".into(),
            viewer_args: vec!["-a".into(), "{path}".into()],
            framebuffer_device: PathBuf::from("/dev/fb0"),
            cursor_blink_path: dir.join("cursor_blink"),
            start_timeout: Duration::from_millis(10),
            terminate_wait: Duration::from_millis(10),
        }
    }

    fn settings_body(name: &str) -> Vec<u8> {
        format!(r#"{{"currentPic":"{name}","setDate":1700000000}}"#).into_bytes()
    }

    fn modified() -> Option<SystemTime> {
        Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000))
    }

    #[test]
    fn wake_math_matches_the_hourly_mark() {
        assert_eq!(
            next_wake(&at(10, 2, 30), 1),
            Duration::from_secs(58 * 60 + 30)
        );
        assert_eq!(next_wake(&at(10, 1, 0), 1), Duration::ZERO);
        assert_eq!(next_wake(&at(10, 0, 0), 1), Duration::from_secs(60));
        assert_eq!(next_wake(&at(10, 59, 59), 0), Duration::from_secs(1));
        assert_eq!(next_wake(&at(10, 30, 0), 45), Duration::from_secs(15 * 60));
    }

    #[test]
    fn wake_math_counts_subsecond_offsets() {
        let now = at(10, 0, 59) + chrono::Duration::milliseconds(250);
        assert_eq!(next_wake(&now, 1), Duration::from_millis(750));
    }

    #[test]
    fn unchanged_settings_draw_once() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::stdout_only(LogLevel::Debug);
        let transport = FakeTransport::new();
        transport.route(&format!("{BASE}/settings"), 200, settings_body("sunset.jpg"));
        transport.route_file(
            &format!("{BASE}/images/sunset.jpg"),
            b"jpeg bytes".to_vec(),
            modified(),
        );
        let display = DisplayDriver::new(
            display_options(dir.path()),
            FakeSupervisor::new(ViewerBehavior::Exits(0)),
            &logger,
        );
        let mut scheduler = Scheduler::new(plan(), dir.path(), &transport, display, 1, &logger);

        let path = dir.path().join("sunset.jpg");
        assert_eq!(scheduler.run_cycle(), CycleOutcome::Displayed(path.clone()));
        assert_eq!(scheduler.run_cycle(), CycleOutcome::Unchanged(path.clone()));
        assert_eq!(transport.download_count(), 1);
        assert_eq!(scheduler.display().supervisor().spawns().len(), 1);
        assert_eq!(std::fs::read(&path).unwrap(), b"jpeg bytes");
        assert_eq!(scheduler.shown().map(ImageName::as_str), Some("sunset.jpg"));
    }

    #[test]
    fn new_name_triggers_redraw() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::stdout_only(LogLevel::Debug);
        let transport = FakeTransport::new();
        transport.route(&format!("{BASE}/settings"), 200, settings_body("a.jpg"));
        transport.route_file(&format!("{BASE}/images/a.jpg"), b"a".to_vec(), modified());
        transport.route_file(&format!("{BASE}/images/b.jpg"), b"b".to_vec(), modified());
        let display = DisplayDriver::new(
            display_options(dir.path()),
            FakeSupervisor::new(ViewerBehavior::Exits(0)),
            &logger,
        );
        let mut scheduler = Scheduler::new(plan(), dir.path(), &transport, display, 1, &logger);

        assert!(matches!(scheduler.run_cycle(), CycleOutcome::Displayed(_)));
        transport.route(&format!("{BASE}/settings"), 200, settings_body("b.jpg"));
        assert_eq!(
            scheduler.run_cycle(),
            CycleOutcome::Displayed(dir.path().join("b.jpg"))
        );
        assert_eq!(scheduler.display().supervisor().spawns().len(), 2);
    }

    #[test]
    fn missing_settings_leave_display_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::stdout_only(LogLevel::Debug);
        let transport = FakeTransport::new();
        transport.route(&format!("{BASE}/settings"), 200, br#"{"setDate":1}"#.to_vec());
        let display = DisplayDriver::new(
            display_options(dir.path()),
            FakeSupervisor::new(ViewerBehavior::Exits(0)).with_running(&[55]),
            &logger,
        );
        let mut scheduler = Scheduler::new(plan(), dir.path(), &transport, display, 1, &logger);

        assert_eq!(scheduler.run_cycle(), CycleOutcome::NoSettings);
        assert!(scheduler.display().supervisor().events().is_empty());
        assert_eq!(scheduler.display().supervisor().running(), vec![55]);
    }

    #[test]
    fn failed_display_is_retried_next_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::stdout_only(LogLevel::Debug);
        let transport = FakeTransport::new();
        transport.route(&format!("{BASE}/settings"), 200, settings_body("sunset.jpg"));
        transport.route_file(
            &format!("{BASE}/images/sunset.jpg"),
            b"jpeg".to_vec(),
            modified(),
        );
        let display = DisplayDriver::new(
            display_options(dir.path()),
            FakeSupervisor::new(ViewerBehavior::Exits(1)),
            &logger,
        );
        let mut scheduler = Scheduler::new(plan(), dir.path(), &transport, display, 1, &logger);

        assert!(matches!(
            scheduler.run_cycle(),
            CycleOutcome::DisplayFailed(_)
        ));
        assert!(scheduler.shown().is_none());
        assert!(matches!(
            scheduler.run_cycle(),
            CycleOutcome::DisplayFailed(_)
        ));
        assert_eq!(transport.download_count(), 1);
        assert_eq!(scheduler.display().supervisor().spawns().len(), 2);
    }

    #[test]
    fn download_failure_keeps_going() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::stdout_only(LogLevel::Debug);
        let transport = FakeTransport::new();
        transport.route(&format!("{BASE}/settings"), 200, settings_body("gone.jpg"));
        transport.route(&format!("{BASE}/images/gone.jpg"), 404, Vec::new());
        let display = DisplayDriver::new(
            display_options(dir.path()),
            FakeSupervisor::new(ViewerBehavior::Exits(0)),
            &logger,
        );
        let mut scheduler = Scheduler::new(plan(), dir.path(), &transport, display, 1, &logger);

        assert_eq!(scheduler.run_cycle(), CycleOutcome::DownloadFailed);
        assert!(scheduler.display().supervisor().spawns().is_empty());
        assert!(!dir.path().join("gone.jpg").exists());
    }

    #[test]
    fn run_walks_states_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::stdout_only(LogLevel::Debug);
        let transport = FakeTransport::new();
        transport.route(&format!("{BASE}/settings"), 200, settings_body("sunset.jpg"));
        transport.route_file(
            &format!("{BASE}/images/sunset.jpg"),
            b"jpeg".to_vec(),
            modified(),
        );
        let display = DisplayDriver::new(
            display_options(dir.path()),
            FakeSupervisor::new(ViewerBehavior::Exits(0)),
            &logger,
        );
        let mut scheduler = Scheduler::new(plan(), dir.path(), &transport, display, 1, &logger);
        let sleeper = RecordingSleeper::stopping_after(2);

        assert_eq!(scheduler.state(), SchedulerState::Init);
        scheduler.run(&sleeper, || at(10, 2, 30));
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_secs(58 * 60 + 30); 3]
        );
        assert_eq!(transport.download_count(), 1);
        assert_eq!(scheduler.display().supervisor().spawns().len(), 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("cursor_blink")).unwrap(),
            "0"
        );
    }

    #[test]
    fn uncreatable_image_dir_fails_only_the_download() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let images = blocker.join("images");
        let logger = Logger::stdout_only(LogLevel::Debug);
        let transport = FakeTransport::new();
        transport.route(&format!("{BASE}/settings"), 200, settings_body("sunset.jpg"));
        transport.route_file(
            &format!("{BASE}/images/sunset.jpg"),
            b"jpeg".to_vec(),
            modified(),
        );
        let display = DisplayDriver::new(
            display_options(dir.path()),
            FakeSupervisor::new(ViewerBehavior::Exits(0)),
            &logger,
        );
        let mut scheduler = Scheduler::new(plan(), &images, &transport, display, 1, &logger);

        assert_eq!(scheduler.run_cycle(), CycleOutcome::DownloadFailed);
        assert!(scheduler.display().supervisor().spawns().is_empty());
    }
}
