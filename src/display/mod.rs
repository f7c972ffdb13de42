use crate::app::Logger;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

pub mod fake;
pub mod supervisor;

pub use supervisor::{ProcessSupervisor, SystemSupervisor, ViewerExit};

const TERMINATE_POLL: Duration = Duration::from_millis(50);
pub const DEVICE_PLACEHOLDER: &str = "{device}";
pub const PATH_PLACEHOLDER: &str = "{path}";

/// Viewer invocation and console settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayOptions {
    pub viewer_program: String,
    /// Arguments with `{device}`/`{path}` placeholders.
    pub viewer_args: Vec<String>,
    pub framebuffer_device: PathBuf,
    pub cursor_blink_path: PathBuf,
    pub start_timeout: Duration,
    pub terminate_wait: Duration,
}

impl DisplayOptions {
    pub fn expand_args(&self, image: &Path) -> Vec<String> {
        let device = self.framebuffer_device.to_string_lossy();
        let path = image.to_string_lossy();
        self.viewer_args
            .iter()
            .map(|arg| {
                arg.replace(DEVICE_PLACEHOLDER, &device)
                    .replace(PATH_PLACEHOLDER, &path)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayOutcome {
    Shown,
    Failed(String),
}

impl DisplayOutcome {
    pub fn is_shown(&self) -> bool {
        matches!(self, DisplayOutcome::Shown)
    }
}

/// Keeps exactly one viewer on the framebuffer.
pub struct DisplayDriver<'a, S: ProcessSupervisor> {
    options: DisplayOptions,
    supervisor: S,
    logger: &'a Logger,
}

impl<'a, S: ProcessSupervisor> DisplayDriver<'a, S> {
    pub fn new(options: DisplayOptions, supervisor: S, logger: &'a Logger) -> Self {
        Self {
            options,
            supervisor,
            logger,
        }
    }

    pub fn supervisor(&self) -> &S {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut S {
        &mut self.supervisor
    }

    /// Replace whatever is on screen with `image`. Failures are logged and
    /// reported, never propagated.
    pub fn show(&mut self, image: &Path) -> DisplayOutcome {
        self.stop_existing_viewers();
        self.hide_cursor();

        self.logger
            .info(format!("Displaying image: {}", image.display()));
        let program = self.options.viewer_program.clone();
        let args = self.options.expand_args(image);
        let pid = match self.supervisor.spawn(&program, &args) {
            Ok(pid) => pid,
            Err(err) => {
                let reason = format!("viewer failed to start: {err}");
                self.logger.error(&reason);
                return DisplayOutcome::Failed(reason);
            }
        };

        match self.supervisor.wait_timeout(pid, self.options.start_timeout) {
            Ok(None) | Ok(Some(ViewerExit { success: true, .. })) => {
                self.logger.info(format!(
                    "Image {} displayed successfully.",
                    image.display()
                ));
                DisplayOutcome::Shown
            }
            Ok(Some(ViewerExit { code, .. })) => {
                let reason = match code {
                    Some(code) => format!("viewer exited with status {code}"),
                    None => "viewer was killed by a signal".to_string(),
                };
                self.logger.error(format!("Failed to display image: {reason}"));
                DisplayOutcome::Failed(reason)
            }
            Err(err) => {
                let reason = format!("could not check viewer status: {err}");
                self.logger.error(format!("Failed to display image: {reason}"));
                DisplayOutcome::Failed(reason)
            }
        }
    }

    /// Terminate every running viewer and wait briefly for each to go away.
    pub fn stop_existing_viewers(&mut self) -> usize {
        let pids = self.supervisor.find(&self.options.viewer_program);
        if pids.is_empty() {
            self.logger.debug("No running viewer found.");
            return 0;
        }
        let mut stopped = 0;
        for pid in pids {
            self.logger
                .info(format!("Stopping previous viewer (pid {pid})."));
            if let Err(err) = self.supervisor.terminate(pid) {
                self.logger
                    .warn(format!("Could not stop viewer pid {pid}: {err}"));
                continue;
            }
            if self.wait_for_exit(pid) {
                stopped += 1;
            } else {
                self.logger.warn(format!(
                    "Viewer pid {pid} still running after {}",
                    humantime::format_duration(self.options.terminate_wait)
                ));
            }
        }
        stopped
    }

    /// Write `0` to the fbcon cursor blink control.
    pub fn hide_cursor(&self) -> bool {
        match fs::write(&self.options.cursor_blink_path, "0") {
            Ok(()) => {
                self.logger.debug("Cursor blinking disabled.");
                true
            }
            Err(err) => {
                self.logger.warn(format!(
                    "Could not disable cursor blink via {}: {err}",
                    self.options.cursor_blink_path.display()
                ));
                false
            }
        }
    }

    fn wait_for_exit(&mut self, pid: u32) -> bool {
        let deadline = Instant::now() + self.options.terminate_wait;
        loop {
            if !self.supervisor.is_running(pid) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(TERMINATE_POLL));
        }
    }
}
