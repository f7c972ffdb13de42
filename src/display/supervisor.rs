use crate::{Error, Result};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, Signal, System};

const WAIT_POLL: Duration = Duration::from_millis(50);

/// How a viewer process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewerExit {
    pub success: bool,
    pub code: Option<i32>,
}

/// Process-table capability used by the display driver.
pub trait ProcessSupervisor {
    /// Live pids whose process name matches `program` (basename), excluding ourselves.
    fn find(&mut self, program: &str) -> Vec<u32>;
    /// Ask `pid` to exit (SIGTERM).
    fn terminate(&mut self, pid: u32) -> Result<()>;
    fn is_running(&mut self, pid: u32) -> bool;
    /// Start `program` detached from our stdio and return its pid.
    fn spawn(&mut self, program: &str, args: &[String]) -> Result<u32>;
    /// Wait up to `timeout` for a process we spawned. `None` means it is still running.
    fn wait_timeout(&mut self, pid: u32, timeout: Duration) -> Result<Option<ViewerExit>>;
}

/// Real supervisor: sysinfo for the process table, `std::process` for children.
pub struct SystemSupervisor {
    system: System,
    children: HashMap<u32, Child>,
    self_pid: Option<Pid>,
}

impl Default for SystemSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSupervisor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            children: HashMap::new(),
            self_pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// Collect exit statuses of children so they do not linger as zombies.
    fn reap_children(&mut self) {
        self.children
            .retain(|_, child| matches!(child.try_wait(), Ok(None)));
    }

    fn refresh_pid(&mut self, pid: Pid) {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    }
}

impl ProcessSupervisor for SystemSupervisor {
    fn find(&mut self, program: &str) -> Vec<u32> {
        self.reap_children();
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        let wanted = program_name(program);
        let mut pids: Vec<u32> = self
            .system
            .processes()
            .iter()
            .filter(|(pid, _)| Some(**pid) != self.self_pid)
            .filter(|(_, process)| process.status() != ProcessStatus::Zombie)
            .filter(|(_, process)| process.name() == wanted)
            .map(|(pid, _)| pid.as_u32())
            .collect();
        pids.sort_unstable();
        pids
    }

    fn terminate(&mut self, pid: u32) -> Result<()> {
        let sys_pid = Pid::from_u32(pid);
        self.refresh_pid(sys_pid);
        let process = self
            .system
            .process(sys_pid)
            .ok_or_else(|| Error::Process(format!("pid {pid} no longer exists")))?;
        match process.kill_with(Signal::Term) {
            Some(true) => Ok(()),
            Some(false) => Err(Error::Process(format!("failed to signal pid {pid}"))),
            None => Err(Error::Process("SIGTERM unsupported on this platform".into())),
        }
    }

    fn is_running(&mut self, pid: u32) -> bool {
        if let Some(child) = self.children.get_mut(&pid) {
            return match child.try_wait() {
                Ok(None) => true,
                _ => {
                    self.children.remove(&pid);
                    false
                }
            };
        }
        let sys_pid = Pid::from_u32(pid);
        self.refresh_pid(sys_pid);
        self.system
            .process(sys_pid)
            .map(|p| p.status() != ProcessStatus::Zombie)
            .unwrap_or(false)
    }

    fn spawn(&mut self, program: &str, args: &[String]) -> Result<u32> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Process(format!("failed to start {program}: {e}")))?;
        let pid = child.id();
        self.children.insert(pid, child);
        Ok(pid)
    }

    fn wait_timeout(&mut self, pid: u32, timeout: Duration) -> Result<Option<ViewerExit>> {
        let child = self
            .children
            .get_mut(&pid)
            .ok_or_else(|| Error::Process(format!("pid {pid} is not a child of this agent")))?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                self.children.remove(&pid);
                return Ok(Some(ViewerExit {
                    success: status.success(),
                    code: status.code(),
                }));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep((deadline - now).min(WAIT_POLL));
        }
    }
}

/// `/usr/bin/fbi` and `fbi` both match processes named `fbi`.
fn program_name(program: &str) -> &OsStr {
    Path::new(program)
        .file_name()
        .unwrap_or_else(|| OsStr::new(program))
}
