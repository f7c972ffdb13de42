use super::supervisor::{ProcessSupervisor, ViewerExit};
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::time::Duration;

/// What a scripted viewer does once spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerBehavior {
    /// Keeps running (like `fim` in the foreground).
    StaysRunning,
    /// Exits immediately with this code (like `fbi` daemonising, or failing).
    Exits(i32),
    /// `spawn` itself fails.
    FailsToStart,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Find(String),
    Terminate(u32),
    Spawn { program: String, args: Vec<String> },
}

/// In-memory process table for display tests.
#[derive(Debug)]
pub struct FakeSupervisor {
    running: BTreeSet<u32>,
    stubborn: BTreeSet<u32>,
    behavior: ViewerBehavior,
    next_pid: u32,
    last_exit: Option<(u32, i32)>,
    events: Vec<SupervisorEvent>,
}

impl Default for FakeSupervisor {
    fn default() -> Self {
        Self::new(ViewerBehavior::StaysRunning)
    }
}

impl FakeSupervisor {
    pub fn new(behavior: ViewerBehavior) -> Self {
        Self {
            running: BTreeSet::new(),
            stubborn: BTreeSet::new(),
            behavior,
            next_pid: 1000,
            last_exit: None,
            events: Vec::new(),
        }
    }

    /// Pretend viewer processes with these pids are already running.
    pub fn with_running(mut self, pids: &[u32]) -> Self {
        self.running.extend(pids.iter().copied());
        self
    }

    /// Pids that ignore SIGTERM.
    pub fn with_stubborn(mut self, pids: &[u32]) -> Self {
        self.stubborn.extend(pids.iter().copied());
        self
    }

    pub fn set_behavior(&mut self, behavior: ViewerBehavior) {
        self.behavior = behavior;
    }

    pub fn events(&self) -> &[SupervisorEvent] {
        &self.events
    }

    pub fn running(&self) -> Vec<u32> {
        self.running.iter().copied().collect()
    }

    pub fn spawns(&self) -> Vec<&[String]> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SupervisorEvent::Spawn { args, .. } => Some(args.as_slice()),
                _ => None,
            })
            .collect()
    }
}

impl ProcessSupervisor for FakeSupervisor {
    fn find(&mut self, program: &str) -> Vec<u32> {
        self.events.push(SupervisorEvent::Find(program.to_string()));
        self.running()
    }

    fn terminate(&mut self, pid: u32) -> Result<()> {
        self.events.push(SupervisorEvent::Terminate(pid));
        if !self.running.contains(&pid) {
            return Err(Error::Process(format!("pid {pid} no longer exists")));
        }
        if !self.stubborn.contains(&pid) {
            self.running.remove(&pid);
        }
        Ok(())
    }

    fn is_running(&mut self, pid: u32) -> bool {
        self.running.contains(&pid)
    }

    fn spawn(&mut self, program: &str, args: &[String]) -> Result<u32> {
        self.events.push(SupervisorEvent::Spawn {
            program: program.to_string(),
            args: args.to_vec(),
        });
        let pid = self.next_pid;
        self.next_pid += 1;
        match self.behavior {
            ViewerBehavior::FailsToStart => {
                Err(Error::Process(format!("failed to start {program}: not found")))
            }
            ViewerBehavior::StaysRunning => {
                self.running.insert(pid);
                Ok(pid)
            }
            ViewerBehavior::Exits(code) => {
                self.last_exit = Some((pid, code));
                Ok(pid)
            }
        }
    }

    fn wait_timeout(&mut self, pid: u32, _timeout: Duration) -> Result<Option<ViewerExit>> {
        if self.running.contains(&pid) {
            return Ok(None);
        }
        match self.last_exit {
            Some((exited, code)) if exited == pid => Ok(Some(ViewerExit {
                success: code == 0,
                code: Some(code),
            })),
            _ => Err(Error::Process(format!("pid {pid} is not a child of this agent"))),
        }
    }
}
