use crate::{retry::Sleeper, Error, Result};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

const SLEEP_SLICE: Duration = Duration::from_millis(500);

/// Install a ctrl-c/SIGTERM handler that flips the shared running flag instead of exiting immediately.
pub(crate) fn create_shutdown_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let running_handle = running.clone();

    ctrlc::set_handler(move || {
        running_handle.store(false, Ordering::SeqCst);
    })
    .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

    Ok(running)
}

/// Real sleeper that wakes early once the running flag is cleared.
#[derive(Debug, Clone)]
pub struct InterruptibleSleeper {
    running: Arc<AtomicBool>,
}

impl InterruptibleSleeper {
    pub fn new(running: Arc<AtomicBool>) -> Self {
        Self { running }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Sleeper for InterruptibleSleeper {
    fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if !self.is_running() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_false_when_already_stopped() {
        let flag = Arc::new(AtomicBool::new(false));
        let sleeper = InterruptibleSleeper::new(flag);
        let started = Instant::now();
        assert!(!sleeper.sleep(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn wakes_early_when_flag_clears() {
        let flag = Arc::new(AtomicBool::new(true));
        let sleeper = InterruptibleSleeper::new(flag.clone());
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            flag.store(false, Ordering::SeqCst);
        });
        let started = Instant::now();
        assert!(!sleeper.sleep(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(5));
        stopper.join().unwrap();
    }

    #[test]
    fn completes_short_sleep() {
        let sleeper = InterruptibleSleeper::new(Arc::new(AtomicBool::new(true)));
        assert!(sleeper.sleep(Duration::from_millis(10)));
        assert!(sleeper.sleep(Duration::ZERO));
    }
}
