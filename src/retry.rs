use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Something that can block the current thread for a while.
///
/// The daemon uses an interruptible sleeper tied to the shutdown flag; tests use
/// [`RecordingSleeper`] so startup waits finish instantly.
pub trait Sleeper {
    /// Sleep for `duration`. Returns `false` when the sleep was cut short by a
    /// shutdown request.
    fn sleep(&self, duration: Duration) -> bool;
}

/// How long and how often a startup precondition is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub interval: Duration,
    /// Wall-clock budget measured from the first attempt.
    pub deadline: Option<Duration>,
}

impl RetryPolicy {
    pub fn forever(interval: Duration) -> Self {
        Self {
            max_attempts: None,
            interval,
            deadline: None,
        }
    }

    pub fn bounded(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            interval,
            deadline: None,
        }
    }

    /// Bounded policy for checks that return instantly; see [`RetryPolicy::within_costing`].
    pub fn within(timeout: Duration, interval: Duration) -> Self {
        Self::within_costing(timeout, interval, Duration::ZERO)
    }

    /// Bounded policy for checks that may each block for up to `attempt_cost`.
    ///
    /// `n` attempts with `n - 1` sleeps between them take at most
    /// `n * attempt_cost + (n - 1) * interval`, which is kept within `timeout`.
    /// The same `timeout` is also enforced as a wall-clock deadline.
    pub fn within_costing(timeout: Duration, interval: Duration, attempt_cost: Duration) -> Self {
        let step_ms = (interval + attempt_cost).as_millis().max(1);
        let attempts = ((timeout + interval).as_millis() / step_ms).max(1);
        Self {
            deadline: Some(timeout),
            ..Self::bounded(u32::try_from(attempts).unwrap_or(u32::MAX), interval)
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Run `check` until it yields `Some`, sleeping `interval` between attempts.
    ///
    /// `on_retry` receives the attempt number that just failed. Returns `None`
    /// when attempts run out, the next sleep would overrun the deadline, or the
    /// sleeper reports shutdown.
    pub fn run<T, S, F, R>(&self, sleeper: &S, mut check: F, mut on_retry: R) -> Option<T>
    where
        S: Sleeper + ?Sized,
        F: FnMut() -> Option<T>,
        R: FnMut(u32),
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            if let Some(value) = check() {
                return Some(value);
            }
            if let Some(max) = self.max_attempts {
                if attempt >= max {
                    return None;
                }
            }
            if let Some(deadline) = self.deadline {
                if started.elapsed() + self.interval >= deadline {
                    return None;
                }
            }
            on_retry(attempt);
            if !sleeper.sleep(self.interval) {
                return None;
            }
        }
    }
}

/// Test sleeper that never blocks and remembers every requested duration.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    calls: Mutex<Vec<Duration>>,
    /// Sleeps allowed before reporting shutdown; `None` never stops.
    budget: Option<usize>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completes `sleeps` sleeps, then reports shutdown on the next one.
    pub fn stopping_after(sleeps: usize) -> Self {
        Self {
            calls: Mutex::default(),
            budget: Some(sleeps),
        }
    }

    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.calls().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> bool {
        let Ok(mut calls) = self.calls.lock() else {
            return false;
        };
        calls.push(duration);
        self.budget.map_or(true, |budget| calls.len() <= budget)
    }
}
