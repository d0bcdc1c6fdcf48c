//! Batch retry loop around one analysis unit.
//!
//! A failed attempt is logged with the memory picture of the process, then
//! the runner waits out a short and a long recovery interval before trying
//! again. Everything an attempt allocated (caches, pools, writers) is owned
//! by the attempt and is released when it returns, so a retry always starts
//! from a clean state. After `max_retries` retries the unit is skipped.

use std::fmt;
use std::fs;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Running,
    FailedRetrying,
    Success,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub short_wait: Duration,
    pub long_wait: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            short_wait: config.short_wait(),
            long_wait: config.long_wait(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome<T> {
    Success { value: T, attempts: u32 },
    Skipped { attempts: u32 },
}

impl<T> BatchOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchOutcome::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            BatchOutcome::Success { attempts, .. } | BatchOutcome::Skipped { attempts } => *attempts,
        }
    }
}

#[derive(Debug)]
pub struct BatchRunner {
    policy: RetryPolicy,
    failures: u32,
    state: BatchState,
}

impl BatchRunner {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: 0,
            state: BatchState::Success,
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.failures
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Run `body` until it succeeds or the retries are used up. The body
    /// receives the 1-based attempt number.
    pub fn run<T, E, F>(&mut self, label: &str, mut body: F) -> BatchOutcome<T>
    where
        E: fmt::Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        self.failures = 0;
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.state = BatchState::Running;
            info!(unit = label, attempt, "running analysis unit");

            match body(attempt) {
                Ok(value) => {
                    self.failures = 0;
                    self.state = BatchState::Success;
                    debug!(unit = label, "batch state released");
                    info!(unit = label, attempt, "analysis unit finished");
                    return BatchOutcome::Success {
                        value,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    self.failures += 1;
                    self.state = BatchState::FailedRetrying;
                    match MemoryUsage::sample() {
                        Some(memory) => {
                            error!(unit = label, attempt, error = %e, %memory, "analysis unit failed")
                        }
                        None => error!(unit = label, attempt, error = %e, "analysis unit failed"),
                    }

                    debug!(
                        unit = label,
                        wait_secs = self.policy.short_wait.as_secs(),
                        "batch state released, short recovery wait"
                    );
                    thread::sleep(self.policy.short_wait);
                    debug!(
                        unit = label,
                        wait_secs = self.policy.long_wait.as_secs(),
                        "long recovery wait"
                    );
                    thread::sleep(self.policy.long_wait);

                    if self.failures <= self.policy.max_retries {
                        warn!(unit = label, failures = self.failures, "retrying");
                        continue;
                    }
                    warn!(unit = label, failures = self.failures, "skipping");
                    self.state = BatchState::Skipped;
                    return BatchOutcome::Skipped { attempts: attempt };
                }
            }
        }
    }
}

/// Process and system memory, in kB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub resident_kb: u64,
    pub available_kb: Option<u64>,
}

impl MemoryUsage {
    /// Read from `/proc`; `None` where it is not available.
    pub fn sample() -> Option<Self> {
        let status = fs::read_to_string("/proc/self/status").ok()?;
        let resident_kb = proc_field(&status, "VmRSS:")?;
        let available_kb = fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|meminfo| proc_field(&meminfo, "MemAvailable:"));
        Some(Self {
            resident_kb,
            available_kb,
        })
    }
}

impl fmt::Display for MemoryUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resident {} MB", self.resident_kb / 1024)?;
        if let Some(available) = self.available_kb {
            write!(f, ", available {} MB", available / 1024)?;
        }
        Ok(())
    }
}

fn proc_field(text: &str, name: &str) -> Option<u64> {
    text.lines()
        .find_map(|line| line.strip_prefix(name))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            short_wait: Duration::ZERO,
            long_wait: Duration::ZERO,
        }
    }

    #[test]
    fn test_success_after_failures_resets_counter() {
        let mut runner = BatchRunner::new(instant_policy(2));
        let outcome = runner.run("a_b", |attempt| {
            if attempt <= 2 {
                Err(format!("transient failure {attempt}"))
            } else {
                Ok(attempt * 10)
            }
        });
        assert_eq!(
            outcome,
            BatchOutcome::Success {
                value: 30,
                attempts: 3
            }
        );
        assert_eq!(runner.failure_count(), 0);
        assert_eq!(runner.state(), BatchState::Success);
    }

    #[test]
    fn test_exhausted_retries_skip() {
        let mut runner = BatchRunner::new(instant_policy(2));
        let mut calls = 0;
        let outcome: BatchOutcome<()> = runner.run("a_b", |_| {
            calls += 1;
            Err("backend down")
        });
        assert_eq!(outcome, BatchOutcome::Skipped { attempts: 3 });
        assert_eq!(calls, 3);
        assert_eq!(runner.state(), BatchState::Skipped);
    }

    #[test]
    fn test_next_unit_starts_clean() {
        let mut runner = BatchRunner::new(instant_policy(0));
        let skipped: BatchOutcome<()> = runner.run("first", |_| Err("corrupt geometry"));
        assert_eq!(skipped.attempts(), 1);
        let next = runner.run("second", |_| Ok::<_, String>("done"));
        assert!(next.is_success());
        assert_eq!(runner.failure_count(), 0);
    }

    #[test]
    fn test_proc_field_parsing() {
        let status = "Name:\ttravel-matrix\nVmRSS:\t  20480 kB\nThreads:\t4\n";
        assert_eq!(proc_field(status, "VmRSS:"), Some(20480));
        assert_eq!(proc_field(status, "VmSwap:"), None);
        let usage = MemoryUsage {
            resident_kb: 20480,
            available_kb: Some(1_048_576),
        };
        assert_eq!(usage.to_string(), "resident 20 MB, available 1024 MB");
    }
}
