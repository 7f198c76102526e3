use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a batch schedules its jobs.
///
/// - `Sequential`: one job at a time, in submission order.
/// - `Parallel`: up to `max_concurrency` jobs at once; results are reported in
///   completion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyMode {
    Sequential,
    Parallel { max_concurrency: usize },
}

impl ConcurrencyMode {
    /// Number of jobs allowed to hold an engine process at the same time.
    pub fn slots(&self) -> usize {
        match self {
            ConcurrencyMode::Sequential => 1,
            ConcurrencyMode::Parallel { max_concurrency } => (*max_concurrency).max(1),
        }
    }
}

/// Scheduling mode as written in `[config].mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeSetting {
    Parallel,
    Sequential,
}

impl Default for ModeSetting {
    fn default() -> Self {
        ModeSetting::Parallel
    }
}

impl FromStr for ModeSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "parallel" => Ok(ModeSetting::Parallel),
            "sequential" => Ok(ModeSetting::Sequential),
            other => Err(format!(
                "invalid mode: {other} (expected \"parallel\" or \"sequential\")"
            )),
        }
    }
}

/// Which execution backend drives the engine. Selected once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Invoke the engine's command-line entry point.
    Subprocess,
    /// Drive an automation host over its line protocol.
    Automation,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Subprocess
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Subprocess => f.write_str("subprocess"),
            BackendKind::Automation => f.write_str("automation"),
        }
    }
}

/// Derived completion verdict for one job.
///
/// Computed from artifact evidence plus the supervised process status; the
/// exit code alone never produces `CompletedSuccess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionState {
    Running,
    CompletedSuccess,
    CompletedFailure,
    TimedOut,
    Crashed,
}

impl CompletionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CompletionState::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CompletionState::CompletedSuccess)
    }
}

impl fmt::Display for CompletionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompletionState::Running => "running",
            CompletionState::CompletedSuccess => "completed-success",
            CompletionState::CompletedFailure => "completed-failure",
            CompletionState::TimedOut => "timed-out",
            CompletionState::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_mode_has_one_slot() {
        assert_eq!(ConcurrencyMode::Sequential.slots(), 1);
        assert_eq!(ConcurrencyMode::Parallel { max_concurrency: 0 }.slots(), 1);
        assert_eq!(ConcurrencyMode::Parallel { max_concurrency: 3 }.slots(), 3);
    }

    #[test]
    fn mode_setting_parses_case_insensitively() {
        assert_eq!("Parallel".parse::<ModeSetting>(), Ok(ModeSetting::Parallel));
        assert_eq!(" sequential ".parse::<ModeSetting>(), Ok(ModeSetting::Sequential));
        assert!("round-robin".parse::<ModeSetting>().is_err());
    }

    #[test]
    fn only_running_is_non_terminal() {
        assert!(!CompletionState::Running.is_terminal());
        assert!(CompletionState::Crashed.is_terminal());
        assert_eq!(CompletionState::TimedOut.to_string(), "timed-out");
    }
}
