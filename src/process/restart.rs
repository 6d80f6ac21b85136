use crate::config::AppSpec;
use crate::process::types::{ExitReport, InstanceState, ProcessInstance};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Ceiling for the exponential relaunch backoff
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Something that ended (or must end) an instance's current incarnation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The process exited or was signaled on its own
    Exited(ExitReport),
    /// Resident memory went over the configured ceiling
    MemoryExceeded { limit: u64, observed: u64 },
    /// Files below the working directory changed (watch mode)
    FilesChanged,
}

impl Fault {
    /// State an instance settles in when no relaunch follows.
    ///
    /// Only a process that died on its own with a failure is Crashed; a
    /// clean exit or a termination the supervisor forced is Stopped.
    pub fn settled_state(&self) -> InstanceState {
        match self {
            Fault::Exited(exit) if !exit.is_clean() => InstanceState::Crashed,
            _ => InstanceState::Stopped,
        }
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fault::Exited(exit) => write!(f, "exited with {}", exit),
            Fault::MemoryExceeded { limit, observed } => write!(
                f,
                "memory limit exceeded ({} bytes > {} bytes)",
                observed, limit
            ),
            Fault::FilesChanged => write!(f, "watched files changed"),
        }
    }
}

/// What the supervisor should do about a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Launch a new incarnation after `delay`
    Relaunch { delay: Duration },
    /// Crash-loop threshold hit; give up until a user restart
    MarkCrashedPermanently,
    /// Automatic restart is disabled
    NoAction,
}

/// Restart policy configuration
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Whether automatic restart is enabled
    pub enabled: bool,
    /// Maximum number of restarts within the time window
    pub max_restarts: usize,
    /// Rolling window for counting restarts
    pub window: Duration,
    /// Delay before the first restart in a window
    pub initial_delay: Duration,
    pub backoff: Backoff,
}

impl RestartPolicy {
    /// Create a restart policy from an application spec
    pub fn from_spec(spec: &AppSpec) -> Self {
        Self {
            enabled: spec.auto_restart,
            max_restarts: spec.max_restarts,
            window: spec.restart_window,
            initial_delay: spec.restart_delay,
            backoff: Backoff {
                max_delay: MAX_BACKOFF,
            },
        }
    }

    /// Decide what happens after a fault given the restart history.
    ///
    /// Every fault kind goes through the same threshold check; memory
    /// breaches and file changes only differ in how the supervisor ends the
    /// old incarnation.
    pub fn decide(&self, tracker: &RestartTracker) -> Action {
        if !self.enabled {
            return Action::NoAction;
        }

        let recent = tracker.count_recent_restarts(self.window);
        if recent >= self.max_restarts {
            return Action::MarkCrashedPermanently;
        }

        Action::Relaunch {
            delay: self.backoff.calculate_delay(self.initial_delay, recent),
        }
    }
}

/// Decide the fate of an instance after `fault`
pub fn decide(instance: &ProcessInstance, fault: &Fault) -> Action {
    let action = RestartPolicy::from_spec(&instance.spec).decide(&instance.tracker);
    debug!("{} {}: {:?}", instance.label(), fault, action);
    action
}

/// Exponential backoff with a ceiling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub max_delay: Duration,
}

impl Backoff {
    /// Calculate the delay for a given restart attempt
    pub fn calculate_delay(&self, initial_delay: Duration, restart_count: usize) -> Duration {
        // delay = initial * 2^restart_count
        let factor = 2_u32.saturating_pow(restart_count.min(31) as u32);
        initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Tracks automatic restart timestamps for one instance
#[derive(Debug, Clone, Default)]
pub struct RestartTracker {
    restart_times: VecDeque<Instant>,
}

impl RestartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a restart attempt
    pub fn record_restart(&mut self) {
        self.record_restart_at(Instant::now());
    }

    pub fn record_restart_at(&mut self, at: Instant) {
        self.restart_times.push_back(at);
    }

    /// Count restarts within `window` of now
    pub fn count_recent_restarts(&self, window: Duration) -> usize {
        self.count_recent_restarts_at(window, Instant::now())
    }

    pub fn count_recent_restarts_at(&self, window: Duration, now: Instant) -> usize {
        self.restart_times
            .iter()
            .filter(|&&time| now.saturating_duration_since(time) < window)
            .count()
    }

    /// Clear restart history
    pub fn clear(&mut self) {
        self.restart_times.clear();
    }

    /// Drop records older than `window` so the history stays bounded
    pub fn prune_old_restarts(&mut self, window: Duration) {
        self.prune_old_restarts_at(window, Instant::now());
    }

    pub fn prune_old_restarts_at(&mut self, window: Duration, now: Instant) {
        while let Some(&front) = self.restart_times.front() {
            if now.saturating_duration_since(front) >= window {
                self.restart_times.pop_front();
            } else {
                break;
            }
        }
    }
}
