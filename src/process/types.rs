use crate::config::AppSpec;
use crate::process::restart::{Action, Fault, RestartTracker};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Lifecycle state of a single OS process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

impl InstanceState {
    /// Stopped and Crashed are terminal: nothing is running for the record
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceState::Stopped | InstanceState::Crashed)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Starting => write!(f, "starting"),
            InstanceState::Running => write!(f, "running"),
            InstanceState::Stopping => write!(f, "stopping"),
            InstanceState::Stopped => write!(f, "stopped"),
            InstanceState::Crashed => write!(f, "crashed"),
        }
    }
}

/// Lifecycle state of an application as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppState {
    Loaded,
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
    Restarting,
}

impl AppState {
    /// Aggregate the instance states of one application.
    ///
    /// `relaunch_pending` is true while any instance waits on a backoff
    /// timer.
    pub fn aggregate(states: &[InstanceState], relaunch_pending: bool) -> AppState {
        if states.is_empty() {
            return AppState::Loaded;
        }
        if relaunch_pending {
            return AppState::Restarting;
        }
        if states.contains(&InstanceState::Stopping) {
            return AppState::Stopping;
        }
        if states.contains(&InstanceState::Starting) {
            return AppState::Starting;
        }
        if states.contains(&InstanceState::Running) {
            return AppState::Running;
        }
        if states.contains(&InstanceState::Crashed) {
            return AppState::Crashed;
        }
        AppState::Stopped
    }
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppState::Loaded => write!(f, "loaded"),
            AppState::Starting => write!(f, "starting"),
            AppState::Running => write!(f, "running"),
            AppState::Stopping => write!(f, "stopping"),
            AppState::Stopped => write!(f, "stopped"),
            AppState::Crashed => write!(f, "crashed"),
            AppState::Restarting => write!(f, "restarting"),
        }
    }
}

/// How an incarnation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReport {
    Code(i32),
    Signal(i32),
}

impl ExitReport {
    pub fn is_clean(self) -> bool {
        self == ExitReport::Code(0)
    }
}

impl std::fmt::Display for ExitReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReport::Code(code) => write!(f, "exit code {}", code),
            ExitReport::Signal(signal) => write!(f, "signal {}", signal),
        }
    }
}

/// One running (or recently running) OS process tracked against an AppSpec.
///
/// Only the supervisor task holds these; the child handle itself lives in
/// the instance's monitor task.
#[derive(Debug)]
pub struct ProcessInstance {
    pub spec: Arc<AppSpec>,
    /// 0-based position among the app's instances
    pub index: usize,
    pub pid: Option<u32>,
    pub state: InstanceState,
    pub started_at: SystemTime,
    /// Automatic relaunches since the last user-issued restart
    pub restart_count: u32,
    /// Last resident memory sample in bytes
    pub memory_bytes: u64,
    pub last_exit: Option<ExitReport>,
    /// Why the most recent launch attempt failed
    pub last_error: Option<String>,
    /// Identifies the current incarnation; events from older ones are stale
    pub(crate) generation: u64,
    pub(crate) tracker: RestartTracker,
    /// A user stop or restart is in flight; it beats any relaunch
    pub(crate) stop_requested: bool,
    /// Fault decided on while the incarnation is still being terminated
    pub(crate) pending: Option<(Fault, Action)>,
    /// A backoff timer will relaunch this instance
    pub(crate) relaunch_pending: bool,
}

impl ProcessInstance {
    /// A record for an instance that has not been launched yet
    pub fn new(spec: Arc<AppSpec>, index: usize) -> Self {
        Self {
            spec,
            index,
            pid: None,
            state: InstanceState::Stopped,
            started_at: SystemTime::now(),
            restart_count: 0,
            memory_bytes: 0,
            last_exit: None,
            last_error: None,
            generation: 0,
            tracker: RestartTracker::new(),
            stop_requested: false,
            pending: None,
            relaunch_pending: false,
        }
    }

    /// Display name, `app` or `app-N` when the app has several instances
    pub fn label(&self) -> String {
        if self.spec.instance_count > 1 {
            format!("{}-{}", self.spec.name, self.index)
        } else {
            self.spec.name.clone()
        }
    }

    pub fn uptime(&self) -> Duration {
        if self.state.is_terminal() {
            return Duration::from_secs(0);
        }
        SystemTime::now()
            .duration_since(self.started_at)
            .unwrap_or(Duration::from_secs(0))
    }

    pub(crate) fn mark_launched(&mut self, pid: u32, generation: u64) {
        self.generation = generation;
        self.pid = Some(pid);
        self.state = InstanceState::Starting;
        self.started_at = SystemTime::now();
        self.memory_bytes = 0;
        self.stop_requested = false;
        self.pending = None;
        self.relaunch_pending = false;
        self.last_error = None;
    }

    pub(crate) fn mark_running(&mut self) {
        if self.state == InstanceState::Starting {
            self.state = InstanceState::Running;
        }
    }

    pub(crate) fn mark_stopping(&mut self) {
        self.state = InstanceState::Stopping;
        self.stop_requested = true;
        self.relaunch_pending = false;
    }

    /// Being ended by the supervisor on account of `fault`, not by the user
    pub(crate) fn mark_terminating(&mut self, fault: Fault, action: Action) {
        self.state = InstanceState::Stopping;
        self.pending = Some((fault, action));
    }

    /// Whether an OS process exists (or may still exist) for this record
    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }

    pub fn snapshot(&self) -> InstanceStatus {
        InstanceStatus {
            index: self.index,
            label: self.label(),
            pid: self.pid,
            state: self.state,
            uptime_secs: self.uptime().as_secs(),
            restart_count: self.restart_count,
            memory_bytes: self.memory_bytes,
            last_exit: self.last_exit,
            last_error: self.last_error.clone(),
            relaunch_pending: self.relaunch_pending,
        }
    }

    pub(crate) fn mark_exited(&mut self, exit: ExitReport, terminal: InstanceState) {
        self.state = terminal;
        self.pid = None;
        self.memory_bytes = 0;
        self.last_exit = Some(exit);
    }

    /// Forget crash history; only a user-issued restart does this
    pub(crate) fn reset_restarts(&mut self) {
        self.restart_count = 0;
        self.tracker.clear();
    }
}

/// Point-in-time view of one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub index: usize,
    pub label: String,
    pub pid: Option<u32>,
    pub state: InstanceState,
    pub uptime_secs: u64,
    pub restart_count: u32,
    pub memory_bytes: u64,
    pub last_exit: Option<ExitReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Waiting on a backoff timer before the next launch
    pub relaunch_pending: bool,
}

/// Point-in-time view of one application and its instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStatus {
    pub name: String,
    pub state: AppState,
    pub command: String,
    pub instances: Vec<InstanceStatus>,
}

impl AppStatus {
    pub fn total_restarts(&self) -> u32 {
        self.instances.iter().map(|i| i.restart_count).sum()
    }

    pub fn total_memory(&self) -> u64 {
        self.instances.iter().map(|i| i.memory_bytes).sum()
    }
}
