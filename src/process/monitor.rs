use crate::process::restart::Fault;
use crate::process::types::ExitReport;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Upper bound on directory entries visited per watch scan
const MAX_WATCH_ENTRIES: usize = 20_000;

/// Directory names never scanned in watch mode
const IGNORED_DIRS: [&str; 2] = ["node_modules", "target"];

/// Something observed about one incarnation of an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthEvent {
    pub app: String,
    pub index: usize,
    /// Incarnation the observation belongs to
    pub generation: u64,
    pub kind: HealthEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEventKind {
    /// Process exited with a status code
    Exited { code: i32 },
    /// Process was terminated by a signal
    Crashed { signal: i32 },
    /// Resident memory went over the limit; sent at most once per incarnation
    MemoryExceeded { limit: u64, observed: u64 },
    /// A file below the working directory changed
    FilesChanged { path: PathBuf },
    /// Periodic resident memory sample
    Sampled { memory: u64 },
}

impl HealthEventKind {
    /// The fault this observation amounts to, if any
    pub fn fault(&self) -> Option<Fault> {
        match self {
            HealthEventKind::Exited { code } => Some(Fault::Exited(ExitReport::Code(*code))),
            HealthEventKind::Crashed { signal } => {
                Some(Fault::Exited(ExitReport::Signal(*signal)))
            }
            HealthEventKind::MemoryExceeded { limit, observed } => Some(Fault::MemoryExceeded {
                limit: *limit,
                observed: *observed,
            }),
            HealthEventKind::FilesChanged { .. } => Some(Fault::FilesChanged),
            HealthEventKind::Sampled { .. } => None,
        }
    }
}

/// Source of resident memory readings
pub trait MemorySampler: Send + Sync {
    /// Resident set size of `pid` in bytes, `None` if it cannot be read
    fn resident_bytes(&self, pid: u32) -> Option<u64>;
}

/// Memory sampler backed by sysinfo
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SysinfoSampler {
    fn resident_bytes(&self, pid: u32) -> Option<u64> {
        let mut system = self.system.lock().ok()?;
        let sys_pid = Pid::from_u32(pid);

        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );

        system.process(sys_pid).map(|process| process.memory())
    }
}

/// What a monitor task needs to know about the incarnation it observes
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub app: String,
    pub index: usize,
    pub generation: u64,
    pub pid: u32,
    pub memory_limit: Option<u64>,
    /// Directory to watch for changes, `None` when watch mode is off
    pub watch_dir: Option<PathBuf>,
    /// Paths excluded from watching, such as the log directory
    pub ignore: Vec<PathBuf>,
}

/// Spawns one observer task per launched instance.
///
/// Observers only report. They never signal or restart anything; the
/// supervisor acts on the events.
#[derive(Clone)]
pub struct HealthMonitor {
    events: mpsc::UnboundedSender<HealthEvent>,
    sampler: Arc<dyn MemorySampler>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(
        events: mpsc::UnboundedSender<HealthEvent>,
        sampler: Arc<dyn MemorySampler>,
        interval: Duration,
    ) -> Self {
        Self {
            events,
            sampler,
            interval,
        }
    }

    /// Take ownership of `child` and observe it until it exits.
    ///
    /// Exactly one exit event (`Exited` or `Crashed`) is sent per target,
    /// after which the task ends.
    pub fn observe(&self, target: WatchTarget, child: Child) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move { monitor.run(target, child).await })
    }

    async fn run(self, target: WatchTarget, mut child: Child) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut watcher = target
            .watch_dir
            .as_ref()
            .map(|dir| TreeWatcher::new(dir.clone(), target.ignore.clone()));
        let mut memory_reported = false;

        loop {
            tokio::select! {
                status = child.wait() => {
                    let kind = match status {
                        Ok(status) => exit_kind(status),
                        Err(e) => {
                            warn!("Failed to wait on PID {}: {}", target.pid, e);
                            HealthEventKind::Exited { code: -1 }
                        }
                    };
                    debug!("{} instance {} (PID {}) ended: {:?}", target.app, target.index, target.pid, kind);
                    self.emit(&target, kind);
                    return;
                }
                _ = ticker.tick() => {
                    if let Some(observed) = self.sampler.resident_bytes(target.pid) {
                        self.emit(&target, HealthEventKind::Sampled { memory: observed });

                        if let Some(limit) = target.memory_limit {
                            if observed > limit && !memory_reported {
                                memory_reported = true;
                                self.emit(&target, HealthEventKind::MemoryExceeded { limit, observed });
                            }
                        }
                    }

                    if let Some(mut tree) = watcher.take() {
                        let scan = tokio::task::spawn_blocking(move || {
                            let changed = tree.poll();
                            (tree, changed)
                        })
                        .await;

                        match scan {
                            Ok((_, Some(path))) => {
                                // One report per incarnation; the next launch gets a fresh baseline
                                self.emit(&target, HealthEventKind::FilesChanged { path });
                            }
                            Ok((tree, None)) => watcher = Some(tree),
                            Err(e) => warn!("Watch scan for {} failed: {}", target.app, e),
                        }
                    }
                }
            }
        }
    }

    fn emit(&self, target: &WatchTarget, kind: HealthEventKind) {
        let event = HealthEvent {
            app: target.app.clone(),
            index: target.index,
            generation: target.generation,
            kind,
        };
        // The receiver only goes away when the supervisor has shut down
        let _ = self.events.send(event);
    }
}

#[cfg(unix)]
fn exit_kind(status: std::process::ExitStatus) -> HealthEventKind {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => HealthEventKind::Exited { code },
        (None, Some(signal)) => HealthEventKind::Crashed { signal },
        (None, None) => HealthEventKind::Exited { code: -1 },
    }
}

#[cfg(not(unix))]
fn exit_kind(status: std::process::ExitStatus) -> HealthEventKind {
    HealthEventKind::Exited {
        code: status.code().unwrap_or(-1),
    }
}

/// Polls modification times below a directory tree
struct TreeWatcher {
    root: PathBuf,
    ignore: Vec<PathBuf>,
    baseline: SystemTime,
}

impl TreeWatcher {
    fn new(root: PathBuf, ignore: Vec<PathBuf>) -> Self {
        let baseline = newest_mtime(&root, &ignore)
            .map(|(time, _)| time)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        Self {
            root,
            ignore,
            baseline,
        }
    }

    /// Path of a file modified since the last poll, if any
    fn poll(&mut self) -> Option<PathBuf> {
        let (time, path) = newest_mtime(&self.root, &self.ignore)?;
        if time > self.baseline {
            self.baseline = time;
            Some(path)
        } else {
            None
        }
    }
}

fn is_ignored(path: &Path, ignore: &[PathBuf]) -> bool {
    let hidden_or_vendored = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.') || IGNORED_DIRS.contains(&name))
        .unwrap_or(false);

    hidden_or_vendored || ignore.iter().any(|skip| path.starts_with(skip))
}

/// Newest modification time found below `root`, with the path carrying it
fn newest_mtime(root: &Path, ignore: &[PathBuf]) -> Option<(SystemTime, PathBuf)> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    let mut stack = vec![root.to_path_buf()];
    let mut visited = 0;

    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };

        for entry in entries.flatten() {
            visited += 1;
            if visited > MAX_WATCH_ENTRIES {
                return newest;
            }

            let path = entry.path();
            if is_ignored(&path, ignore) {
                continue;
            }

            let Ok(metadata) = entry.metadata() else {
                continue;
            };

            if metadata.is_dir() {
                stack.push(path.clone());
            }

            if let Ok(modified) = metadata.modified() {
                if newest.as_ref().map_or(true, |(time, _)| modified > *time) {
                    newest = Some((modified, path));
                }
            }
        }
    }

    newest
}
