use crate::config::{validate_name, AppSpec};
use crate::error::{ConfigError, LaunchError, OverseerError, Result};
use crate::logs::LogDir;
use crate::process::monitor::{
    HealthEvent, HealthEventKind, HealthMonitor, MemorySampler, SysinfoSampler, WatchTarget,
};
use crate::process::restart::{decide, Action, Fault};
use crate::process::spawner::spawn_process;
use crate::process::types::{AppState, AppStatus, ExitReport, InstanceState, ProcessInstance};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pending user commands before senders start waiting
const COMMAND_BUFFER: usize = 64;

/// Supervisor configuration
#[derive(Clone)]
pub struct SupervisorConfig {
    /// How often each instance's memory and watched files are checked
    pub poll_interval: Duration,
    /// Where instance stdout/stderr go; discarded when `None`
    pub log_dir: Option<PathBuf>,
    /// Source of memory readings
    pub sampler: Arc<dyn MemorySampler>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            log_dir: None,
            sampler: Arc::new(SysinfoSampler::new()),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Request {
    Start {
        specs: Vec<AppSpec>,
        reply: Reply<Vec<String>>,
    },
    Stop {
        name: String,
        reply: Reply<()>,
    },
    Restart {
        name: String,
        reply: Reply<()>,
    },
    Status {
        reply: Reply<Vec<AppStatus>>,
    },
    Delete {
        name: String,
        reply: Reply<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Deferred work the supervisor schedules for itself
#[derive(Debug)]
enum Timer {
    Relaunch {
        app: String,
        index: usize,
        generation: u64,
    },
    Escalate {
        app: String,
        index: usize,
        generation: u64,
    },
}

/// What happens once an app has no instance left in Stopping
enum Followup {
    Restart(Reply<()>),
    Delete(Reply<()>),
}

struct ManagedApp {
    spec: Arc<AppSpec>,
    instances: Vec<ProcessInstance>,
    stop_waiters: Vec<Reply<()>>,
    followup: Option<Followup>,
}

impl ManagedApp {
    fn new(spec: AppSpec) -> Self {
        let spec = Arc::new(spec);
        let instances = (0..spec.instance_count)
            .map(|index| ProcessInstance::new(Arc::clone(&spec), index))
            .collect();

        Self {
            spec,
            instances,
            stop_waiters: Vec::new(),
            followup: None,
        }
    }

    /// Any process alive, being stopped, or about to be relaunched
    fn is_live(&self) -> bool {
        self.instances
            .iter()
            .any(|instance| instance.is_live() || instance.relaunch_pending)
    }

    fn is_stopping(&self) -> bool {
        self.instances
            .iter()
            .any(|instance| instance.state == InstanceState::Stopping)
    }

    fn status(&self) -> AppStatus {
        let states: Vec<InstanceState> = self.instances.iter().map(|i| i.state).collect();
        let relaunch_pending = self.instances.iter().any(|i| i.relaunch_pending);

        let mut command = self.spec.program().display().to_string();
        for arg in self.spec.program_args() {
            command.push(' ');
            command.push_str(&arg);
        }

        AppStatus {
            name: self.spec.name.clone(),
            state: AppState::aggregate(&states, relaunch_pending),
            command,
            instances: self.instances.iter().map(ProcessInstance::snapshot).collect(),
        }
    }
}

/// Creates OS processes and hands them to a monitor task
struct Launcher {
    monitor: HealthMonitor,
    logs: Option<LogDir>,
    next_generation: u64,
}

impl Launcher {
    fn launch(&mut self, instance: &mut ProcessInstance) -> std::result::Result<(), LaunchError> {
        let spawned = match spawn_process(&instance.spec, instance.index, self.logs.as_ref()) {
            Ok(spawned) => spawned,
            Err(e) => {
                instance.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        instance.mark_launched(spawned.pid, generation);

        let spec = &instance.spec;
        let target = WatchTarget {
            app: spec.name.clone(),
            index: instance.index,
            generation,
            pid: spawned.pid,
            memory_limit: spec.memory_limit,
            watch_dir: spec.watch.then(|| spec.working_directory.clone()),
            ignore: self
                .logs
                .iter()
                .map(|logs| logs.root().to_path_buf())
                .collect(),
        };
        self.monitor.observe(target, spawned.child);

        instance.mark_running();
        info!("{} running (PID {})", instance.label(), spawned.pid);
        Ok(())
    }
}

/// Cloneable handle used to send commands to a running [`Supervisor`]
#[derive(Clone)]
pub struct SupervisorHandle {
    requests: mpsc::Sender<Request>,
}

impl SupervisorHandle {
    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(build(reply))
            .await
            .map_err(|_| OverseerError::SupervisorGone)?;
        response.await.map_err(|_| OverseerError::SupervisorGone)?
    }

    /// Register and launch every instance of each spec.
    ///
    /// Fails without launching anything if a name is already live. If an
    /// instance cannot be launched the first such error is returned; that
    /// instance stays Stopped while the others keep running.
    pub async fn start(&self, specs: Vec<AppSpec>) -> Result<Vec<String>> {
        self.call(|reply| Request::Start { specs, reply }).await
    }

    /// Stop every instance of an app and wait until all of them are gone
    pub async fn stop(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.call(|reply| Request::Stop { name, reply }).await
    }

    /// Stop, forget crash history, and launch fresh instances
    pub async fn restart(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.call(|reply| Request::Restart { name, reply }).await
    }

    /// Snapshot of every registered app
    pub async fn status(&self) -> Result<Vec<AppStatus>> {
        self.call(|reply| Request::Status { reply }).await
    }

    /// Stop an app and drop it from the registry along with its logs
    pub async fn delete(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.call(|reply| Request::Delete { name, reply }).await
    }

    /// Stop everything and end the supervisor task
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.requests
            .send(Request::Shutdown { reply })
            .await
            .map_err(|_| OverseerError::SupervisorGone)?;
        done.await.map_err(|_| OverseerError::SupervisorGone)
    }
}

/// Owns the registry of apps and drives every lifecycle transition.
///
/// All mutation happens on the supervisor task, one message at a time:
/// user commands, health events from monitor tasks, and the supervisor's
/// own relaunch/escalation timers. Events carry the generation of the
/// incarnation they were observed on, so anything from a previous
/// incarnation is dropped.
pub struct Supervisor {
    apps: BTreeMap<String, ManagedApp>,
    launcher: Launcher,
    commands: mpsc::Receiver<Request>,
    events: mpsc::UnboundedReceiver<HealthEvent>,
    timers: mpsc::UnboundedReceiver<Timer>,
    timer_tx: mpsc::UnboundedSender<Timer>,
    commands_closed: bool,
    /// `Some` once shutdown has begun
    shutdown_waiters: Option<Vec<oneshot::Sender<()>>>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> (Self, SupervisorHandle) {
        let (requests, commands) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, events) = mpsc::unbounded_channel();
        let (timer_tx, timers) = mpsc::unbounded_channel();

        let monitor = HealthMonitor::new(event_tx, config.sampler, config.poll_interval);
        let supervisor = Self {
            apps: BTreeMap::new(),
            launcher: Launcher {
                monitor,
                logs: config.log_dir.map(LogDir::new),
                next_generation: 0,
            },
            commands,
            events,
            timers,
            timer_tx,
            commands_closed: false,
            shutdown_waiters: None,
        };

        (supervisor, SupervisorHandle { requests })
    }

    /// Create a supervisor and run it on its own task
    pub fn spawn(config: SupervisorConfig) -> (SupervisorHandle, JoinHandle<()>) {
        let (supervisor, handle) = Self::new(config);
        (handle, tokio::spawn(supervisor.run()))
    }

    /// Run the supervisor loop until shutdown completes
    pub async fn run(mut self) {
        info!("Supervisor started");

        loop {
            tokio::select! {
                request = self.commands.recv(), if !self.commands_closed => match request {
                    Some(request) => self.handle_request(request),
                    None => {
                        debug!("All supervisor handles dropped");
                        self.commands_closed = true;
                        self.begin_shutdown(None);
                    }
                },
                Some(event) = self.events.recv() => self.handle_event(event),
                Some(timer) = self.timers.recv() => self.handle_timer(timer),
                else => break,
            }

            if self.shutdown_waiters.is_some() && !self.apps.values().any(ManagedApp::is_live) {
                break;
            }
        }

        for waiter in self.shutdown_waiters.take().unwrap_or_default() {
            let _ = waiter.send(());
        }
        info!("Supervisor stopped");
    }

    fn handle_request(&mut self, request: Request) {
        if self.shutdown_waiters.is_some() {
            match request {
                Request::Shutdown { reply } => self.begin_shutdown(Some(reply)),
                Request::Status { reply } => {
                    let _ = reply.send(Ok(self.status()));
                }
                Request::Start { reply, .. } => {
                    let _ = reply.send(Err(OverseerError::SupervisorGone));
                }
                Request::Stop { reply, .. }
                | Request::Restart { reply, .. }
                | Request::Delete { reply, .. } => {
                    let _ = reply.send(Err(OverseerError::SupervisorGone));
                }
            }
            return;
        }

        match request {
            Request::Start { specs, reply } => {
                let _ = reply.send(self.start(specs));
            }
            Request::Stop { name, reply } => self.stop(&name, reply),
            Request::Restart { name, reply } => self.restart(&name, reply),
            Request::Status { reply } => {
                let _ = reply.send(Ok(self.status()));
            }
            Request::Delete { name, reply } => self.delete(&name, reply),
            Request::Shutdown { reply } => self.begin_shutdown(Some(reply)),
        }
    }

    fn start(&mut self, specs: Vec<AppSpec>) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        for spec in &specs {
            validate_name(&spec.name)?;
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::DuplicateName {
                    app: spec.name.clone(),
                }
                .into());
            }
            if let Some(existing) = self.apps.get(&spec.name) {
                if existing.is_live() || existing.followup.is_some() {
                    return Err(OverseerError::AppAlreadyRunning(spec.name.clone()));
                }
            }
        }

        let mut names = Vec::with_capacity(specs.len());
        let mut first_error = None;

        for spec in specs {
            let name = spec.name.clone();
            let mut app = ManagedApp::new(spec);
            info!(
                "Starting app '{}' ({} instance(s))",
                name,
                app.instances.len()
            );

            for instance in &mut app.instances {
                if let Err(e) = self.launcher.launch(instance) {
                    error!("{}", e);
                    first_error.get_or_insert(e);
                }
            }

            self.apps.insert(name.clone(), app);
            names.push(name);
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(names),
        }
    }

    fn stop(&mut self, name: &str, reply: Reply<()>) {
        let Some(app) = self.apps.get_mut(name) else {
            let _ = reply.send(Err(OverseerError::AppNotFound(name.to_string())));
            return;
        };

        info!("Stopping app '{}'", name);
        match app.followup.take() {
            Some(Followup::Restart(waiter)) => {
                let _ = waiter.send(Err(OverseerError::StopError(
                    name.to_string(),
                    "restart cancelled by stop".to_string(),
                )));
            }
            other => app.followup = other,
        }

        for instance in &mut app.instances {
            request_stop(instance, &self.timer_tx);
        }
        app.stop_waiters.push(reply);
        self.settle(name);
    }

    fn restart(&mut self, name: &str, reply: Reply<()>) {
        let Some(app) = self.apps.get_mut(name) else {
            let _ = reply.send(Err(OverseerError::AppNotFound(name.to_string())));
            return;
        };

        if app.followup.is_some() {
            let _ = reply.send(Err(OverseerError::Other(format!(
                "Another operation is already in progress for '{}'",
                name
            ))));
            return;
        }

        info!("Restarting app '{}'", name);
        for instance in &mut app.instances {
            request_stop(instance, &self.timer_tx);
        }
        app.followup = Some(Followup::Restart(reply));
        self.settle(name);
    }

    fn delete(&mut self, name: &str, reply: Reply<()>) {
        let Some(app) = self.apps.get_mut(name) else {
            let _ = reply.send(Err(OverseerError::AppNotFound(name.to_string())));
            return;
        };

        match app.followup.take() {
            Some(Followup::Delete(previous)) => {
                let _ = previous.send(Ok(()));
            }
            Some(Followup::Restart(waiter)) => {
                let _ = waiter.send(Err(OverseerError::StopError(
                    name.to_string(),
                    "restart cancelled by delete".to_string(),
                )));
            }
            None => {}
        }

        info!("Deleting app '{}'", name);
        for instance in &mut app.instances {
            request_stop(instance, &self.timer_tx);
        }
        app.followup = Some(Followup::Delete(reply));
        self.settle(name);
    }

    fn status(&self) -> Vec<AppStatus> {
        self.apps.values().map(ManagedApp::status).collect()
    }

    fn begin_shutdown(&mut self, reply: Option<oneshot::Sender<()>>) {
        let waiters = self.shutdown_waiters.get_or_insert_with(Vec::new);
        waiters.extend(reply);

        info!("Shutting down, stopping {} app(s)", self.apps.len());
        for app in self.apps.values_mut() {
            match app.followup.take() {
                Some(Followup::Restart(waiter)) | Some(Followup::Delete(waiter)) => {
                    let _ = waiter.send(Err(OverseerError::SupervisorGone));
                }
                None => {}
            }
            for instance in &mut app.instances {
                request_stop(instance, &self.timer_tx);
            }
        }
    }

    /// Resolve whatever was waiting on an app once nothing of it is stopping
    fn settle(&mut self, name: &str) {
        let Some(app) = self.apps.get_mut(name) else {
            return;
        };
        if app.is_stopping() {
            return;
        }

        for waiter in app.stop_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }

        match app.followup.take() {
            Some(Followup::Restart(reply)) => {
                let mut first_error = None;
                for instance in &mut app.instances {
                    instance.reset_restarts();
                    if let Err(e) = self.launcher.launch(instance) {
                        error!("{}", e);
                        first_error.get_or_insert(e);
                    }
                }
                let _ = reply.send(first_error.map_or(Ok(()), |e| Err(e.into())));
            }
            Some(Followup::Delete(reply)) => {
                let instance_count = app.instances.len();
                self.apps.remove(name);
                if let Some(logs) = &self.launcher.logs {
                    logs.remove(name, instance_count);
                }
                info!("App '{}' deleted", name);
                let _ = reply.send(Ok(()));
            }
            None => {}
        }
    }

    fn handle_event(&mut self, event: HealthEvent) {
        let Some(instance) = self
            .apps
            .get_mut(&event.app)
            .and_then(|app| app.instances.get_mut(event.index))
        else {
            return;
        };

        if instance.generation != event.generation {
            debug!(
                "Dropping stale event for {} (generation {}): {:?}",
                instance.label(),
                event.generation,
                event.kind
            );
            return;
        }

        let Some(fault) = event.kind.fault() else {
            if let HealthEventKind::Sampled { memory } = event.kind {
                instance.memory_bytes = memory;
            }
            return;
        };

        match fault {
            Fault::Exited(exit) => self.on_exit(&event.app, event.index, exit),
            Fault::MemoryExceeded { .. } | Fault::FilesChanged => {
                if instance.state != InstanceState::Running {
                    return;
                }
                let action = decide(instance, &fault);
                instance.mark_terminating(fault, action);
                match &event.kind {
                    HealthEventKind::FilesChanged { path } => {
                        info!("{}: {} changed, stopping it", instance.label(), path.display());
                        begin_graceful_stop(instance, &event.app, &self.timer_tx);
                    }
                    _ => {
                        warn!("{}: {}, killing it", instance.label(), fault);
                        signal_instance(instance, Signal::SIGKILL);
                    }
                }
            }
        }
    }

    fn on_exit(&mut self, name: &str, index: usize, exit: ExitReport) {
        let Some(instance) = self
            .apps
            .get_mut(name)
            .and_then(|app| app.instances.get_mut(index))
        else {
            return;
        };
        let label = instance.label();

        if instance.stop_requested {
            instance.pending = None;
            instance.mark_exited(exit, InstanceState::Stopped);
            info!("{} stopped ({})", label, exit);
            self.settle(name);
            return;
        }

        let (fault, action) = match instance.pending.take() {
            Some(pending) => pending,
            None => {
                let fault = Fault::Exited(exit);
                let action = decide(instance, &fault);
                (fault, action)
            }
        };

        match action {
            Action::Relaunch { delay } => {
                instance.mark_exited(exit, InstanceState::Crashed);
                instance.restart_count += 1;
                instance.tracker.record_restart();
                instance.tracker.prune_old_restarts(instance.spec.restart_window);
                instance.relaunch_pending = true;
                warn!(
                    "{} {}, relaunching in {:?} (restart #{})",
                    label, fault, delay, instance.restart_count
                );
                schedule(
                    &self.timer_tx,
                    delay,
                    Timer::Relaunch {
                        app: name.to_string(),
                        index,
                        generation: instance.generation,
                    },
                );
            }
            Action::MarkCrashedPermanently => {
                instance.mark_exited(exit, InstanceState::Crashed);
                error!(
                    "{} {}, restarted {} times within {:?}; giving up until a manual restart",
                    label, fault, instance.spec.max_restarts, instance.spec.restart_window
                );
            }
            Action::NoAction => {
                instance.mark_exited(exit, fault.settled_state());
                info!("{} {}, automatic restart disabled", label, fault);
            }
        }

        self.settle(name);
    }

    fn handle_timer(&mut self, timer: Timer) {
        let (app, index, generation) = match &timer {
            Timer::Relaunch {
                app,
                index,
                generation,
            }
            | Timer::Escalate {
                app,
                index,
                generation,
            } => (app.clone(), *index, *generation),
        };

        let Some(instance) = self
            .apps
            .get_mut(&app)
            .and_then(|managed| managed.instances.get_mut(index))
        else {
            return;
        };
        if instance.generation != generation {
            return;
        }

        match timer {
            Timer::Relaunch { .. } => {
                if !instance.relaunch_pending || instance.stop_requested {
                    return;
                }
                instance.relaunch_pending = false;
                if let Err(e) = self.launcher.launch(instance) {
                    error!("Relaunch of {} failed: {}", instance.label(), e);
                    instance.state = InstanceState::Crashed;
                }
            }
            Timer::Escalate { .. } => {
                if instance.state == InstanceState::Stopping {
                    warn!(
                        "{} did not exit within {:?}, sending SIGKILL",
                        instance.label(),
                        instance.spec.stop_timeout
                    );
                    signal_instance(instance, Signal::SIGKILL);
                }
            }
        }
    }
}

/// Move an instance towards Stopped on behalf of the user
fn request_stop(instance: &mut ProcessInstance, timers: &mpsc::UnboundedSender<Timer>) {
    match instance.state {
        InstanceState::Starting | InstanceState::Running => {
            instance.mark_stopping();
            let app = instance.spec.name.clone();
            begin_graceful_stop(instance, &app, timers);
        }
        InstanceState::Stopping => {
            // Already being terminated for a fault; the stop takes over the outcome
            instance.stop_requested = true;
            instance.relaunch_pending = false;
        }
        InstanceState::Stopped | InstanceState::Crashed => {
            instance.stop_requested = true;
            instance.relaunch_pending = false;
            instance.state = InstanceState::Stopped;
        }
    }
}

/// Send the configured stop signal and arm the SIGKILL escalation
fn begin_graceful_stop(
    instance: &ProcessInstance,
    app: &str,
    timers: &mpsc::UnboundedSender<Timer>,
) {
    let stop_signal = parse_signal(&instance.spec.stop_signal).unwrap_or_else(|e| {
        warn!("{}, falling back to SIGTERM", e);
        Signal::SIGTERM
    });
    signal_instance(instance, stop_signal);

    schedule(
        timers,
        instance.spec.stop_timeout,
        Timer::Escalate {
            app: app.to_string(),
            index: instance.index,
            generation: instance.generation,
        },
    );
}

/// Signal the instance's process group, or the process alone if the group
/// is gone
fn signal_instance(instance: &ProcessInstance, sig: Signal) {
    let Some(pid) = instance.pid else {
        return;
    };
    let nix_pid = Pid::from_raw(pid as i32);

    let result = match signal::killpg(nix_pid, sig) {
        Err(Errno::ESRCH) => signal::kill(nix_pid, sig),
        other => other,
    };

    match result {
        Ok(()) => debug!("Sent {} to {} (PID {})", sig, instance.label(), pid),
        Err(Errno::ESRCH) => debug!("{} (PID {}) already exited", instance.label(), pid),
        Err(e) => warn!(
            "Failed to send {} to {} (PID {}): {}",
            sig,
            instance.label(),
            pid,
            e
        ),
    }
}

fn schedule(timers: &mpsc::UnboundedSender<Timer>, delay: Duration, timer: Timer) {
    let timers = timers.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = timers.send(timer);
    });
}

/// Parse signal name to nix Signal
fn parse_signal(signal_name: &str) -> Result<Signal> {
    match signal_name.to_uppercase().as_str() {
        "SIGTERM" => Ok(Signal::SIGTERM),
        "SIGINT" => Ok(Signal::SIGINT),
        "SIGQUIT" => Ok(Signal::SIGQUIT),
        "SIGKILL" => Ok(Signal::SIGKILL),
        "SIGHUP" => Ok(Signal::SIGHUP),
        "SIGUSR1" => Ok(Signal::SIGUSR1),
        "SIGUSR2" => Ok(Signal::SIGUSR2),
        _ => Err(OverseerError::SignalError(format!(
            "Unknown signal: {}",
            signal_name
        ))),
    }
}
