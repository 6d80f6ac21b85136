use crate::config::AppSpec;
use crate::error::LaunchError;
use crate::logs::LogDir;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// Environment variable carrying the application name into the child
pub const ENV_APP_NAME: &str = "OVERSEER_APP_NAME";
/// Environment variable carrying the 0-based instance number into the child
pub const ENV_INSTANCE: &str = "OVERSEER_INSTANCE";

/// Metadata returned when spawning a process
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,
}

/// Spawn one instance of an application.
///
/// The child inherits the supervisor's environment, then gets
/// `OVERSEER_APP_NAME`/`OVERSEER_INSTANCE`, then the app's own entries,
/// so the app wins on any collision. It runs in its own process group so
/// a stop reaches everything it forked. Returns as soon as the OS has
/// created the process; nothing waits for readiness.
///
/// # Arguments
/// * `spec` - Validated application spec
/// * `index` - Instance number within the application
/// * `logs` - Where stdout/stderr go; discarded when `None`
pub fn spawn_process(
    spec: &AppSpec,
    index: usize,
    logs: Option<&LogDir>,
) -> Result<SpawnedProcess, LaunchError> {
    if !spec.working_directory.is_dir() {
        return Err(LaunchError::NotFound {
            app: spec.name.clone(),
            what: "working directory",
            path: spec.working_directory.clone(),
        });
    }

    let program = spec.program();
    if !program.exists() {
        return Err(LaunchError::NotFound {
            app: spec.name.clone(),
            what: "executable",
            path: program.to_path_buf(),
        });
    }

    let mut command = Command::new(program);
    command
        .args(spec.program_args())
        .current_dir(&spec.working_directory)
        .env(ENV_APP_NAME, &spec.name)
        .env(ENV_INSTANCE, index.to_string())
        .envs(&spec.environment)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    match logs {
        Some(dir) => {
            let (stdout, stderr) = dir.open(&spec.name, index).map_err(|e| LaunchError::Spawn {
                app: spec.name.clone(),
                reason: e.to_string(),
            })?;
            command.stdout(Stdio::from(stdout));
            command.stderr(Stdio::from(stderr));
        }
        None => {
            command.stdout(Stdio::null());
            command.stderr(Stdio::null());
        }
    }

    #[cfg(unix)]
    command.process_group(0);

    let child = command.spawn().map_err(|e| match e.kind() {
        ErrorKind::NotFound => LaunchError::NotFound {
            app: spec.name.clone(),
            what: "executable",
            path: program.to_path_buf(),
        },
        ErrorKind::PermissionDenied => LaunchError::PermissionDenied {
            app: spec.name.clone(),
            path: program.to_path_buf(),
        },
        _ => LaunchError::Spawn {
            app: spec.name.clone(),
            reason: e.to_string(),
        },
    })?;

    let pid = child.id().ok_or_else(|| LaunchError::Spawn {
        app: spec.name.clone(),
        reason: "process exited before its PID could be read".to_string(),
    })?;

    debug!(
        "Spawned {} instance {} as PID {} ({} {:?})",
        spec.name,
        index,
        pid,
        program.display(),
        spec.program_args()
    );

    Ok(SpawnedProcess { child, pid })
}
