// Config module - Application descriptors and their validation

mod descriptor;

pub use descriptor::{AppDescriptor, ArgsField, ByteSizeField};

use crate::error::ConfigError;
use descriptor::{expand_env, parse_json, parse_toml};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Signals accepted for `stop_signal`
pub const VALID_STOP_SIGNALS: [&str; 7] = [
    "SIGTERM", "SIGINT", "SIGQUIT", "SIGKILL", "SIGHUP", "SIGUSR1", "SIGUSR2",
];

const MAX_INSTANCES: i64 = 100;

/// Validated, immutable description of one managed application
#[derive(Debug, Clone, PartialEq)]
pub struct AppSpec {
    /// Application name (unique identifier)
    pub name: String,

    /// Resolved path of the script or executable
    pub command: PathBuf,

    /// Command-line arguments, in order
    pub args: Vec<String>,

    /// Working directory of every instance
    pub working_directory: PathBuf,

    /// Resolved interpreter; when set, `command` becomes its first argument
    pub interpreter: Option<PathBuf>,

    /// Number of instances to keep alive
    pub instance_count: usize,

    /// Relaunch after exit or crash
    pub auto_restart: bool,

    /// Restart on changes below `working_directory`
    pub watch: bool,

    /// Resident memory ceiling in bytes
    pub memory_limit: Option<u64>,

    /// Injected environment, wins over the inherited one
    pub environment: HashMap<String, String>,

    /// Crash-loop threshold: automatic restarts allowed within `restart_window`
    pub max_restarts: usize,

    pub restart_window: Duration,

    /// Initial backoff before an automatic relaunch
    pub restart_delay: Duration,

    /// Signal sent on a polite stop
    pub stop_signal: String,

    /// Grace period before escalating to SIGKILL
    pub stop_timeout: Duration,
}

impl AppSpec {
    /// Load and validate every application declared in a config file
    /// (`.json` or `.toml`).
    ///
    /// Fails on the first invalid descriptor; no partial set is returned.
    pub fn from_file(path: &Path) -> Result<Vec<AppSpec>, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let descriptors = match extension {
            "json" => parse_json(&contents),
            "toml" => parse_toml(&contents),
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
        .map_err(|reason| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        })?;

        if descriptors.is_empty() {
            return Err(ConfigError::NoApps(path.to_path_buf()));
        }

        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(descriptors.len());

        for (idx, descriptor) in descriptors.into_iter().enumerate() {
            let spec = Self::from_descriptor(descriptor, &base_dir, idx)?;
            if !seen.insert(spec.name.clone()) {
                return Err(ConfigError::DuplicateName { app: spec.name });
            }
            specs.push(spec);
        }

        debug!("Loaded {} app(s) from {}", specs.len(), path.display());

        Ok(specs)
    }

    /// Validate one raw descriptor. `position` only labels unnamed entries
    /// in error messages.
    pub fn from_descriptor(
        descriptor: AppDescriptor,
        base_dir: &Path,
        position: usize,
    ) -> Result<AppSpec, ConfigError> {
        let name = descriptor.name.trim().to_string();
        if name.is_empty() {
            let label = format!("#{}", position + 1);
            return Err(ConfigError::field(&label, "name", "must not be empty"));
        }
        validate_name(&name)?;

        let working_directory = match descriptor.cwd {
            Some(cwd) => {
                let cwd = PathBuf::from(expand_env(&cwd.to_string_lossy()));
                if cwd.is_absolute() {
                    cwd
                } else {
                    base_dir.join(cwd)
                }
            }
            None => base_dir.to_path_buf(),
        };

        if !working_directory.is_dir() {
            return Err(ConfigError::field(
                &name,
                "cwd",
                format!("not an existing directory: {}", working_directory.display()),
            ));
        }

        let interpreter = match descriptor.interpreter.as_deref().map(str::trim) {
            None | Some("") | Some("none") => None,
            Some(raw) => {
                let raw = expand_env(raw);
                Some(resolve_executable(&raw, &working_directory, false).ok_or_else(|| {
                    ConfigError::field(&name, "interpreter", format!("cannot resolve '{}'", raw))
                })?)
            }
        };

        let script = expand_env(descriptor.script.trim());
        if script.is_empty() {
            return Err(ConfigError::field(&name, "script", "must not be empty"));
        }
        let command = resolve_executable(&script, &working_directory, interpreter.is_some())
            .ok_or_else(|| {
                ConfigError::field(&name, "script", format!("cannot resolve '{}'", script))
            })?;

        let args: Vec<String> = match descriptor.args {
            None => Vec::new(),
            Some(ArgsField::List(list)) => list,
            Some(ArgsField::Line(line)) => shlex::split(&line).ok_or_else(|| {
                ConfigError::field(&name, "args", format!("unbalanced quoting in '{}'", line))
            })?,
        }
        .iter()
        .map(|arg| expand_env(arg))
        .collect();

        if descriptor.instances < 1 {
            return Err(ConfigError::field(&name, "instances", "must be at least 1"));
        }
        if descriptor.instances > MAX_INSTANCES {
            return Err(ConfigError::field(
                &name,
                "instances",
                format!("cannot exceed {}", MAX_INSTANCES),
            ));
        }

        let memory_limit = match descriptor.max_memory_restart {
            None => None,
            Some(ByteSizeField::Bytes(bytes)) => Some(bytes),
            Some(ByteSizeField::Text(text)) => Some(parse_byte_size(&text).ok_or_else(|| {
                ConfigError::field(
                    &name,
                    "max_memory_restart",
                    format!("'{}' is not a byte quantity", text),
                )
            })?),
        };
        if memory_limit == Some(0) {
            return Err(ConfigError::field(&name, "max_memory_restart", "must be greater than 0"));
        }

        if descriptor.max_restarts == 0 {
            return Err(ConfigError::field(&name, "max_restarts", "must be at least 1"));
        }
        if descriptor.restart_window_secs == 0 {
            return Err(ConfigError::field(
                &name,
                "restart_window_secs",
                "must be at least 1",
            ));
        }

        let stop_signal = descriptor.stop_signal.trim().to_ascii_uppercase();
        if !VALID_STOP_SIGNALS.contains(&stop_signal.as_str()) {
            return Err(ConfigError::field(
                &name,
                "stop_signal",
                format!(
                    "'{}' is not one of {}",
                    descriptor.stop_signal,
                    VALID_STOP_SIGNALS.join(", ")
                ),
            ));
        }

        let environment = descriptor
            .env
            .into_iter()
            .map(|(k, v)| {
                let v = expand_env(&v);
                (k, v)
            })
            .collect();

        Ok(AppSpec {
            name,
            command,
            args,
            working_directory,
            interpreter,
            instance_count: descriptor.instances as usize,
            auto_restart: descriptor.autorestart,
            watch: descriptor.watch,
            memory_limit,
            environment,
            max_restarts: descriptor.max_restarts,
            restart_window: Duration::from_secs(descriptor.restart_window_secs),
            restart_delay: Duration::from_millis(descriptor.restart_delay_ms),
            stop_signal,
            stop_timeout: Duration::from_secs(descriptor.stop_timeout_secs),
        })
    }

    /// Build a spec directly, with default policy knobs. Used by embedders
    /// that do not go through a config file.
    pub fn new(name: impl Into<String>, command: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            working_directory: PathBuf::from("/"),
            interpreter: None,
            instance_count: 1,
            auto_restart: true,
            watch: false,
            memory_limit: None,
            environment: HashMap::new(),
            max_restarts: descriptor::default_max_restarts(),
            restart_window: Duration::from_secs(descriptor::default_restart_window()),
            restart_delay: Duration::from_millis(descriptor::default_restart_delay()),
            stop_signal: descriptor::default_stop_signal(),
            stop_timeout: Duration::from_secs(descriptor::default_stop_timeout()),
        }
    }

    /// Program actually executed: the interpreter if set, else the command
    pub fn program(&self) -> &Path {
        self.interpreter.as_deref().unwrap_or(&self.command)
    }

    /// Arguments passed to `program()`
    pub fn program_args(&self) -> Vec<String> {
        match self.interpreter {
            Some(_) => std::iter::once(self.command.to_string_lossy().into_owned())
                .chain(self.args.iter().cloned())
                .collect(),
            None => self.args.clone(),
        }
    }
}

/// Names become log file names, so they must stay a single path component
pub(crate) fn validate_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::field(name, "name", "must not be empty"));
    }
    if name == "." || name == ".." {
        return Err(ConfigError::field(name, "name", "must not be '.' or '..'"));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(ConfigError::field(
            name,
            "name",
            "must not contain '/', '\\' or NUL",
        ));
    }
    Ok(())
}

/// Resolve a program name the way a shell would.
///
/// Anything containing `/` is a path (relative to `cwd`). Bare names are
/// looked up on `PATH`; when `prefer_cwd` is set (scripts run through an
/// interpreter) the working directory is tried first.
fn resolve_executable(program: &str, cwd: &Path, prefer_cwd: bool) -> Option<PathBuf> {
    let candidate = Path::new(program);

    if program.contains('/') {
        let path = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            cwd.join(candidate)
        };
        return path.is_file().then_some(path);
    }

    if prefer_cwd {
        let local = cwd.join(candidate);
        if local.is_file() {
            return Some(local);
        }
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(candidate))
        .find(|path| path.is_file())
}

/// Parse a byte quantity such as `"1G"`, `"512MB"`, `"1.5g"`, `"100K"` or
/// `"2048"`. Multiples are binary (1K = 1024).
pub fn parse_byte_size(input: &str) -> Option<u64> {
    let text = input.trim().to_ascii_uppercase();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);

    if number.is_empty() {
        return None;
    }

    let unit = unit.trim();
    let unit = unit.strip_suffix("IB").or_else(|| unit.strip_suffix('B')).unwrap_or(unit);

    let multiplier: u64 = match unit {
        "" => 1,
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        "T" => 1 << 40,
        _ => return None,
    };

    if number.contains('.') {
        let value: f64 = number.parse().ok()?;
        let bytes = (value * multiplier as f64).round();
        if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
            return None;
        }
        Some(bytes as u64)
    } else {
        number.parse::<u64>().ok()?.checked_mul(multiplier)
    }
}
