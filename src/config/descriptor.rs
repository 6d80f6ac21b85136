// Raw, unvalidated descriptor shapes as they appear in a config file

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// One application entry exactly as written in the config file.
///
/// Nothing here is trusted; `AppSpec::from_descriptor` turns it into a
/// validated record.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppDescriptor {
    /// Application name (unique identifier)
    #[serde(default)]
    pub name: String,

    /// Executable or script to run
    #[serde(default)]
    pub script: String,

    /// Arguments, either one shell-style string or a list
    #[serde(default)]
    pub args: Option<ArgsField>,

    /// Working directory, relative paths resolve against the config file
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Interpreter used to run `script`
    #[serde(default)]
    pub interpreter: Option<String>,

    #[serde(default = "default_instances")]
    pub instances: i64,

    #[serde(default = "default_autorestart")]
    pub autorestart: bool,

    #[serde(default)]
    pub watch: bool,

    /// Memory ceiling, e.g. "1G" or a plain byte count
    #[serde(default)]
    pub max_memory_restart: Option<ByteSizeField>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Crash-loop threshold: restarts allowed inside the window
    #[serde(default = "default_max_restarts")]
    pub max_restarts: usize,

    #[serde(default = "default_restart_window")]
    pub restart_window_secs: u64,

    /// Initial delay before an automatic relaunch
    #[serde(default = "default_restart_delay")]
    pub restart_delay_ms: u64,

    #[serde(default = "default_stop_signal")]
    pub stop_signal: String,

    /// Grace period between the stop signal and SIGKILL
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ArgsField {
    Line(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ByteSizeField {
    Bytes(u64),
    Text(String),
}

/// Top-level `{ "apps": [...] }` shape
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct DescriptorFile {
    pub apps: Vec<AppDescriptor>,
}

// Default value functions for serde
fn default_instances() -> i64 {
    1
}

fn default_autorestart() -> bool {
    true
}

pub(crate) fn default_max_restarts() -> usize {
    10
}

pub(crate) fn default_restart_window() -> u64 {
    60
}

pub(crate) fn default_restart_delay() -> u64 {
    100
}

pub(crate) fn default_stop_signal() -> String {
    "SIGTERM".to_string()
}

pub(crate) fn default_stop_timeout() -> u64 {
    10
}

/// Parse a JSON config into descriptors. Accepts `{"apps": [...]}` or a
/// single bare descriptor object.
pub(crate) fn parse_json(contents: &str) -> std::result::Result<Vec<AppDescriptor>, String> {
    let value: serde_json::Value = serde_json::from_str(contents).map_err(|e| e.to_string())?;

    if value.get("apps").is_some() {
        let file: DescriptorFile = serde_json::from_value(value).map_err(|e| e.to_string())?;
        Ok(file.apps)
    } else {
        let single: AppDescriptor = serde_json::from_value(value).map_err(|e| e.to_string())?;
        Ok(vec![single])
    }
}

/// Parse a TOML config into descriptors. Accepts `[[apps]]` tables or a
/// single descriptor at the top level.
pub(crate) fn parse_toml(contents: &str) -> std::result::Result<Vec<AppDescriptor>, String> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| e.to_string())?;
    let has_apps = table.contains_key("apps");
    let value = toml::Value::Table(table);

    if has_apps {
        let file: DescriptorFile = value.try_into().map_err(|e: toml::de::Error| e.to_string())?;
        Ok(file.apps)
    } else {
        let single: AppDescriptor = value.try_into().map_err(|e: toml::de::Error| e.to_string())?;
        Ok(vec![single])
    }
}

/// Expand `$VAR` and `${VAR}` references from the current environment.
/// Unknown variables are left untouched.
pub(crate) fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match std::env::var(name) {
            Ok(value) if !name.is_empty() => {
                out.push_str(&value);
                rest = &after[consumed..];
            }
            _ => {
                out.push('$');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}
