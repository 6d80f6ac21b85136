// Output formatting and display for CLI

use crate::ipc::ResponseData;
use crate::process::{AppState, AppStatus, ExitReport, InstanceState, InstanceStatus};
use chrono::{Duration as ChronoDuration, Local};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print a success response to stdout
pub fn print_success(data: &ResponseData) {
    match data {
        ResponseData::Started { apps } => {
            println!("{}", "✓ Apps started successfully".green().bold());
            for name in apps {
                println!("  {} {}", "•".bold(), name.cyan());
            }
        }

        ResponseData::Stopped { name } => {
            println!(
                "{}",
                format!("✓ App '{}' stopped successfully", name).green().bold()
            );
        }

        ResponseData::Restarted { name } => {
            println!(
                "{}",
                format!("✓ App '{}' restarted successfully", name)
                    .green()
                    .bold()
            );
        }

        ResponseData::Status(apps) => {
            if apps.is_empty() {
                println!("{}", "No apps are registered".yellow());
            } else {
                print_status_table(apps);
            }
        }

        ResponseData::Logs(lines) => print_logs(lines),

        ResponseData::Deleted { name } => {
            println!(
                "{}",
                format!("✓ App '{}' deleted successfully", name).green().bold()
            );
        }

        ResponseData::DaemonStatus { pid, uptime, apps } => {
            println!("{}", "✓ Daemon is running".green().bold());
            println!("  {}: {}", "PID".bold(), pid);
            println!("  {}: {}", "Uptime".bold(), format_duration(uptime));
            println!("  {}: {}", "Apps".bold(), apps);
        }

        ResponseData::Success(message) => print_success_msg(message),
    }
}

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// One table row per instance
fn print_status_table(apps: &[AppStatus]) {
    #[derive(Tabled)]
    struct InstanceRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Uptime")]
        uptime: String,
        #[tabled(rename = "Restarts")]
        restarts: String,
        #[tabled(rename = "Last Exit")]
        last_exit: String,
    }

    let rows: Vec<InstanceRow> = apps
        .iter()
        .flat_map(|app| app.instances.iter())
        .map(|instance| InstanceRow {
            name: truncate(&instance.label, 24),
            state: format_instance_state(instance),
            pid: instance
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            memory: format_memory(instance.memory_bytes),
            uptime: format_duration(&Duration::from_secs(instance.uptime_secs)),
            restarts: instance.restart_count.to_string(),
            last_exit: format_last_outcome(instance),
        })
        .collect();

    let instance_count = rows.len();
    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
    println!(
        "{}",
        format!(
            "Total: {} app(s), {} instance(s)",
            apps.len(),
            instance_count
        )
        .dimmed()
        .italic()
    );
}

/// Print detailed status view for a single app
pub fn print_app_details(app: &AppStatus) {
    println!("\n{}", "App Details".bold().underline());
    println!();
    println!("  {:<15} {}", "Name:".bold(), app.name.cyan());
    println!("  {:<15} {}", "State:".bold(), format_app_state(app.state));
    println!("  {:<15} {}", "Command:".bold(), app.command);
    println!("  {:<15} {}", "Instances:".bold(), app.instances.len());
    println!("  {:<15} {}", "Restarts:".bold(), app.total_restarts());
    println!(
        "  {:<15} {}",
        "Memory:".bold(),
        format_memory(app.total_memory())
    );

    for instance in &app.instances {
        println!();
        println!("  {}", instance.label.bold());
        println!("    {:<13} {}", "State:", format_instance_state(instance));
        if let Some(pid) = instance.pid {
            println!("    {:<13} {}", "PID:", pid);
            let started = Local::now() - ChronoDuration::seconds(instance.uptime_secs as i64);
            println!(
                "    {:<13} {}",
                "Started:",
                started.format("%Y-%m-%d %H:%M:%S")
            );
        }
        if let Some(exit) = instance.last_exit {
            println!("    {:<13} {}", "Last exit:", format_exit(exit));
        }
        if let Some(error) = &instance.last_error {
            println!("    {:<13} {}", "Last error:", error.red());
        }
    }

    println!();
}

/// Print log lines, stderr lines highlighted
fn print_logs(lines: &[String]) {
    if lines.is_empty() {
        println!("{}", "No logs available".yellow());
        return;
    }

    for line in lines {
        if line.starts_with("[ERR]") {
            println!("{}", line.red());
        } else {
            println!("{}", line);
        }
    }
}

/// A failed launch outranks the exit that preceded it
fn format_last_outcome(instance: &InstanceStatus) -> String {
    if instance.last_error.is_some() {
        return "launch failed".to_string();
    }
    instance
        .last_exit
        .map(format_exit)
        .unwrap_or_else(|| "-".to_string())
}

fn format_instance_state(instance: &InstanceStatus) -> String {
    if instance.relaunch_pending {
        return "restarting".yellow().to_string();
    }
    let text = instance.state.to_string();
    match instance.state {
        InstanceState::Running => text.green().to_string(),
        InstanceState::Starting | InstanceState::Stopping => text.yellow().to_string(),
        InstanceState::Stopped => text.bright_black().to_string(),
        InstanceState::Crashed => text.red().bold().to_string(),
    }
}

/// Format an app state with color coding
fn format_app_state(state: AppState) -> String {
    let text = state.to_string();
    match state {
        AppState::Running => text.green().to_string(),
        AppState::Starting | AppState::Restarting | AppState::Stopping => {
            text.yellow().to_string()
        }
        AppState::Loaded | AppState::Stopped => text.bright_black().to_string(),
        AppState::Crashed => text.red().bold().to_string(),
    }
}

fn format_exit(exit: ExitReport) -> String {
    match exit {
        ExitReport::Code(code) => format!("code {}", code),
        ExitReport::Signal(signal) => format!("signal {}", signal),
    }
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}

/// Format memory usage in human-readable format
fn format_memory(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}

/// Truncate a string to at most `max_len` characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Create a spinner for long operations
pub fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Finish a progress bar with success
pub fn finish_progress_success(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✓".green(), message));
}

/// Finish a progress bar with error
pub fn finish_progress_error(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✗".red(), message));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(&Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(&Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(&Duration::from_secs(3700)), "1h 1m");
        assert_eq!(format_duration(&Duration::from_secs(90000)), "1d 1h");
    }

    #[test]
    fn test_format_memory() {
        assert_eq!(format_memory(512), "512B");
        assert_eq!(format_memory(2048), "2.0KB");
        assert_eq!(format_memory(2 * 1024 * 1024), "2.0MB");
        assert_eq!(format_memory(3 * 1024 * 1024 * 1024), "3.00GB");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a very long string", 10), "this is...");
    }

    #[test]
    fn test_format_exit() {
        assert_eq!(format_exit(ExitReport::Code(1)), "code 1");
        assert_eq!(format_exit(ExitReport::Signal(9)), "signal 9");
    }

    fn crashed_instance() -> InstanceStatus {
        InstanceStatus {
            index: 0,
            label: "web".to_string(),
            pid: None,
            state: InstanceState::Crashed,
            uptime_secs: 0,
            restart_count: 2,
            memory_bytes: 0,
            last_exit: Some(ExitReport::Code(1)),
            last_error: None,
            relaunch_pending: false,
        }
    }

    #[test]
    fn test_restarting_instance_label() {
        colored::control::set_override(false);
        let instance = InstanceStatus {
            relaunch_pending: true,
            ..crashed_instance()
        };
        assert_eq!(format_instance_state(&instance), "restarting");
    }

    #[test]
    fn test_last_outcome_shows_launch_failure() {
        let mut instance = crashed_instance();
        assert_eq!(format_last_outcome(&instance), "code 1");

        instance.last_error = Some("working directory missing".to_string());
        assert_eq!(format_last_outcome(&instance), "launch failed");

        instance.last_exit = None;
        instance.last_error = None;
        assert_eq!(format_last_outcome(&instance), "-");
    }
}
