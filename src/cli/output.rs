// Output formatting and display for CLI

use crate::detect::PythonInfo;
use crate::error::{KeeperError, Result};
use crate::http::protocol::{
    DetectResponse, HealthResponse, StartResponse, StatusResponse, StopResponse,
};
use crate::process::{Phase, ProtectionState};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print the status as a headline plus a field table
pub fn print_status(status: &StatusResponse) {
    #[derive(Tabled)]
    struct FieldRow {
        #[tabled(rename = "Field")]
        field: &'static str,
        #[tabled(rename = "Value")]
        value: String,
    }

    let snapshot = &status.status;
    if snapshot.running {
        println!("{}", "✓ Notebook server is running".green().bold());
    } else {
        println!("{}", "✗ Notebook server is not running".red().bold());
    }

    let rows = vec![
        FieldRow {
            field: "Phase",
            value: format_phase_colored(snapshot.phase),
        },
        FieldRow {
            field: "Port",
            value: snapshot.port.to_string(),
        },
        FieldRow {
            field: "PID",
            value: snapshot
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
        },
        FieldRow {
            field: "URL",
            value: snapshot.url.clone().unwrap_or_else(|| "-".to_string()),
        },
        FieldRow {
            field: "Uptime",
            value: format_duration(Duration::from_secs(snapshot.uptime_secs)),
        },
        FieldRow {
            field: "Auto restart",
            value: yes_no(snapshot.auto_restart),
        },
        FieldRow {
            field: "Protection",
            value: format_protection(snapshot.process_protection),
        },
        FieldRow {
            field: "Restarts",
            value: format!("{}/{}", snapshot.restart_count, snapshot.max_restarts),
        },
        FieldRow {
            field: "Open file",
            value: snapshot.open_file.clone().unwrap_or_else(|| "-".to_string()),
        },
        FieldRow {
            field: "Python",
            value: status.config.python_executable.clone(),
        },
        FieldRow {
            field: "Project",
            value: truncate(&status.config.project_dir, 60),
        },
    ];

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
}

pub fn print_started(response: &StartResponse) {
    println!("  {}: {}", "URL".bold(), response.url.cyan());
    println!("  {}: {}", "Port".bold(), response.port);
    if let Some(pid) = response.pid {
        println!("  {}: {}", "PID".bold(), pid);
    }
    println!("  {}: {}", "Auto restart".bold(), yes_no(response.auto_restart));
    if let Some(file) = &response.open_file {
        println!("  {}: {}", "Opening".bold(), file);
    }
}

pub fn print_stopped(response: &StopResponse) {
    if response.was_running {
        println!("{} {}", "✓".green().bold(), response.message);
    } else {
        println!("{} {}", "ℹ".blue().bold(), response.message);
    }
}

pub fn print_detect(response: &DetectResponse) {
    if response.success {
        println!("{} {}", "✓".green().bold(), response.message);
    } else {
        println!("{} {}", "✗".red().bold(), response.message);
    }
    print_python_info(&response.info);
}

fn print_python_info(info: &PythonInfo) {
    println!();
    println!("  {:<15} {}", "Python:".bold(), info.python_version);
    println!("  {:<15} {}", "Executable:".bold(), info.python_executable);
    println!("  {:<15} {}", "Platform:".bold(), info.platform);
    println!(
        "  {:<15} {}",
        "JupyterLab:".bold(),
        format_component(info.jupyterlab_installed, info.jupyterlab_version.as_deref())
    );
    println!(
        "  {:<15} {}",
        "Notebook:".bold(),
        format_component(info.notebook_installed, info.notebook_version.as_deref())
    );
    println!();
}

pub fn print_health(health: &HealthResponse, api: &str) {
    println!("{} {}", "✓".green().bold(), health.message);
    println!("  {}: {}", "API".bold(), api);
    println!("  {}: {}", "Time".bold(), format_timestamp(&health.timestamp));
}

/// Print the stored configuration as pretty JSON
pub fn print_config(config: &Value) -> Result<()> {
    let pretty = serde_json::to_string_pretty(config)
        .map_err(|e| KeeperError::SerializationError(e.to_string()))?;
    println!("{}", pretty);
    Ok(())
}

fn format_phase_colored(phase: Phase) -> String {
    match phase {
        Phase::Running => phase.to_string().green().to_string(),
        Phase::Starting | Phase::Stopping => phase.to_string().yellow().to_string(),
        Phase::Stopped => phase.to_string().bright_black().to_string(),
    }
}

fn format_protection(state: ProtectionState) -> String {
    match state {
        ProtectionState::Enabled => "enabled".green().to_string(),
        ProtectionState::Disabled => "disabled".bright_black().to_string(),
    }
}

fn format_component(installed: bool, version: Option<&str>) -> String {
    match (installed, version) {
        (true, Some(version)) => version.green().to_string(),
        (true, None) => "installed".green().to_string(),
        (false, _) => "not installed".red().to_string(),
    }
}

fn yes_no(value: bool) -> String {
    let text = if value { "yes" } else { "no" };
    text.to_string()
}

/// Render an RFC 3339 timestamp in local time, or pass it through
fn format_timestamp(raw: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|_| raw.to_string())
}

/// Format a duration in human-readable format
fn format_duration(duration: Duration) -> String {
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

/// Keep the tail of long paths, which is the informative part
fn truncate(s: &str, max_len: usize) -> String {
    let count = s.chars().count();
    if count <= max_len {
        s.to_string()
    } else {
        let tail: String = s.chars().skip(count - (max_len - 3)).collect();
        format!("...{}", tail)
    }
}

/// Spinner shown while a request is in flight
pub fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
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
