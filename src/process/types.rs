use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use tokio::process::Child;
use tokio::sync::{watch, Notify};

/// Lifecycle phase of the supervised notebook server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Stopped => write!(f, "stopped"),
            Phase::Starting => write!(f, "starting"),
            Phase::Running => write!(f, "running"),
            Phase::Stopping => write!(f, "stopping"),
        }
    }
}

/// How the child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub success: bool,
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            success: status.success(),
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// A launched notebook server
///
/// The child itself is owned by a waiter task that reaps it the moment it
/// exits; the handle observes that task through a watch channel. Cloning the
/// handle is cheap and every clone sees the same exit.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    port: u16,
    open_file: Option<PathBuf>,
    exit: watch::Receiver<Option<ExitInfo>>,
    kill: Arc<Notify>,
}

impl ProcessHandle {
    /// Hand the child to a waiter task and return a handle to it
    pub fn spawn_waiter(mut child: Child, port: u16, open_file: Option<PathBuf>) -> Self {
        let pid = child.id();
        let (exit_tx, exit_rx) = watch::channel(None);
        let kill = Arc::new(Notify::new());
        let kill_request = kill.clone();

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_request.notified() => {
                    if let Err(e) = child.start_kill() {
                        tracing::warn!("Failed to kill notebook server: {}", e);
                    }
                    child.wait().await
                }
            };

            let info = match status {
                Ok(status) => ExitInfo::from(status),
                Err(e) => {
                    tracing::warn!("Failed to wait for notebook server: {}", e);
                    ExitInfo {
                        code: None,
                        success: false,
                    }
                }
            };

            tracing::debug!(pid = ?pid, "Notebook server exited with {}", info);
            let _ = exit_tx.send(Some(info));
        });

        Self {
            pid,
            port,
            open_file,
            exit: exit_rx,
            kill,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// File the server was asked to open, if it was accepted
    pub fn open_file(&self) -> Option<&Path> {
        self.open_file.as_deref()
    }

    /// Exit recorded by the waiter task, without blocking
    pub fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_info().is_some()
    }

    /// Wait until the child has exited
    pub async fn wait_exit(&self) -> ExitInfo {
        let mut exit = self.exit.clone();
        // Copy out so the watch guard is released before `exit` drops
        let seen = exit.wait_for(|info| info.is_some()).await.map(|info| *info);
        match seen {
            Ok(Some(info)) => info,
            // Sender dropped without a value: the waiter task is gone
            Ok(None) | Err(_) => ExitInfo {
                code: None,
                success: false,
            },
        }
    }

    /// Ask the waiter task to kill the child
    pub fn kill(&self) {
        self.kill.notify_one();
    }
}

/// Whether the protection loop is currently watching the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionState {
    Enabled,
    Disabled,
}

impl ProtectionState {
    pub fn from_active(active: bool) -> Self {
        if active {
            ProtectionState::Enabled
        } else {
            ProtectionState::Disabled
        }
    }
}

/// Point-in-time view of the supervised server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub phase: Phase,
    pub port: u16,
    pub pid: Option<u32>,
    pub url: Option<String>,
    /// Seconds since the current server was launched, 0 when not running
    #[serde(rename = "uptime")]
    pub uptime_secs: u64,
    pub auto_restart: bool,
    pub process_protection: ProtectionState,
    pub restart_count: u32,
    pub max_restarts: u32,
    pub open_file: Option<String>,
}

/// Result of a successful manual start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartReport {
    pub port: u16,
    pub url: String,
    pub pid: Option<u32>,
    pub auto_restart: bool,
    pub open_file: Option<String>,
}

/// What a stop request actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { pid: Option<u32> },
    NotRunning,
}

impl StopOutcome {
    pub fn was_running(&self) -> bool {
        matches!(self, StopOutcome::Stopped { .. })
    }

    pub fn message(&self) -> &'static str {
        match self {
            StopOutcome::Stopped { .. } => "Notebook server stopped",
            StopOutcome::NotRunning => "Notebook server is not running",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::process::Command;

    #[test]
    fn test_snapshot_wire_names() {
        let snapshot = StatusSnapshot {
            running: true,
            phase: Phase::Running,
            port: 8888,
            pid: Some(42),
            url: Some("http://localhost:8888/lab".to_string()),
            uptime_secs: 12,
            auto_restart: true,
            process_protection: ProtectionState::Enabled,
            restart_count: 0,
            max_restarts: 3,
            open_file: None,
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["uptime"], 12);
        assert_eq!(value["process_protection"], "enabled");
        assert_eq!(value["phase"], "running");
    }

    #[test]
    fn test_stop_outcome() {
        assert!(StopOutcome::Stopped { pid: Some(1) }.was_running());
        assert!(!StopOutcome::NotRunning.was_running());
        assert_ne!(
            StopOutcome::NotRunning.message(),
            StopOutcome::Stopped { pid: None }.message()
        );
    }

    #[tokio::test]
    async fn test_handle_observes_exit() {
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg("exit 3")
            .spawn()
            .unwrap();
        let handle = ProcessHandle::spawn_waiter(child, 8888, None);

        let info = tokio::time::timeout(Duration::from_secs(5), handle.wait_exit())
            .await
            .unwrap();
        assert_eq!(info.code, Some(3));
        assert!(handle.has_exited());
    }

    #[tokio::test]
    async fn test_handle_kill() {
        let child = Command::new("/bin/sleep").arg("30").spawn().unwrap();
        let handle = ProcessHandle::spawn_waiter(child, 8888, None);
        assert!(!handle.has_exited());

        handle.kill();
        let info = tokio::time::timeout(Duration::from_secs(5), handle.wait_exit())
            .await
            .unwrap();
        assert!(!info.success);
    }

    #[tokio::test]
    async fn test_wait_exit_from_every_clone() {
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg("exit 7")
            .spawn()
            .unwrap();
        let handle = ProcessHandle::spawn_waiter(child, 8888, None);
        let other = handle.clone();

        let (first, second) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(handle.wait_exit(), other.wait_exit())
        })
        .await
        .unwrap();
        assert_eq!(first, second);
        assert_eq!(first.code, Some(7));

        // Already recorded, so a late waiter returns at once
        let late = tokio::time::timeout(Duration::from_millis(100), handle.wait_exit())
            .await
            .unwrap();
        assert_eq!(late.code, Some(7));
    }
}
