// Shared helpers for integration tests

#![allow(dead_code)]

use labkeeper::ai::VisionClient;
use labkeeper::config::{ConfigStore, StoredConfig};
use labkeeper::http::AppState;
use labkeeper::process::{
    LauncherSettings, LivenessProbe, ProcessLauncher, Supervisor, SupervisorSettings,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Stands in for a notebook server that stays up
pub const LONG_RUNNING: &str = "exec sleep 30\n";

/// `/bin/sh -m jupyterlab ...` runs the script named `jupyterlab` in the
/// working directory, so /bin/sh can play the interpreter.
pub fn write_server(dir: &Path, script: &str) {
    fs::write(dir.join("jupyterlab"), script).unwrap();
    fs::write(dir.join("notebook"), script).unwrap();
}

pub fn test_config(dir: &Path, port: u16) -> StoredConfig {
    StoredConfig {
        python_executable: "/bin/sh".to_string(),
        project_dir: dir.to_string_lossy().into_owned(),
        jupyter_port: port,
        check_interval: 1000,
        max_restarts: 3,
        ..StoredConfig::default()
    }
}

/// A supervisor with short timings around an in-memory config
pub fn create_supervisor(dir: &TempDir, port: u16) -> Supervisor {
    write_server(dir.path(), LONG_RUNNING);

    let store = Arc::new(ConfigStore::with_config(
        dir.path().join("labkeeper.json"),
        test_config(dir.path(), port),
    ));

    Supervisor::with_components(
        store,
        ProcessLauncher::new(LauncherSettings {
            startup_grace: Duration::from_millis(100),
            kill_timeout: Duration::from_secs(2),
        }),
        LivenessProbe::new(Duration::from_millis(100)),
        SupervisorSettings {
            stop_timeout: Duration::from_secs(2),
            restart_settle: Duration::from_millis(50),
        },
    )
}

pub fn create_state(dir: &TempDir, port: u16) -> AppState {
    AppState {
        supervisor: create_supervisor(dir, port),
        vision: VisionClient::new().unwrap(),
    }
}
