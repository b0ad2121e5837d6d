use crate::config::{resolve_interpreter, LaunchConfig};
use crate::error::{LaunchError, LaunchErrorKind};
use crate::process::output::OutputCapture;
use crate::process::types::ProcessHandle;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use url::Url;

/// Substrings in early stderr that mean the server failed to come up
const FATAL_MARKERS: [&str; 5] = ["error:", "exception", "traceback", "failed", "fatal"];

/// Longest crash output carried in an `EarlyCrash` error
const CRASH_MESSAGE_LIMIT: usize = 500;

/// Launcher tuning knobs
#[derive(Debug, Clone)]
pub struct LauncherSettings {
    /// How long a fresh server is watched before it counts as started
    pub startup_grace: Duration,
    /// How long to wait for a crashed server to die after killing it
    pub kill_timeout: Duration,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_secs(3),
            kill_timeout: Duration::from_secs(5),
        }
    }
}

/// Spawns notebook servers from a `LaunchConfig`
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    settings: LauncherSettings,
}

impl ProcessLauncher {
    pub fn new(settings: LauncherSettings) -> Self {
        Self { settings }
    }

    /// Spawn a notebook server and watch it through the startup grace period
    ///
    /// # Arguments
    /// * `config` - Validated launch parameters
    ///
    /// # Returns
    /// * `Ok(ProcessHandle)` - The server survived startup
    /// * `Err(LaunchError)` - Bad interpreter or directory, spawn failure, or early crash
    pub async fn launch(&self, config: &LaunchConfig) -> Result<ProcessHandle, LaunchError> {
        let interpreter = check_interpreter(&config.interpreter)?;
        check_working_dir(&config.working_dir)?;

        let open_file = config
            .file_to_open
            .as_deref()
            .and_then(|file| accept_file_to_open(file, &config.working_dir));
        let default_url = open_file
            .as_deref()
            .and_then(|file| default_url(config, file));

        let mut command = Command::new(&interpreter);
        command
            .args(build_args(config, default_url.as_deref()))
            .current_dir(&config.working_dir)
            .envs(build_environment(config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::info!(
            port = config.port,
            mode = %config.mode,
            "Launching notebook server with {} in {}",
            interpreter.display(),
            config.working_dir.display()
        );

        let mut child = command.spawn().map_err(|e| {
            LaunchError::new(
                LaunchErrorKind::SpawnFailed,
                format!("Failed to spawn {}: {}", interpreter.display(), e),
            )
        })?;

        let mut output = OutputCapture::attach(&mut child);
        let handle = ProcessHandle::spawn_waiter(child, config.port, open_file);

        // Watch the fresh server for the grace period
        let exited = tokio::select! {
            info = handle.wait_exit() => Some(info),
            _ = tokio::time::sleep(self.settings.startup_grace) => None,
        };

        if let Some(info) = exited {
            output.drain_stderr(Duration::from_millis(500)).await;
            let stderr = output.stderr_head();
            let detail = if stderr.trim().is_empty() {
                format!("Notebook server exited during startup ({})", info)
            } else {
                truncate(stderr.trim(), CRASH_MESSAGE_LIMIT)
            };
            tracing::error!(port = config.port, "Notebook server exited during startup: {}", detail);
            return Err(LaunchError::new(LaunchErrorKind::EarlyCrash, detail));
        }

        let stderr = output.stderr_head();
        if let Some(marker) = find_fatal_marker(&stderr) {
            tracing::error!(
                pid = ?handle.pid(),
                "Notebook server reported '{}' during startup, terminating it",
                marker
            );
            handle.kill();
            let _ = tokio::time::timeout(self.settings.kill_timeout, handle.wait_exit()).await;
            return Err(LaunchError::new(
                LaunchErrorKind::EarlyCrash,
                truncate(stderr.trim(), CRASH_MESSAGE_LIMIT),
            ));
        }

        tracing::info!(
            pid = ?handle.pid(),
            port = config.port,
            "Notebook server started at {}",
            config.url()
        );

        Ok(handle)
    }
}

/// Command-line arguments after the interpreter
pub fn build_args(config: &LaunchConfig, default_url: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "-m".to_string(),
        config.mode.module_name().to_string(),
        format!("--ServerApp.port={}", config.port),
        "--ServerApp.open_browser=False".to_string(),
        format!("--ServerApp.root_dir={}", config.working_dir.display()),
        "--ServerApp.token=".to_string(),
        "--ServerApp.password=".to_string(),
        "--ServerApp.disable_check_xsrf=True".to_string(),
        "--ServerApp.allow_origin=*".to_string(),
    ];

    args.extend(config.extra_args.iter().cloned());

    if let Some(url) = default_url {
        args.push(format!("--ServerApp.default_url={}", url));
    }

    args
}

/// Environment variables set on top of the inherited environment
pub fn build_environment(config: &LaunchConfig) -> BTreeMap<String, OsString> {
    let mut env: BTreeMap<String, OsString> = config
        .env
        .iter()
        .map(|(k, v)| (k.clone(), OsString::from(v)))
        .collect();

    if !config.library_dirs.is_empty() {
        let current = env.get("PATH").cloned().or_else(|| std::env::var_os("PATH"));
        if let Some(path) = prepend_paths(&config.library_dirs, current) {
            env.insert("PATH".to_string(), path);
        }
    }

    if !config.python_path.is_empty() {
        let current = env
            .get("PYTHONPATH")
            .cloned()
            .or_else(|| std::env::var_os("PYTHONPATH"));
        if let Some(path) = prepend_paths(&config.python_path, current) {
            env.insert("PYTHONPATH".to_string(), path);
        }
    }

    let enable_lab = match config.mode {
        crate::config::Mode::Lab => "yes",
        crate::config::Mode::Notebook => "no",
    };
    env.insert("JUPYTER_ENABLE_LAB".to_string(), OsString::from(enable_lab));

    env
}

fn prepend_paths(dirs: &[PathBuf], current: Option<OsString>) -> Option<OsString> {
    let mut entries: Vec<PathBuf> = dirs.to_vec();
    if let Some(current) = current.filter(|c| !c.is_empty()) {
        entries.extend(std::env::split_paths(&current));
    }

    match std::env::join_paths(entries) {
        Ok(joined) => Some(joined),
        Err(e) => {
            tracing::warn!("Ignoring search path entries that cannot be joined: {}", e);
            None
        }
    }
}

/// Landing-page path that opens `file` in the configured front-end
///
/// `file` must already be known to sit under the working directory.
pub fn default_url(config: &LaunchConfig, file: &Path) -> Option<String> {
    let root = config.working_dir.canonicalize().ok()?;
    let relative = file.strip_prefix(&root).ok()?;

    let mut url = Url::parse("http://localhost/").ok()?;
    {
        let mut segments = url.path_segments_mut().ok()?;
        segments.clear();
        segments.extend(config.mode.tree_segments());
        for component in relative.components() {
            segments.push(&component.as_os_str().to_string_lossy());
        }
    }

    Some(url.path().to_string())
}

/// Canonical path of `file` if it is a regular file under `working_dir`
fn accept_file_to_open(file: &Path, working_dir: &Path) -> Option<PathBuf> {
    let accepted = match (file.canonicalize(), working_dir.canonicalize()) {
        (Ok(file), Ok(root)) if file.is_file() && file.starts_with(&root) => Some(file),
        _ => None,
    };

    if accepted.is_none() {
        tracing::warn!(
            "Ignoring file to open {}: not a file inside {}",
            file.display(),
            working_dir.display()
        );
    }

    accepted
}

fn check_interpreter(interpreter: &Path) -> Result<PathBuf, LaunchError> {
    let raw = interpreter.to_string_lossy();
    let resolved = resolve_interpreter(&raw).ok_or_else(|| {
        LaunchError::new(
            LaunchErrorKind::InvalidInterpreter,
            format!("Python interpreter not found: {}", raw),
        )
    })?;

    if !resolved.is_file() || !is_executable(&resolved) {
        return Err(LaunchError::new(
            LaunchErrorKind::InvalidInterpreter,
            format!("Python interpreter is not an executable file: {}", resolved.display()),
        ));
    }

    Ok(resolved)
}

fn check_working_dir(dir: &Path) -> Result<(), LaunchError> {
    if !dir.is_dir() {
        return Err(LaunchError::new(
            LaunchErrorKind::InvalidWorkingDir,
            format!("Working directory does not exist: {}", dir.display()),
        ));
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// First fatal marker found in `output`, matched case-insensitively
pub fn find_fatal_marker(output: &str) -> Option<&'static str> {
    let lowered = output.to_lowercase();
    FATAL_MARKERS
        .iter()
        .copied()
        .find(|marker| lowered.contains(marker))
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
