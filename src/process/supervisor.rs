use crate::config::{ConfigStore, LaunchConfig, LaunchOverrides, Mode};
use crate::error::{KeeperError, Result};
use crate::process::launcher::ProcessLauncher;
use crate::process::probe::LivenessProbe;
use crate::process::restart::{RestartPolicy, RestartTracker};
use crate::process::types::{
    Phase, ProcessHandle, ProtectionState, StartReport, StatusSnapshot, StopOutcome,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};


/// Supervisor timing knobs
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Grace period between SIGTERM and SIGKILL
    pub stop_timeout: Duration,
    /// Pause between stop and start during a restart
    pub restart_settle: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(5),
            restart_settle: Duration::from_secs(2),
        }
    }
}

/// Mutable supervision state, guarded by a short synchronous lock
#[derive(Debug, Default)]
struct SupervisionState {
    phase: Phase,
    handle: Option<ProcessHandle>,
    started_at: Option<Instant>,
    tracker: RestartTracker,
    policy: RestartPolicy,
    last_config: Option<LaunchConfig>,
    protection: Option<ProtectionTask>,
}

impl SupervisionState {
    fn clear_process(&mut self) {
        self.phase = Phase::Stopped;
        self.handle = None;
        self.started_at = None;
    }

    fn protection_active(&self) -> bool {
        self.protection
            .as_ref()
            .map(|task| !task.join.is_finished())
            .unwrap_or(false)
    }

    fn port(&self, stored_port: u16) -> u16 {
        self.handle
            .as_ref()
            .map(ProcessHandle::port)
            .or_else(|| self.last_config.as_ref().map(|c| c.port))
            .unwrap_or(stored_port)
    }
}

#[derive(Debug)]
struct ProtectionTask {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

struct Inner {
    /// Held for the whole launch or teardown critical section
    ops: tokio::sync::Mutex<()>,
    state: Mutex<SupervisionState>,
    launcher: ProcessLauncher,
    probe: LivenessProbe,
    settings: SupervisorSettings,
    config: Arc<ConfigStore>,
}

/// Owns the notebook server lifecycle
///
/// Cheap to clone; every clone drives the same server.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self::with_components(
            config,
            ProcessLauncher::default(),
            LivenessProbe::default(),
            SupervisorSettings::default(),
        )
    }

    pub fn with_components(
        config: Arc<ConfigStore>,
        launcher: ProcessLauncher,
        probe: LivenessProbe,
        settings: SupervisorSettings,
    ) -> Self {
        let policy = RestartPolicy::from_config(&config.current());
        Self {
            inner: Arc::new(Inner {
                ops: tokio::sync::Mutex::new(()),
                state: Mutex::new(SupervisionState {
                    policy,
                    ..SupervisionState::default()
                }),
                launcher,
                probe,
                settings,
                config,
            }),
        }
    }

    /// The configuration store launches are merged from
    pub fn config_store(&self) -> &Arc<ConfigStore> {
        &self.inner.config
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    /// Launch the notebook server
    ///
    /// # Arguments
    /// * `overrides` - Per-request values layered over the stored configuration
    ///
    /// # Returns
    /// * `Ok(StartReport)` - Server is running
    /// * `Err(KeeperError)` - Already running, busy, bad configuration, or launch failure
    pub async fn start(&self, overrides: LaunchOverrides) -> Result<StartReport> {
        if self.phase() == Phase::Stopping {
            return Err(KeeperError::Busy("a stop is in progress".to_string()));
        }

        let _guard = self.inner.ops.lock().await;
        self.start_locked(overrides).await
    }

    /// Stop the notebook server; a no-op when nothing is running
    pub async fn stop(&self) -> Result<StopOutcome> {
        // Signal the loop before waiting for the lock it may be holding
        self.signal_protection_stop();
        let _guard = self.inner.ops.lock().await;
        self.stop_locked().await
    }

    /// Stop (best effort), settle, then start
    pub async fn restart(&self, overrides: LaunchOverrides) -> Result<StartReport> {
        self.signal_protection_stop();
        let _guard = self.inner.ops.lock().await;

        if let Err(e) = self.stop_locked().await {
            warn!("Stop before restart failed, starting anyway: {}", e);
        }

        tokio::time::sleep(self.inner.settings.restart_settle).await;
        self.start_locked(overrides).await
    }

    /// Stop used when the service itself is going down
    pub async fn shutdown(&self) -> Result<StopOutcome> {
        info!("Shutting down notebook supervision");
        let outcome = self.stop().await?;
        if let StopOutcome::Stopped { pid } = outcome {
            info!(pid = ?pid, "Notebook server stopped for shutdown");
        }
        Ok(outcome)
    }

    /// Current status from state plus a fresh probe
    pub async fn status(&self) -> StatusSnapshot {
        let stored = self.inner.config.current();
        let (handle, port) = {
            let state = self.state();
            (state.handle.clone(), state.port(stored.jupyter_port))
        };

        let report = self.inner.probe.probe(handle.as_ref(), port).await;

        let mut state = self.state();
        if report.pid_stale {
            let same = match (&state.handle, &handle) {
                (Some(current), Some(probed)) => current.pid() == probed.pid(),
                _ => false,
            };
            if same {
                debug!("Clearing stale notebook server PID");
                state.clear_process();
            }
        }

        let running = report.alive;
        let mode = state
            .last_config
            .as_ref()
            .map(|c| c.mode)
            .unwrap_or_else(|| stored.mode());

        StatusSnapshot {
            running,
            phase: state.phase,
            port,
            pid: state.handle.as_ref().and_then(ProcessHandle::pid),
            url: running.then(|| format!("http://localhost:{}{}", port, mode.url_suffix())),
            uptime_secs: state
                .started_at
                .filter(|_| running)
                .map(|t| t.elapsed().as_secs())
                .unwrap_or(0),
            auto_restart: state.policy.enabled,
            process_protection: ProtectionState::from_active(state.protection_active()),
            restart_count: state.tracker.restart_count(),
            max_restarts: state.policy.max_restarts,
            open_file: state
                .handle
                .as_ref()
                .and_then(|h| h.open_file())
                .map(|p| p.to_string_lossy().into_owned()),
        }
    }

    async fn start_locked(&self, overrides: LaunchOverrides) -> Result<StartReport> {
        let stored = self.inner.config.current();

        let (phase, handle, port) = {
            let state = self.state();
            (
                state.phase,
                state.handle.clone(),
                state.port(stored.jupyter_port),
            )
        };

        if matches!(phase, Phase::Starting | Phase::Running) {
            if self.inner.probe.is_alive(handle.as_ref(), port).await {
                return Err(KeeperError::AlreadyRunning(port));
            }
            info!("Previous notebook server is gone, treating it as stopped");
            self.state().clear_process();
        }

        // Validated before anything is spawned
        let config = LaunchConfig::merge(&stored, &overrides)?;
        let policy = RestartPolicy::from_config(&stored);

        self.stop_protection().await;

        {
            let mut state = self.state();
            state.phase = Phase::Starting;
            state.policy = policy.clone();
        }

        let handle = match self.inner.launcher.launch(&config).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(port = config.port, "Failed to start notebook server: {}", e);
                self.state().clear_process();
                return Err(e.into());
            }
        };

        let report = StartReport {
            port: config.port,
            url: config.url(),
            pid: handle.pid(),
            auto_restart: policy.enabled,
            open_file: handle
                .open_file()
                .map(|p| p.to_string_lossy().into_owned()),
        };

        {
            let mut state = self.state();
            state.handle = Some(handle);
            state.started_at = Some(Instant::now());
            state.tracker.reset();
            state.phase = Phase::Running;
            state.last_config = Some(config);
        }

        if policy.enabled {
            self.ensure_protection(policy);
        }

        info!(pid = ?report.pid, port = report.port, "Notebook server running at {}", report.url);
        Ok(report)
    }

    async fn stop_locked(&self) -> Result<StopOutcome> {
        self.stop_protection().await;

        let handle = {
            let mut state = self.state();
            match state.handle.clone() {
                Some(handle) if !handle.has_exited() => {
                    state.phase = Phase::Stopping;
                    handle
                }
                _ => {
                    state.clear_process();
                    info!("Stop requested but notebook server is not running");
                    return Ok(StopOutcome::NotRunning);
                }
            }
        };

        let pid = handle.pid();
        let result = self.terminate(&handle).await;

        self.state().clear_process();

        match result {
            Ok(()) => {
                info!(pid = ?pid, "Notebook server stopped");
                Ok(StopOutcome::Stopped { pid })
            }
            Err(e) => {
                error!(pid = ?pid, "Failed to stop notebook server: {}", e);
                Err(e)
            }
        }
    }

    /// SIGTERM, wait, then SIGKILL
    async fn terminate(&self, handle: &ProcessHandle) -> Result<()> {
        let timeout = self.inner.settings.stop_timeout;

        send_terminate(handle)?;
        debug!("Waiting {:?} for notebook server to exit gracefully", timeout);

        match tokio::time::timeout(timeout, handle.wait_exit()).await {
            Ok(info) => {
                info!("Notebook server exited gracefully with {}", info);
                Ok(())
            }
            Err(_) => {
                warn!(
                    "Notebook server did not exit within {:?}, killing it",
                    timeout
                );
                send_kill(handle)?;
                tokio::time::timeout(timeout, handle.wait_exit())
                    .await
                    .map(|_| ())
                    .map_err(|_| {
                        KeeperError::StopError(
                            "notebook server did not exit after SIGKILL".to_string(),
                        )
                    })
            }
        }
    }

    /// Start exactly one protection loop
    fn ensure_protection(&self, policy: RestartPolicy) {
        let mut state = self.state();
        if state.protection_active() {
            return;
        }

        let cancel = CancellationToken::new();
        let join = tokio::spawn(self.clone().protection_loop(cancel.clone(), policy));
        state.protection = Some(ProtectionTask { cancel, join });
    }

    fn signal_protection_stop(&self) {
        if let Some(task) = self.state().protection.as_ref() {
            task.cancel.cancel();
        }
    }

    /// Cancel the protection loop and wait for it to finish
    async fn stop_protection(&self) {
        let task = self.state().protection.take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.join.await {
                warn!("Protection loop ended abnormally: {}", e);
            }
        }
    }

    async fn protection_loop(self, cancel: CancellationToken, policy: RestartPolicy) {
        info!(
            interval_ms = policy.check_interval.as_millis() as u64,
            max_restarts = policy.max_restarts,
            "Process protection enabled"
        );

        let mut ticker = tokio::time::interval(policy.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.reset();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let stored_port = self.inner.config.current().jupyter_port;
            let (handle, port) = {
                let state = self.state();
                (state.handle.clone(), state.port(stored_port))
            };

            if self.inner.probe.is_alive(handle.as_ref(), port).await {
                debug!(port, "Notebook server is alive");
                continue;
            }

            let attempt = {
                let mut state = self.state();
                if cancel.is_cancelled() {
                    break;
                }
                if !policy.should_restart(&state.tracker) {
                    // Phase keeps what was last observed; only the dead child is dropped
                    state.handle = None;
                    state.started_at = None;
                    warn!(
                        max_restarts = policy.max_restarts,
                        "Notebook server is down and the restart limit is reached, protection stops"
                    );
                    break;
                }
                state.clear_process();
                state.tracker.record_restart();
                state.tracker.restart_count()
            };

            warn!(
                attempt,
                max_restarts = policy.max_restarts,
                "Notebook server is down, restarting in {:?}",
                policy.backoff()
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(policy.backoff()) => {}
            }

            let _guard = tokio::select! {
                _ = cancel.cancelled() => break,
                guard = self.inner.ops.lock() => guard,
            };
            if cancel.is_cancelled() {
                break;
            }

            let (handle, config) = {
                let state = self.state();
                (state.handle.clone(), state.last_config.clone())
            };

            let Some(config) = config else {
                warn!("No previous launch to repeat, protection stops");
                break;
            };

            if self.inner.probe.is_alive(handle.as_ref(), config.port).await {
                info!(port = config.port, "Notebook server came back, skipping restart");
                continue;
            }

            // Automatic restarts always bring up Lab
            let config = config.with_mode(Mode::Lab);
            self.state().phase = Phase::Starting;

            match self.inner.launcher.launch(&config).await {
                Ok(handle) => {
                    info!(attempt, pid = ?handle.pid(), "Notebook server restarted automatically");
                    let mut state = self.state();
                    state.handle = Some(handle);
                    state.started_at = Some(Instant::now());
                    state.phase = Phase::Running;
                    state.last_config = Some(config);
                }
                Err(e) if e.kind.is_configuration() => {
                    error!(attempt, "Automatic restart cannot succeed, protection stops: {}", e);
                    self.state().clear_process();
                    break;
                }
                Err(e) => {
                    warn!(attempt, "Automatic restart failed: {}", e);
                    self.state().clear_process();
                }
            }
        }

        debug!("Protection loop finished");
    }

    fn state(&self) -> MutexGuard<'_, SupervisionState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(unix)]
fn send_terminate(handle: &ProcessHandle) -> Result<()> {
    send_signal(handle, nix::sys::signal::Signal::SIGTERM)
}

#[cfg(unix)]
fn send_kill(handle: &ProcessHandle) -> Result<()> {
    send_signal(handle, nix::sys::signal::Signal::SIGKILL)
}

#[cfg(unix)]
fn send_signal(handle: &ProcessHandle, signal: nix::sys::signal::Signal) -> Result<()> {
    use nix::errno::Errno;
    use nix::unistd::Pid;

    let Some(pid) = handle.pid() else {
        handle.kill();
        return Ok(());
    };
    let raw = i32::try_from(pid)
        .map_err(|e| KeeperError::SignalError(format!("Invalid PID {}: {}", pid, e)))?;

    match nix::sys::signal::kill(Pid::from_raw(raw), signal) {
        // Already gone
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(KeeperError::SignalError(format!(
            "Failed to send {} to {}: {}",
            signal, pid, e
        ))),
    }
}

#[cfg(not(unix))]
fn send_terminate(handle: &ProcessHandle) -> Result<()> {
    handle.kill();
    Ok(())
}

#[cfg(not(unix))]
fn send_kill(handle: &ProcessHandle) -> Result<()> {
    handle.kill();
    Ok(())
}
