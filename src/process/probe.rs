use crate::process::types::ProcessHandle;
use std::time::Duration;
use tokio::net::TcpStream;

/// Which check decided the probe result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeSignal {
    /// Existence check on the recorded PID
    Pid,
    /// Exit status held by the waiter task
    Handle,
    /// TCP connect to the server port
    Port,
}

/// Outcome of one liveness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    pub alive: bool,
    pub signal: ProbeSignal,
    /// The recorded PID no longer refers to our server
    pub pid_stale: bool,
}

/// Decides whether the notebook server is alive
#[derive(Debug, Clone)]
pub struct LivenessProbe {
    tcp_timeout: Duration,
}

impl Default for LivenessProbe {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl LivenessProbe {
    pub fn new(tcp_timeout: Duration) -> Self {
        Self { tcp_timeout }
    }

    /// Probe the server, most reliable signal first
    ///
    /// # Arguments
    /// * `handle` - Handle of the launched server, if one is held
    /// * `port` - Port to try when no handle is held
    pub async fn probe(&self, handle: Option<&ProcessHandle>, port: u16) -> ProbeReport {
        if let Some(handle) = handle {
            if let Some(pid) = handle.pid() {
                // A recorded exit means the PID may already belong to someone else
                let alive = !handle.has_exited() && pid_exists(pid);
                return ProbeReport {
                    alive,
                    signal: ProbeSignal::Pid,
                    pid_stale: !alive,
                };
            }

            return ProbeReport {
                alive: !handle.has_exited(),
                signal: ProbeSignal::Handle,
                pid_stale: false,
            };
        }

        ProbeReport {
            alive: self.port_open(port).await,
            signal: ProbeSignal::Port,
            pid_stale: false,
        }
    }

    /// Boolean view of `probe`
    pub async fn is_alive(&self, handle: Option<&ProcessHandle>, port: u16) -> bool {
        self.probe(handle, port).await.alive
    }

    async fn port_open(&self, port: u16) -> bool {
        matches!(
            tokio::time::timeout(self.tcp_timeout, TcpStream::connect(("127.0.0.1", port))).await,
            Ok(Ok(_))
        )
    }
}

/// Zero-effect existence check
#[cfg(unix)]
fn pid_exists(pid: u32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // Permission failures count as not ours
    signal::kill(Pid::from_raw(raw), None).is_ok()
}

#[cfg(not(unix))]
fn pid_exists(pid: u32) -> bool {
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

    let sys_pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[sys_pid]),
        true,
        ProcessRefreshKind::new(),
    );
    system.process(sys_pid).is_some()
}
