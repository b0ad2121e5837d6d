use crate::config::StoredConfig;
use std::time::{Duration, SystemTime};

/// Protection settings captured at manual start
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    /// Whether automatic restart is enabled
    pub enabled: bool,
    /// Automatic restarts allowed until the next manual start
    pub max_restarts: u32,
    /// How often the protection loop probes the server
    pub check_interval: Duration,
}

impl RestartPolicy {
    /// Create a restart policy from configuration values
    pub fn from_config(config: &StoredConfig) -> Self {
        Self {
            enabled: config.auto_restart,
            max_restarts: config.max_restarts,
            check_interval: Duration::from_millis(config.check_interval),
        }
    }

    /// Check if another automatic restart is allowed
    pub fn should_restart(&self, tracker: &RestartTracker) -> bool {
        self.enabled && tracker.restart_count() < self.max_restarts
    }

    /// Delay between detecting a dead server and relaunching it
    pub fn backoff(&self) -> Duration {
        self.check_interval
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&StoredConfig::default())
    }
}

/// Tracks automatic restarts since the last manual start
#[derive(Debug, Clone, Default)]
pub struct RestartTracker {
    count: u32,
    last_restart: Option<SystemTime>,
}

impl RestartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an automatic restart attempt, successful or not
    pub fn record_restart(&mut self) {
        self.count = self.count.saturating_add(1);
        self.last_restart = Some(SystemTime::now());
    }

    pub fn restart_count(&self) -> u32 {
        self.count
    }

    pub fn last_restart_time(&self) -> Option<SystemTime> {
        self.last_restart
    }

    /// Forget all attempts (manual start)
    pub fn reset(&mut self) {
        self.count = 0;
        self.last_restart = None;
    }
}
