// HTTP protocol definitions shared by the service and the CLI client

use crate::config::{LaunchOverrides, Mode};
use crate::detect::PythonInfo;
use crate::error::{KeeperError, Result};
use crate::process::StatusSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Body of `POST /api/start` and `POST /api/restart`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_executable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_notebook: Option<bool>,
}

impl StartRequest {
    /// First path given among the accepted aliases
    fn requested_path(&self) -> Option<&str> {
        [
            &self.project_dir,
            &self.work_dir,
            &self.root_dir,
            &self.target_path,
        ]
        .into_iter()
        .flatten()
        .map(String::as_str)
        .find(|p| !p.trim().is_empty())
    }

    /// Turn the request into launch overrides
    ///
    /// A file path means "open this file" with its parent as the working
    /// directory; a directory is the working directory.
    pub fn to_overrides(&self) -> Result<LaunchOverrides> {
        let mut overrides = LaunchOverrides {
            port: self.port,
            mode: self.use_notebook.map(Mode::from_use_notebook),
            ..LaunchOverrides::default()
        };

        if let Some(python) = self.python_executable.as_deref().map(clean_path) {
            if !python.is_empty() {
                overrides.interpreter = Some(PathBuf::from(python));
            }
        }

        if let Some(raw) = self.requested_path() {
            let cleaned = clean_path(raw);
            let path = Path::new(&cleaned);

            if !path.exists() {
                return Err(KeeperError::ConfigValidationError(format!(
                    "Path does not exist: {}",
                    cleaned
                )));
            }

            let path = path.canonicalize()?;
            if path.is_file() {
                overrides.working_dir = path.parent().map(Path::to_path_buf);
                overrides.file_to_open = Some(path);
            } else if path.is_dir() {
                overrides.working_dir = Some(path);
            } else {
                return Err(KeeperError::ConfigValidationError(format!(
                    "Unrecognised path type: {}",
                    cleaned
                )));
            }
        }

        Ok(overrides)
    }
}

/// Collapse doubled backslashes from over-escaped clients and trim
fn clean_path(raw: &str) -> String {
    raw.replace("\\\\", "\\").trim().to_string()
}

/// Failure body shared by every endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub timestamp: String,
}

/// Configuration summary attached to status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub python_executable: String,
    pub project_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: StatusSnapshot,
    pub config: ConfigSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub success: bool,
    pub message: String,
    pub port: u16,
    pub url: String,
    pub pid: Option<u32>,
    pub auto_restart: bool,
    pub open_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub success: bool,
    pub message: String,
    pub was_running: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResponse {
    pub success: bool,
    pub message: String,
    pub info: PythonInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub config: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub success: bool,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}
