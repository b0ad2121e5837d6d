// Python environment detection

use crate::config::resolve_interpreter;
use crate::error::{KeeperError, Result};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Printed as one JSON line by the interpreter under test
const PROBE_SCRIPT: &str = r#"
import json, platform, sys

def version(name):
    try:
        module = __import__(name)
    except Exception:
        return None
    return str(getattr(module, "__version__", "unknown"))

lab = version("jupyterlab")
nb = version("notebook")
print(json.dumps({
    "python_version": platform.python_version(),
    "python_executable": sys.executable,
    "platform": platform.platform(),
    "jupyterlab_installed": lab is not None,
    "jupyterlab_version": lab,
    "notebook_installed": nb is not None,
    "notebook_version": nb,
}))
"#;

const DETECT_TIMEOUT: Duration = Duration::from_secs(10);

/// What an interpreter reports about itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PythonInfo {
    pub python_version: String,
    pub python_executable: String,
    pub platform: String,
    pub jupyterlab_installed: bool,
    pub jupyterlab_version: Option<String>,
    #[serde(default)]
    pub notebook_installed: bool,
    #[serde(default)]
    pub notebook_version: Option<String>,
}

impl PythonInfo {
    /// Placeholder when the interpreter could not be run
    pub fn unavailable(interpreter: &str) -> Self {
        Self {
            python_version: "unknown".to_string(),
            python_executable: interpreter.to_string(),
            platform: host_platform(),
            jupyterlab_installed: false,
            jupyterlab_version: None,
            notebook_installed: false,
            notebook_version: None,
        }
    }
}

/// Run `interpreter` and ask it for its version and installed front-ends
pub async fn detect_python(interpreter: &str) -> Result<PythonInfo> {
    let resolved = resolve_interpreter(interpreter).ok_or_else(|| {
        KeeperError::ConfigValidationError(format!("Python interpreter not found: {}", interpreter))
    })?;

    let output = tokio::time::timeout(
        DETECT_TIMEOUT,
        Command::new(&resolved)
            .arg("-c")
            .arg(PROBE_SCRIPT)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| {
        KeeperError::ExternalService(format!(
            "{} did not answer within {:?}",
            resolved.display(),
            DETECT_TIMEOUT
        ))
    })?
    .map_err(|e| {
        KeeperError::ConfigValidationError(format!(
            "Failed to run {}: {}",
            resolved.display(),
            e
        ))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(KeeperError::ExternalService(format!(
            "{} exited with {}: {}",
            resolved.display(),
            output.status,
            stderr.trim()
        )));
    }

    parse_info(&String::from_utf8_lossy(&output.stdout))
}

/// Parse the last JSON line printed by the probe script
pub fn parse_info(stdout: &str) -> Result<PythonInfo> {
    let line = stdout
        .lines()
        .rev()
        .find(|line| line.trim_start().starts_with('{'))
        .ok_or_else(|| {
            KeeperError::DeserializationError("interpreter printed no environment report".into())
        })?;

    serde_json::from_str(line).map_err(|e| KeeperError::DeserializationError(e.to_string()))
}

fn host_platform() -> String {
    sysinfo::System::long_os_version()
        .unwrap_or_else(|| std::env::consts::OS.to_string())
}
