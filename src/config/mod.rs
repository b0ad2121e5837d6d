// Configuration: the persisted record and the per-launch parameter set

mod store;

pub use store::ConfigStore;

use crate::error::{KeeperError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Lowest port a notebook server may be bound to
pub const MIN_PORT: i64 = 1024;
/// Highest valid TCP port
pub const MAX_PORT: i64 = 65535;
/// Shortest allowed protection check interval
pub const MIN_CHECK_INTERVAL_MS: u64 = 1000;

/// Which notebook front-end to launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Lab,
    Notebook,
}

impl Mode {
    pub fn from_use_notebook(use_notebook: bool) -> Self {
        if use_notebook {
            Mode::Notebook
        } else {
            Mode::Lab
        }
    }

    /// Python module run with `-m`
    pub fn module_name(&self) -> &'static str {
        match self {
            Mode::Lab => "jupyterlab",
            Mode::Notebook => "notebook",
        }
    }

    /// Path appended to the server origin for the landing page
    pub fn url_suffix(&self) -> &'static str {
        match self {
            Mode::Lab => "/lab",
            Mode::Notebook => "/tree",
        }
    }

    /// Path segments under which files are opened
    pub fn tree_segments(&self) -> &'static [&'static str] {
        match self {
            Mode::Lab => &["lab", "tree"],
            Mode::Notebook => &["tree"],
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Lab => write!(f, "Lab"),
            Mode::Notebook => write!(f, "Notebook"),
        }
    }
}

/// The flat configuration record persisted between service runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredConfig {
    /// Interpreter used to run the notebook server (path or bare name on PATH)
    #[serde(default = "default_python")]
    pub python_executable: String,

    /// Port the notebook server listens on
    #[serde(default = "default_port", alias = "port")]
    pub jupyter_port: u16,

    /// Root directory served by the notebook server
    #[serde(default = "default_project_dir")]
    pub project_dir: String,

    /// Launch the classic Notebook instead of Lab
    #[serde(default)]
    pub use_notebook: bool,

    /// Launch the notebook server when the service starts
    #[serde(default)]
    pub auto_start: bool,

    /// Restart the server automatically when it dies
    #[serde(default = "default_auto_restart")]
    pub auto_restart: bool,

    /// Protection loop interval in milliseconds
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    /// Automatic restarts allowed per manual start
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Extra command-line arguments (list, or one whitespace-separated string)
    #[serde(default, deserialize_with = "deserialize_args")]
    pub args: Vec<String>,

    /// Environment overrides for the notebook server
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Directories prepended to PATH (shared libraries, DLLs)
    #[serde(default)]
    pub library_dirs: Vec<PathBuf>,

    /// Directories prepended to PYTHONPATH
    #[serde(default)]
    pub python_path: Vec<PathBuf>,

    /// Keys this service does not interpret, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// Default value functions for serde
fn default_python() -> String {
    ["python3", "python"]
        .iter()
        .find_map(|name| which::which(name).ok())
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_else(|| "python3".to_string())
}

fn default_port() -> u16 {
    8888
}

fn default_project_dir() -> String {
    ".".to_string()
}

fn default_auto_restart() -> bool {
    true
}

fn default_check_interval() -> u64 {
    5000
}

fn default_max_restarts() -> u32 {
    3
}

fn deserialize_args<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Args {
        List(Vec<String>),
        Line(String),
    }

    Ok(match Args::deserialize(deserializer)? {
        Args::List(list) => list,
        Args::Line(line) => line.split_whitespace().map(str::to_string).collect(),
    })
}

impl Default for StoredConfig {
    fn default() -> Self {
        Self {
            python_executable: default_python(),
            jupyter_port: default_port(),
            project_dir: default_project_dir(),
            use_notebook: false,
            auto_start: false,
            auto_restart: default_auto_restart(),
            check_interval: default_check_interval(),
            max_restarts: default_max_restarts(),
            args: Vec::new(),
            env: HashMap::new(),
            library_dirs: Vec::new(),
            python_path: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl StoredConfig {
    /// Validate fields that do not depend on the filesystem
    pub fn validate(&self) -> Result<()> {
        validate_port(i64::from(self.jupyter_port))?;

        if self.check_interval < MIN_CHECK_INTERVAL_MS {
            return Err(KeeperError::ConfigValidationError(format!(
                "check_interval must be at least {} ms",
                MIN_CHECK_INTERVAL_MS
            )));
        }

        if self.python_executable.trim().is_empty() {
            return Err(KeeperError::MissingConfigField("python_executable".to_string()));
        }

        Ok(())
    }

    /// Overlay arbitrary key/values onto this record
    ///
    /// Interpreter and directory paths present in `patch` must exist; keys the
    /// record does not know are kept as-is.
    pub fn apply_patch(&self, patch: &Map<String, Value>) -> Result<StoredConfig> {
        if let Some(value) = patch.get("python_executable") {
            let raw = value.as_str().ok_or_else(|| {
                KeeperError::ConfigValidationError("python_executable must be a string".into())
            })?;
            match resolve_interpreter(raw) {
                Some(path) if path.is_file() => {}
                _ => {
                    return Err(KeeperError::ConfigValidationError(format!(
                        "Python interpreter path is invalid: {}",
                        raw
                    )))
                }
            }
        }

        if let Some(value) = patch.get("project_dir") {
            let raw = value.as_str().ok_or_else(|| {
                KeeperError::ConfigValidationError("project_dir must be a string".into())
            })?;
            if !expand_path(raw).is_dir() {
                return Err(KeeperError::ConfigValidationError(format!(
                    "Project directory path is invalid: {}",
                    raw
                )));
            }
        }

        let mut merged = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(KeeperError::Internal(
                    "stored config did not serialize to an object".to_string(),
                ))
            }
            Err(e) => return Err(KeeperError::SerializationError(e.to_string())),
        };

        for (key, value) in patch {
            // "port" is an alias; keep a single canonical key
            let key = if key == "port" { "jupyter_port" } else { key.as_str() };
            merged.insert(key.to_string(), value.clone());
        }

        let config: StoredConfig = serde_json::from_value(Value::Object(merged))
            .map_err(|e| KeeperError::ConfigValidationError(e.to_string()))?;
        config.validate()?;

        Ok(config)
    }

    /// Copy with `~` and `$VAR` references resolved; the stored record keeps them
    pub fn expanded(&self) -> Self {
        let mut config = self.clone();
        config.expand_env_vars();
        config
    }

    fn expand_env_vars(&mut self) {
        self.python_executable = expand_env_in_string(&self.python_executable);
        self.project_dir = expand_path(&self.project_dir).to_string_lossy().into_owned();
        self.library_dirs = self
            .library_dirs
            .iter()
            .map(|dir| expand_path(&dir.to_string_lossy()))
            .collect();
        self.python_path = self
            .python_path
            .iter()
            .map(|dir| expand_path(&dir.to_string_lossy()))
            .collect();
        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();
    }

    pub fn mode(&self) -> Mode {
        Mode::from_use_notebook(self.use_notebook)
    }
}

/// Request-level overrides accepted on start and restart
///
/// Only these fields can differ from the stored record for a single launch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchOverrides {
    pub port: Option<i64>,
    pub interpreter: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub file_to_open: Option<PathBuf>,
    pub mode: Option<Mode>,
}

/// Everything needed to spawn one notebook server
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchConfig {
    pub port: u16,
    pub interpreter: PathBuf,
    pub working_dir: PathBuf,
    pub mode: Mode,
    pub extra_args: Vec<String>,
    pub env: HashMap<String, String>,
    pub library_dirs: Vec<PathBuf>,
    pub python_path: Vec<PathBuf>,
    pub file_to_open: Option<PathBuf>,
}

impl LaunchConfig {
    /// Merge request overrides onto the stored record
    ///
    /// Pure: no filesystem access. Paths are checked by the launcher.
    pub fn merge(stored: &StoredConfig, overrides: &LaunchOverrides) -> Result<Self> {
        let stored = &stored.expanded();
        let port = validate_port(overrides.port.unwrap_or(i64::from(stored.jupyter_port)))?;

        let interpreter = overrides
            .interpreter
            .clone()
            .unwrap_or_else(|| PathBuf::from(&stored.python_executable));
        let working_dir = overrides
            .working_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&stored.project_dir));

        Ok(Self {
            port,
            interpreter,
            working_dir,
            mode: overrides.mode.unwrap_or_else(|| stored.mode()),
            extra_args: stored.args.clone(),
            env: stored.env.clone(),
            library_dirs: stored.library_dirs.clone(),
            python_path: stored.python_path.clone(),
            file_to_open: overrides.file_to_open.clone(),
        })
    }

    /// Browser URL of the landing page
    pub fn url(&self) -> String {
        format!("http://localhost:{}{}", self.port, self.mode.url_suffix())
    }

    /// Same parameters with a different front-end
    pub fn with_mode(&self, mode: Mode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }
}

fn validate_port(port: i64) -> Result<u16> {
    if !(MIN_PORT..=MAX_PORT).contains(&port) {
        return Err(KeeperError::ConfigValidationError(format!(
            "port must be between {} and {}, got {}",
            MIN_PORT, MAX_PORT, port
        )));
    }
    // In range, so the conversion cannot fail
    u16::try_from(port).map_err(|e| KeeperError::Internal(e.to_string()))
}

/// Resolve an interpreter given either as a path or as a bare name on PATH
pub fn resolve_interpreter(raw: &str) -> Option<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let candidate = expand_path(raw);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return Some(candidate);
    }

    which::which(raw).ok()
}

/// Expand `~` and environment variables in a path
pub fn expand_path(raw: &str) -> PathBuf {
    let expanded = expand_env_in_string(raw.trim());

    if expanded == "~" || expanded.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return Path::new(&home).join(expanded.trim_start_matches('~').trim_start_matches('/'));
        }
    }

    PathBuf::from(expanded)
}

/// Expand `$VAR` and `${VAR}` in a string
///
/// Names are read whole, so `$HOME` never matches inside `$HOMEBREW_PREFIX`.
/// Unset variables are left as written.
fn expand_env_in_string(s: &str) -> String {
    if !s.contains('$') {
        return s.to_string();
    }

    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, token_len) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match std::env::var(name) {
            Ok(value) if !name.is_empty() => result.push_str(&value),
            _ => result.push_str(&rest[pos..pos + 1 + token_len]),
        }
        rest = &after[token_len..];
    }

    result.push_str(rest);
    result
}
