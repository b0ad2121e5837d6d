use thiserror::Error;

/// Why a launch attempt did not produce a running notebook server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchErrorKind {
    InvalidInterpreter,
    InvalidWorkingDir,
    SpawnFailed,
    EarlyCrash,
}

impl LaunchErrorKind {
    /// Configuration problems are not process crashes and are never retried
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            LaunchErrorKind::InvalidInterpreter | LaunchErrorKind::InvalidWorkingDir
        )
    }
}

impl std::fmt::Display for LaunchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchErrorKind::InvalidInterpreter => write!(f, "invalid interpreter"),
            LaunchErrorKind::InvalidWorkingDir => write!(f, "invalid working directory"),
            LaunchErrorKind::SpawnFailed => write!(f, "spawn failed"),
            LaunchErrorKind::EarlyCrash => write!(f, "early crash"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct LaunchError {
    pub kind: LaunchErrorKind,
    pub message: String,
}

impl LaunchError {
    pub fn new(kind: LaunchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Main error type for labkeeper
#[derive(Debug, Error)]
pub enum KeeperError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // Supervision errors
    #[error("Launch failed ({0})")]
    Launch(#[from] LaunchError),

    #[error("Notebook server already running on port {0}")]
    AlreadyRunning(u16),

    #[error("Another lifecycle operation is in progress: {0}")]
    Busy(String),

    #[error("Failed to stop notebook server: {0}")]
    StopError(String),

    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // External service errors
    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    // Client errors
    #[error("Failed to connect to service: {0}")]
    ConnectionError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl KeeperError {
    /// True for errors caused by bad input rather than a failing process
    pub fn is_configuration(&self) -> bool {
        match self {
            KeeperError::ConfigError(_)
            | KeeperError::InvalidConfig(_)
            | KeeperError::MissingConfigField(_)
            | KeeperError::ConfigValidationError(_) => true,
            KeeperError::Launch(e) => e.kind.is_configuration(),
            _ => false,
        }
    }
}

/// Result type alias for labkeeper operations
pub type Result<T> = std::result::Result<T, KeeperError>;
