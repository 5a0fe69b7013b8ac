use std::time::Duration;

use thiserror::Error;

/// llmdock error types, grouped by the layer that raised them
#[derive(Error, Debug)]
pub enum DockError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Inference engine error: {0}")]
    Inference(#[from] InferenceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found at path: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },

    #[error("Host port overflow: base port {base} + model id {model_id}")]
    PortOverflow { base: u16, model_id: u32 },
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Container runtime unavailable: {reason}")]
    ConnectionUnavailable { reason: String },

    #[error("{resource} not found: {name}")]
    NotFound { resource: Resource, name: String },

    #[error("{resource} already exists: {name}")]
    Conflict { resource: Resource, name: String },

    #[error("Daemon rejected {operation}: {message}")]
    Daemon { operation: String, message: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Container {name} left incomplete at {stage}: {reason}")]
    PartialFailure {
        name: String,
        stage: String,
        reason: String,
    },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("HTTP error talking to inference engine: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Inference engine returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed inference response: {reason}")]
    Malformed { reason: String },
}

/// Daemon object kinds named in runtime errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Container,
    Image,
    Network,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Resource::Container => "Container",
            Resource::Image => "Image",
            Resource::Network => "Network",
        };
        f.write_str(name)
    }
}

/// Coarse failure classes kept alongside sentinel results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConnectionUnavailable,
    NotFound,
    InvalidRequest,
    Conflict,
    DaemonError,
    Timeout,
    PartialFailure,
    Internal,
}

impl ErrorKind {
    /// Status code the web layer answers with for this kind of failure.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidRequest => 400,
            ErrorKind::Timeout => 504,
            ErrorKind::ConnectionUnavailable
            | ErrorKind::Conflict
            | ErrorKind::DaemonError
            | ErrorKind::PartialFailure
            | ErrorKind::Internal => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ConnectionUnavailable => "connection_unavailable",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Conflict => "conflict",
            ErrorKind::DaemonError => "daemon_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::PartialFailure => "partial_failure",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::ConnectionUnavailable { .. } => ErrorKind::ConnectionUnavailable,
            RuntimeError::NotFound { .. } => ErrorKind::NotFound,
            RuntimeError::Conflict { .. } => ErrorKind::Conflict,
            RuntimeError::Daemon { .. } => ErrorKind::DaemonError,
            RuntimeError::Timeout { .. } => ErrorKind::Timeout,
            RuntimeError::PartialFailure { .. } => ErrorKind::PartialFailure,
            RuntimeError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, RuntimeError::Conflict { .. })
    }

    /// Failures worth another attempt for idempotent reads.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RuntimeError::Timeout { .. } | RuntimeError::Daemon { .. }
        )
    }

    pub fn not_found(resource: Resource, name: impl Into<String>) -> Self {
        RuntimeError::NotFound {
            resource,
            name: name.into(),
        }
    }

    pub fn daemon(operation: impl Into<String>, message: impl Into<String>) -> Self {
        RuntimeError::Daemon {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl DockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DockError::Runtime(err) => err.kind(),
            DockError::Config(ConfigError::PortOverflow { .. }) => ErrorKind::InvalidRequest,
            DockError::Inference(InferenceError::Http(err)) if err.is_timeout() => {
                ErrorKind::Timeout
            }
            DockError::Inference(InferenceError::Http(err)) if err.is_connect() => {
                ErrorKind::ConnectionUnavailable
            }
            _ => ErrorKind::Internal,
        }
    }
}

/// Convenience type alias for llmdock results
pub type Result<T, E = DockError> = std::result::Result<T, E>;

/// Result alias used across the runtime seam
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
