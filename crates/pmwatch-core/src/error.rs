//! Error types.

use thiserror::Error;

/// Why a single rule judged a watcher unhealthy.
///
/// The `Display` text is the reason carried by `check` events.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("Timed out")]
    TimedOut,

    #[error("Status Code = {0}")]
    Status(u16),

    #[error("{0}")]
    Transport(String),

    #[error("{}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("{0}")]
    Custom(String),
}

/// Errors reported by the process manager collaborator.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("process manager unavailable: {0}")]
    Unavailable(String),

    #[error("app not found: {0}")]
    NotFound(String),

    #[error("command `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("malformed process manager output: {0}")]
    Malformed(String),
}

/// Errors from building the HTTP transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("tls configuration error: {0}")]
    Tls(#[from] rustls::Error),
}

/// Errors from registering watchers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WatchError {
    #[error("a watcher needs at least one app")]
    NoApps,

    #[error("app name must not be blank")]
    BlankApp,
}

/// Errors from loading operator configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Unknown watcher action: {0}")]
    UnknownAction(String),

    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Watch(#[from] WatchError),
}

pub type ManagerResult<T> = Result<T, ManagerError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
