//! Error types for the gate
//!
//! Nothing in here is ever rendered to an HTTP or TCP client. Per-listener and
//! per-relay errors are logged where they happen; only [`ConfigError`] is fatal.

use std::io;
use thiserror::Error;

/// Errors raised while opening gates and relaying traffic
#[derive(Debug, Error)]
pub enum GateError {
    /// Could not open an ephemeral listener for a knock
    #[error("failed to bind ephemeral listener: {0}")]
    Bind(#[source] io::Error),

    /// Socket-level accept failure other than the accept deadline
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// Backend refused or could not be reached
    #[error("failed to dial backend {backend}: {source}")]
    Dial {
        backend: String,
        #[source]
        source: io::Error,
    },

    /// Backend did not answer within the dial timeout
    #[error("timed out dialing backend {backend}")]
    DialTimeout { backend: String },

    /// Either copy direction failed mid-relay
    #[error("relay I/O error: {0}")]
    Relay(#[source] io::Error),
}

/// Startup configuration problems
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid gate '{0}': expected ROUTE:HOST:PORT")]
    GateSyntax(String),

    #[error("invalid gate route '{0}': must start with '/'")]
    RouteNotAbsolute(String),

    #[error("gate route '{0}' is reserved")]
    ReservedRoute(String),

    #[error("invalid backend address '{0}': expected HOST:PORT")]
    BackendAddress(String),

    #[error("invalid bind address '{0}'")]
    BindAddress(String),

    #[error("TLS certificate and key must be configured together")]
    IncompleteTls,

    #[error("'{0}' must be greater than 0")]
    ZeroDuration(&'static str),

    #[error("no gates configured")]
    NoGates,

    #[error("Configuration errors:\n  - {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n  - "))]
    Multiple(Vec<ConfigError>),
}
