//! Gate routes and the backends they unlock
//!
//! The table is built once at startup and shared read-only behind an `Arc`.

use crate::error::ConfigError;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Path served by the robots responder; cannot be used as a gate
pub const ROBOTS_PATH: &str = "/robots.txt";

/// A single `route -> host:port` gate definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateSpec {
    pub route: String,
    pub backend: String,
}

impl GateSpec {
    pub fn new(route: impl Into<String>, backend: impl Into<String>) -> Result<Self, ConfigError> {
        let route = route.into();
        let backend = backend.into();

        if !route.starts_with('/') {
            return Err(ConfigError::RouteNotAbsolute(route));
        }
        if route == ROBOTS_PATH {
            return Err(ConfigError::ReservedRoute(route));
        }
        validate_backend(&backend)?;

        Ok(Self { route, backend })
    }
}

/// Parses `ROUTE:HOST:PORT`, e.g. `/ssh:localhost:22`
impl FromStr for GateSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (route, backend) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::GateSyntax(s.to_string()))?;
        Self::new(route, backend)
    }
}

impl fmt::Display for GateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.route, self.backend)
    }
}

fn validate_backend(backend: &str) -> Result<(), ConfigError> {
    let (host, port) = backend
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::BackendAddress(backend.to_string()))?;

    if host.is_empty() {
        return Err(ConfigError::BackendAddress(backend.to_string()));
    }
    match port.parse::<u16>() {
        Ok(p) if p > 0 => Ok(()),
        _ => Err(ConfigError::BackendAddress(backend.to_string())),
    }
}

/// Static mapping from gate route to backend dial address
#[derive(Debug, Default, Clone)]
pub struct EndpointTable {
    gates: HashMap<String, String>,
}

impl EndpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from specs in order. A repeated route replaces the earlier entry.
    pub fn from_specs<I>(specs: I) -> Self
    where
        I: IntoIterator<Item = GateSpec>,
    {
        let mut table = Self::new();
        for spec in specs {
            table.insert(spec);
        }
        table
    }

    /// Insert a gate, returning the backend it replaced
    pub fn insert(&mut self, spec: GateSpec) -> Option<String> {
        let replaced = self.gates.insert(spec.route.clone(), spec.backend.clone());
        if let Some(ref old) = replaced {
            warn!(
                route = %spec.route,
                previous = %old,
                backend = %spec.backend,
                "Duplicate gate route, last definition wins"
            );
        }
        replaced
    }

    /// Look up the backend for an exact request path
    pub fn resolve(&self, route: &str) -> Option<&str> {
        self.gates.get(route).map(String::as_str)
    }

    /// Configured routes, sorted
    pub fn routes(&self) -> Vec<&str> {
        let mut routes: Vec<&str> = self.gates.keys().map(String::as_str).collect();
        routes.sort_unstable();
        routes
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}
