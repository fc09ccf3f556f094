use crate::endpoints::{EndpointTable, GateSpec};
use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

/// Global configuration for the gate
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Gate routes: path -> backend `host:port`
    #[serde(default)]
    pub gates: HashMap<String, String>,

    /// Gates given on the command line, applied after `gates`
    #[serde(skip)]
    pub extra_gates: Vec<GateSpec>,
}

/// What happens to a listener once a verified connection is relayed
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum GatePolicy {
    /// Keep listening while any relay is active; close when idle past the timeout
    #[default]
    #[serde(rename = "multi-use", alias = "multi_use", alias = "multi")]
    MultiUse,
    /// Close the listener right after the first verified connection
    #[serde(rename = "single-use", alias = "single_use", alias = "single")]
    SingleUse,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// HTTP(S) bind address (default: 0.0.0.0:80)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Path to TLS certificate file (PEM format)
    pub tls_cert: Option<String>,

    /// Path to TLS private key file (PEM format)
    pub tls_key: Option<String>,

    /// How long an ephemeral listener waits for a connection (default: 2000)
    #[serde(default = "default_accept_timeout")]
    pub accept_timeout_ms: u64,

    /// How long a relay waits for the backend to accept (default: 10000)
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_ms: u64,

    /// Feed unmatched routes into the tarpit (default: true)
    #[serde(default = "default_tarpit")]
    pub tarpit: bool,

    /// Delay between tarpit writes in milliseconds (default: 1000)
    #[serde(default = "default_tarpit_interval")]
    pub tarpit_interval_ms: u64,

    /// Listener reuse policy (default: multi-use)
    #[serde(default)]
    pub gate_policy: GatePolicy,
}

impl ServerConfig {
    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn tarpit_interval(&self) -> Duration {
        Duration::from_millis(self.tarpit_interval_ms)
    }

    /// Resolve the address to listen on.
    ///
    /// Accepts `host:port` (host names are resolved, first address wins) or
    /// the `:port` shorthand. With TLS enabled the plain HTTP default port 80
    /// becomes 443.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let bind = if self.bind.starts_with(':') {
            format!("0.0.0.0{}", self.bind)
        } else {
            self.bind.clone()
        };

        let mut addr = bind
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ConfigError::BindAddress(self.bind.clone()))?;

        if self.tls_enabled() && addr.port() == 80 {
            addr.set_port(443);
        }
        Ok(addr)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            tls_cert: None,
            tls_key: None,
            accept_timeout_ms: default_accept_timeout(),
            dial_timeout_ms: default_dial_timeout(),
            tarpit: default_tarpit(),
            tarpit_interval_ms: default_tarpit_interval(),
            gate_policy: GatePolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Suppress all output
    #[serde(default)]
    pub quiet: bool,

    /// Enable debug events
    #[serde(default)]
    pub verbose: bool,

    /// Append log lines to this file instead of stdout
    pub file: Option<String>,

    /// Emit JSON lines
    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:80".to_string()
}

fn default_accept_timeout() -> u64 {
    2000
}

fn default_dial_timeout() -> u64 {
    10_000
}

fn default_tarpit() -> bool {
    true
}

fn default_tarpit_interval() -> u64 {
    1000
}

impl Config {
    /// Read and parse a TOML config file. Validation happens after command
    /// line overrides are merged, see [`Config::validate`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// All gates in application order: file gates sorted by route, then
    /// command line gates as given.
    pub fn gate_specs(&self) -> Result<Vec<GateSpec>, ConfigError> {
        let mut file_gates: Vec<(&String, &String)> = self.gates.iter().collect();
        file_gates.sort_unstable();

        let mut specs = Vec::with_capacity(self.gates.len() + self.extra_gates.len());
        for (route, backend) in file_gates {
            specs.push(GateSpec::new(route.as_str(), backend.as_str())?);
        }
        specs.extend(self.extra_gates.iter().cloned());
        Ok(specs)
    }

    pub fn endpoint_table(&self) -> Result<EndpointTable, ConfigError> {
        Ok(EndpointTable::from_specs(self.gate_specs()?))
    }

    /// Validate all configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if let Err(e) = self.server.listen_addr() {
            errors.push(e);
        }
        if self.server.tls_cert.is_some() != self.server.tls_key.is_some() {
            errors.push(ConfigError::IncompleteTls);
        }
        if self.server.accept_timeout_ms == 0 {
            errors.push(ConfigError::ZeroDuration("accept_timeout_ms"));
        }
        if self.server.dial_timeout_ms == 0 {
            errors.push(ConfigError::ZeroDuration("dial_timeout_ms"));
        }
        if self.server.tarpit && self.server.tarpit_interval_ms == 0 {
            errors.push(ConfigError::ZeroDuration("tarpit_interval_ms"));
        }

        let mut routes: Vec<&String> = self.gates.keys().collect();
        routes.sort_unstable();
        for route in routes {
            if let Err(e) = GateSpec::new(route.as_str(), self.gates[route].as_str()) {
                errors.push(e);
            }
        }
        if self.gates.is_empty() && self.extra_gates.is_empty() {
            errors.push(ConfigError::NoGates);
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::Multiple(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
bind = "127.0.0.1:8080"
accept_timeout_ms = 5000
tarpit = false
gate_policy = "single-use"

[logging]
verbose = true
file = "/tmp/knockgate.log"

[gates]
"/ssh" = "127.0.0.1:22"
"/db" = "10.0.0.5:5432"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.server.accept_timeout(), Duration::from_secs(5));
        assert!(!config.server.tarpit);
        assert_eq!(config.server.gate_policy, GatePolicy::SingleUse);
        assert!(config.logging.verbose);
        assert_eq!(config.logging.file.as_deref(), Some("/tmp/knockgate.log"));
        assert_eq!(config.gates.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind, "0.0.0.0:80");
        assert_eq!(config.accept_timeout(), Duration::from_secs(2));
        assert_eq!(config.dial_timeout(), Duration::from_secs(10));
        assert!(config.tarpit);
        assert_eq!(config.tarpit_interval(), Duration::from_secs(1));
        assert_eq!(config.gate_policy, GatePolicy::MultiUse);
        assert!(!config.tls_enabled());
    }

    #[test]
    fn test_empty_config_has_defaults_but_is_invalid() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:80");
        assert!(!config.logging.quiet);
        assert!(config.gates.is_empty());
        assert!(matches!(config.validate(), Err(ConfigError::NoGates)));
    }

    #[test]
    fn test_gate_policy_aliases() {
        for (raw, expected) in [
            ("multi-use", GatePolicy::MultiUse),
            ("multi_use", GatePolicy::MultiUse),
            ("single", GatePolicy::SingleUse),
            ("single_use", GatePolicy::SingleUse),
        ] {
            let toml = format!("gate_policy = \"{}\"", raw);
            let server: ServerConfig = toml::from_str(&toml).unwrap();
            assert_eq!(server.gate_policy, expected, "policy {}", raw);
        }
    }

    #[test]
    fn test_listen_addr_plain_http() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr().unwrap(), "0.0.0.0:80".parse().unwrap());
    }

    #[test]
    fn test_listen_addr_port_shorthand() {
        let config = ServerConfig {
            bind: ":8080".to_string(),
            ..ServerConfig::default()
        };
        assert_eq!(config.listen_addr().unwrap(), "0.0.0.0:8080".parse().unwrap());
    }

    #[test]
    fn test_listen_addr_tls_moves_default_port() {
        let config = ServerConfig {
            tls_cert: Some("cert.pem".to_string()),
            tls_key: Some("key.pem".to_string()),
            ..ServerConfig::default()
        };
        assert_eq!(config.listen_addr().unwrap(), "0.0.0.0:443".parse().unwrap());

        let config = ServerConfig {
            bind: "127.0.0.1:8443".to_string(),
            ..config
        };
        assert_eq!(config.listen_addr().unwrap(), "127.0.0.1:8443".parse().unwrap());
    }

    #[test]
    fn test_listen_addr_resolves_host_name() {
        let mut config = ServerConfig {
            bind: "localhost:8080".to_string(),
            ..ServerConfig::default()
        };
        let addr = config.listen_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 8080);

        config.bind = "localhost:80".to_string();
        config.tls_cert = Some("cert.pem".to_string());
        config.tls_key = Some("key.pem".to_string());
        assert_eq!(config.listen_addr().unwrap().port(), 443);
    }

    #[test]
    fn test_listen_addr_invalid() {
        let config = ServerConfig {
            bind: "not-an-address".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(config.listen_addr(), Err(ConfigError::BindAddress(_))));
    }

    #[test]
    fn test_validate_incomplete_tls() {
        let toml = r#"
[server]
tls_cert = "cert.pem"

[gates]
"/ssh" = "127.0.0.1:22"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::IncompleteTls)));
    }

    #[test]
    fn test_validate_multiple_errors() {
        let toml = r#"
[server]
accept_timeout_ms = 0

[gates]
"ssh" = "127.0.0.1:22"
"/db" = "nope"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("'accept_timeout_ms' must be greater than 0"));
        assert!(err.contains("must start with '/'"));
        assert!(err.contains("invalid backend address 'nope'"));
    }

    #[test]
    fn test_extra_gates_satisfy_validation() {
        let mut config = Config::default();
        config.extra_gates.push("/ssh:127.0.0.1:22".parse().unwrap());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_command_line_gates_override_file_gates() {
        let toml = r#"
[gates]
"/ssh" = "127.0.0.1:22"
"/vnc" = "127.0.0.1:5900"
"#;
        let mut config: Config = toml::from_str(toml).unwrap();
        config.extra_gates.push("/ssh:127.0.0.1:2222".parse().unwrap());

        let specs = config.gate_specs().unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].route, "/ssh");
        assert_eq!(specs[1].route, "/vnc");

        let table = config.endpoint_table().unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve("/ssh"), Some("127.0.0.1:2222"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
bind = "127.0.0.1:9000"

[gates]
"/ssh" = "127.0.0.1:22"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert_eq!(config.gates.get("/ssh").map(String::as_str), Some("127.0.0.1:22"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/knockgate.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nbind = ").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
