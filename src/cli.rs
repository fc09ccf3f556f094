//! Command line interface
//!
//! Every flag is optional and overrides the matching config file value.

use crate::config::{Config, GatePolicy};
use crate::endpoints::GateSpec;
use crate::error::ConfigError;
use clap::Parser;
use std::path::PathBuf;

/// knockgate - open a TCP gate to a backend after an HTTP knock
#[derive(Parser, Debug, Default)]
#[command(name = "knockgate", version, about = "HTTP-gated TCP access broker")]
pub struct Cli {
    /// Config file path (TOML)
    #[arg(short, long, env = "KNOCKGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Local address to listen on for knocks
    #[arg(short, long, env = "KNOCKGATE_BIND")]
    pub bind: Option<String>,

    /// TLS certificate (PEM)
    #[arg(long = "crt", env = "KNOCKGATE_TLS_CERT")]
    pub tls_cert: Option<String>,

    /// TLS private key (PEM)
    #[arg(long = "key", env = "KNOCKGATE_TLS_KEY")]
    pub tls_key: Option<String>,

    /// Gate in format ROUTE:HOST:PORT (e.g. /ssh:localhost:22), repeatable
    #[arg(short = 'a', long = "gate", value_name = "ROUTE:HOST:PORT")]
    pub gates: Vec<GateSpec>,

    /// Milliseconds an opened gate waits for a connection
    #[arg(short = 't', long = "timeout-ms", env = "KNOCKGATE_TIMEOUT_MS")]
    pub accept_timeout_ms: Option<u64>,

    /// Milliseconds to wait for a backend to accept
    #[arg(long, env = "KNOCKGATE_DIAL_TIMEOUT_MS")]
    pub dial_timeout_ms: Option<u64>,

    /// Do not print anything
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbose mode
    #[arg(short, long)]
    pub verbose: bool,

    /// Log file (default stdout)
    #[arg(short = 'f', long = "log-file", env = "KNOCKGATE_LOG_FILE")]
    pub log_file: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    pub json_logs: bool,

    /// Answer unmatched routes with a plain 404 instead of the tarpit
    #[arg(long)]
    pub no_tarpit: bool,

    /// Close each gate after its first verified connection
    #[arg(long)]
    pub single_use: bool,
}

impl Cli {
    /// Load the config file (if any) and apply command line overrides
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let config = match self.config {
            Some(ref path) => Config::load(path)?,
            None => Config::default(),
        };
        Ok(self.apply(config))
    }

    /// Apply command line overrides on top of `config`
    pub fn apply(self, mut config: Config) -> Config {
        if let Some(bind) = self.bind {
            config.server.bind = bind;
        }
        if let Some(cert) = self.tls_cert {
            config.server.tls_cert = Some(cert);
        }
        if let Some(key) = self.tls_key {
            config.server.tls_key = Some(key);
        }
        if let Some(ms) = self.accept_timeout_ms {
            config.server.accept_timeout_ms = ms;
        }
        if let Some(ms) = self.dial_timeout_ms {
            config.server.dial_timeout_ms = ms;
        }
        if self.no_tarpit {
            config.server.tarpit = false;
        }
        if self.single_use {
            config.server.gate_policy = GatePolicy::SingleUse;
        }

        if self.quiet {
            config.logging.quiet = true;
        }
        if self.verbose {
            config.logging.verbose = true;
        }
        if let Some(file) = self.log_file {
            config.logging.file = Some(file);
        }
        if self.json_logs {
            config.logging.json = true;
        }

        config.extra_gates.extend(self.gates);
        config
    }
}
