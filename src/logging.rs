//! Tracing subscriber setup

use crate::config::LoggingConfig;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Crate log level for the given settings
pub fn level(config: &LoggingConfig) -> &'static str {
    if config.quiet {
        "off"
    } else if config.verbose {
        "debug"
    } else {
        "info"
    }
}

/// Filter honouring `RUST_LOG`, with the crate level from `config` on top.
/// Quiet mode turns everything off regardless of the environment.
pub fn filter(config: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    if config.quiet {
        return Ok(EnvFilter::new("off"));
    }
    let directive = format!("knockgate={}", level(config)).parse()?;
    Ok(EnvFilter::from_default_env().add_directive(directive))
}

/// Install the global subscriber
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let writer = match config.file {
        Some(ref path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| anyhow::anyhow!("Failed to open log file {}: {}", path, e))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(config)?)
        .with_writer(writer)
        .with_ansi(config.file.is_none());

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
