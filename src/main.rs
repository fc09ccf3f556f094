use clap::Parser;
use knockgate::cli::Cli;
use knockgate::config::Config;
use knockgate::endpoints::EndpointTable;
use knockgate::gateway::GatewayServer;
use knockgate::listener::{ListenerManager, ListenerSettings};
use knockgate::{logging, tls, PKG_NAME, VERSION};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone();
    let config = cli.into_config()?;

    logging::init(&config.logging)?;

    if let Some(ref path) = config_path {
        info!(path = %path.display(), "Configuration loaded");
    }

    config.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    let endpoints = Arc::new(config.endpoint_table()?);
    let listen_addr = config.server.listen_addr()?;

    print_startup_banner(&config, &endpoints);

    let tls_acceptor = match (&config.server.tls_cert, &config.server.tls_key) {
        (Some(cert), Some(key)) => {
            let acceptor = tls::load_acceptor(cert, key).map_err(|e| {
                error!(cert = %cert, key = %key, error = %e, "Failed to load TLS certificate");
                e
            })?;
            info!(cert = %cert, key = %key, "TLS enabled with provided certificates");
            Some(acceptor)
        }
        _ => {
            info!("Cert and key files are not provided: TLS is disabled");
            None
        }
    };

    let listeners = ListenerManager::new(ListenerSettings {
        accept_timeout: config.server.accept_timeout(),
        dial_timeout: config.server.dial_timeout(),
        policy: config.server.gate_policy,
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut gateway = GatewayServer::new(
        Arc::clone(&endpoints),
        Arc::clone(&listeners),
        shutdown_rx,
    );
    if config.server.tarpit {
        gateway = gateway.with_tarpit(config.server.tarpit_interval());
    }
    if let Some(acceptor) = tls_acceptor {
        gateway = gateway.with_tls(acceptor);
    }

    // Bind here so a taken port stops startup instead of a background task
    let listener = TcpListener::bind(listen_addr).await.map_err(|e| {
        error!(addr = %listen_addr, error = %e, "Failed to bind gateway");
        anyhow::anyhow!("Failed to bind {}: {}", listen_addr, e)
    })?;

    let mut gateway_handle = tokio::spawn(async move {
        if let Err(e) = gateway.serve(listener).await {
            error!(error = %e, "Gateway server error");
        }
    });

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = &mut gateway_handle => {
            warn!("Gateway stopped unexpectedly");
        }
    }

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    info!(open = listeners.len(), "Closing open gates...");
    listeners.close_all();

    if !gateway_handle.is_finished() {
        let _ = tokio::time::timeout(Duration::from_secs(5), gateway_handle).await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

fn print_startup_banner(config: &Config, endpoints: &EndpointTable) {
    info!(name = PKG_NAME, version = VERSION, "Starting access gateway");
    info!(
        bind = %config.server.bind,
        tls = config.server.tls_enabled(),
        accept_timeout_ms = config.server.accept_timeout_ms,
        dial_timeout_ms = config.server.dial_timeout_ms,
        policy = ?config.server.gate_policy,
        "Server configuration"
    );
    info!(
        enabled = config.server.tarpit,
        interval_ms = config.server.tarpit_interval_ms,
        "Tarpit settings"
    );
    for route in endpoints.routes() {
        if let Some(backend) = endpoints.resolve(route) {
            info!(route, backend, "Gate configured");
        }
    }
}
