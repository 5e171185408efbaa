//! geofetch-server: HTTP forwarding gateway.
//!
//! Accepts `/fetch/<base64url>` and legacy `/<url>` requests, applies
//! domain, API-key and rate-limit checks, and relays the target's response,
//! optionally through a second-hop proxy.

mod access;
mod config;
mod forwarder;
mod server;

use clap::Parser;
use config::GatewayConfig;
use forwarder::HttpForwarder;
use server::GatewayServer;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// How often the egress probe is refreshed for `/health`.
const EGRESS_PROBE_INTERVAL: Duration = Duration::from_secs(300);

/// geofetch-server — HTTP forwarding gateway
#[derive(Parser, Debug)]
#[command(name = "geofetch-server", version, about = "HTTP forwarding gateway")]
struct Cli {
    /// Listen port (overrides PORT and the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address (overrides BIND and the config file)
    #[arg(long)]
    bind: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.geofetch/gateway.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting geofetch-server");

    // Config is read once here and never again.
    let env: HashMap<String, String> = std::env::vars().collect();
    let config_path = PathBuf::from(&cli.config);
    let mut config = match GatewayConfig::load(Some(&config_path), &env, cli.port) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }

    let forwarder = match HttpForwarder::from_config(&config) {
        Ok(f) => f,
        Err(e) => {
            error!(error = %e, "failed to create forwarder");
            std::process::exit(1);
        }
    };

    let egress = forwarder.egress().label();
    let gateway = match GatewayServer::new(&config, Arc::new(forwarder)) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create server");
            std::process::exit(1);
        }
    };

    let access = &gateway.state().access;
    info!(
        egress,
        auth = access.auth_enabled(),
        open_domains = access.domains().is_open(),
        allowed = ?config.allowed_domains,
        blocked = ?config.blocked_domains,
        rate_limit = config.rate_limit,
        window_ms = config.rate_limit_window.as_millis() as u64,
        timeout_secs = config.timeout.as_secs(),
        legacy_path = config.enable_legacy_path,
        fetch_path = config.enable_fetch_path,
        cors = config.enable_cors,
        "gateway configured"
    );

    // Periodically drop idle rate-limit entries.
    if let Some(limiter) = gateway.state().access.rate_limiter().cloned() {
        let period = limiter.window().max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                limiter.gc();
                debug!(clients = limiter.tracked_clients(), "rate limiter gc");
            }
        });
    }

    gateway.start_egress_probe(EGRESS_PROBE_INTERVAL);

    let addr = config.listen_addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(%addr, "listening");

    if let Err(e) = gateway.run(listener, shutdown_signal()).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("geofetch-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("received shutdown signal");
}
