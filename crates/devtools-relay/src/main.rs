mod cli;
mod config;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use audit_log::AuditSink;
use script_alert::{Detector, RuleSet, ScriptAlerter, StderrReporter};
use ws_tap::{Bridge, BridgeConfig, Proxy, ProxyConfig};

use crate::cli::{BridgeArgs, Cli, Command, RelayArgs};
use crate::config::Config;

/// How long shutdown waits for the audit writer to drain.
const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Parse CLI args and load config.
    let cli = Cli::parse();
    let loaded = config::load(&cli.config)?;
    let config_found = loaded.is_some();
    let mut cfg = loaded.unwrap_or_default();

    // 2. Merge environment / CLI overrides.
    match &cli.command {
        Command::Relay(args) => apply_relay_overrides(&mut cfg, args),
        Command::Bridge(args) => apply_bridge_overrides(&mut cfg, args),
    }

    // 3. Init tracing-subscriber with JSON format. Alerts go to stderr,
    //    so keep this on stdout.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    if !config_found {
        warn!(
            path = %cli.config.display(),
            "configuration file not found; using defaults"
        );
    }

    match cli.command {
        Command::Relay(_) => run_relay(cfg).await,
        Command::Bridge(_) => run_bridge(cfg).await,
    }
}

fn apply_relay_overrides(cfg: &mut Config, args: &RelayArgs) {
    if let Some(port) = args.port {
        cfg.relay.port = port;
    }
    if let Some(ref socket) = args.upstream_socket {
        cfg.relay.upstream_socket = socket.clone();
    }
    if let Some(ref path) = args.audit_log {
        cfg.logging.audit_log_path = path.clone();
    }
}

fn apply_bridge_overrides(cfg: &mut Config, args: &BridgeArgs) {
    if let Some(ref socket) = args.socket {
        cfg.bridge.socket_path = socket.clone();
    }
    if let Some(ref host) = args.gateway_host {
        cfg.bridge.gateway_host = host.clone();
    }
    if let Some(port) = args.gateway_port {
        cfg.bridge.gateway_port = port;
    }
}

async fn run_relay(cfg: Config) -> Result<()> {
    let rules = RuleSet::builtin().with_rules(cfg.alerts.extra_methods);
    info!(rules = rules.len(), "script alert rules loaded");
    let alerter = ScriptAlerter::new(Detector::new(rules), Arc::new(StderrReporter));

    let (audit, audit_handle) = AuditSink::start(&cfg.logging.audit_log_path, alerter)
        .await
        .context("failed to start audit logger")?;

    let listen_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, cfg.relay.port));
    info!(
        listen = %listen_addr,
        upstream = %cfg.relay.upstream_socket.display(),
        audit_log = %cfg.logging.audit_log_path.display(),
        "devtools-relay starting"
    );

    let proxy = Proxy::new(ProxyConfig {
        listen_addr,
        upstream_socket: cfg.relay.upstream_socket,
        max_frame_len: cfg.relay.max_frame_len,
        audit,
    });

    let result = tokio::select! {
        r = proxy.run() => r.context("relay listener failed"),
        _ = shutdown_signal() => Ok(()),
    };

    info!("devtools-relay shutting down");

    // Open connections still hold sink handles, so the writer may not exit;
    // waiting still gives it time to append what is already queued.
    drop(proxy);
    if tokio::time::timeout(AUDIT_DRAIN_TIMEOUT, audit_handle).await.is_err() {
        warn!("audit writer still busy at shutdown");
    }

    result
}

async fn run_bridge(cfg: Config) -> Result<()> {
    let socket_path = cfg.bridge.socket_path.clone();
    let bridge = Bridge::new(BridgeConfig {
        socket_path: cfg.bridge.socket_path,
        gateway_host: cfg.bridge.gateway_host,
        gateway_port: cfg.bridge.gateway_port,
    });

    let result = tokio::select! {
        r = bridge.run() => r,
        _ = shutdown_signal() => Ok(()),
    };

    info!("bridge shutting down");
    if let Err(err) = std::fs::remove_file(&socket_path) {
        warn!(path = %socket_path.display(), %err, "failed to remove socket file");
    }

    result
}

/// Resolve on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT (ctrl-c)"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        Err(err) => {
            warn!(%err, "failed to register SIGTERM handler");
            let _ = ctrl_c.await;
            info!("received SIGINT (ctrl-c)");
        }
    }
}
