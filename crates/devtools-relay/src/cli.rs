use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "devtools-relay",
    version,
    about = "Auditing relay for browser remote-debugging traffic"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "RELAY_CONFIG", default_value = "relay.yaml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Relay TCP clients to the browser socket, auditing WebSocket traffic
    Relay(RelayArgs),
    /// Expose a local socket that pipes every connection to the gateway
    Bridge(BridgeArgs),
}

#[derive(Args, Debug)]
pub struct RelayArgs {
    /// TCP port to listen on (all interfaces)
    #[arg(long, env = "RELAY_PORT")]
    pub port: Option<u16>,

    /// Unix socket of the browser endpoint
    #[arg(long, env = "BROWSER_SOCKET")]
    pub upstream_socket: Option<PathBuf>,

    /// Audit log file (JSON lines, append-only)
    #[arg(long, env = "RELAY_LOG")]
    pub audit_log: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct BridgeArgs {
    /// Unix socket path to create
    #[arg(long, env = "BROWSER_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Gateway host to forward to
    #[arg(long, env = "GATEWAY_HOST")]
    pub gateway_host: Option<String>,

    /// Gateway port to forward to
    #[arg(long, env = "GATEWAY_PORT")]
    pub gateway_port: Option<u16>,
}
