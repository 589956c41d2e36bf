//! Plain forwarder from a local Unix socket to a TCP `host:port`.
//!
//! This is the gateway side of the setup: the browser endpoint connects to
//! the socket, and each connection is piped to the gateway with no
//! inspection at all.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::{TcpStream, UnixListener, UnixStream};

/// Mode applied to the socket file so any local process may connect.
const SOCKET_MODE: u32 = 0o666;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub socket_path: PathBuf,
    pub gateway_host: String,
    pub gateway_port: u16,
}

pub struct Bridge {
    config: Arc<BridgeConfig>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Replace any stale socket file, bind, and open up its permissions.
    pub fn bind(&self) -> anyhow::Result<UnixListener> {
        let path = &self.config.socket_path;

        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed stale socket"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to remove stale socket {}", path.display()))
            }
        }

        let listener = UnixListener::bind(path)
            .with_context(|| format!("failed to bind {}", path.display()))?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;

        Ok(listener)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: UnixListener) -> anyhow::Result<()> {
        tracing::info!(
            socket = %self.config.socket_path.display(),
            gateway_host = %self.config.gateway_host,
            gateway_port = self.config.gateway_port,
            "bridge listening"
        );

        loop {
            let (client, _) = listener.accept().await?;
            let config = Arc::clone(&self.config);
            tokio::spawn(forward(client, config));
        }
    }
}

async fn forward(mut client: UnixStream, config: Arc<BridgeConfig>) {
    let target = (config.gateway_host.as_str(), config.gateway_port);
    let mut gateway = match TcpStream::connect(target).await {
        Ok(gateway) => gateway,
        Err(err) => {
            tracing::error!(
                host = %config.gateway_host,
                port = config.gateway_port,
                %err,
                "gateway connect failed"
            );
            return;
        }
    };

    match tokio::io::copy_bidirectional(&mut client, &mut gateway).await {
        Ok((to_gateway, to_client)) => {
            tracing::debug!(to_gateway, to_client, "bridge connection finished");
        }
        Err(err) => tracing::debug!(%err, "bridge connection failed"),
    }
}
