use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use audit_log::{AuditEntry, AuditSink, Direction};
use http::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UnixStream};

use crate::http_head::{self, HeadError};
use crate::relay::{self, PumpEnd, Taps};

/// Configuration for the auditing relay.
#[derive(Debug)]
pub struct ProxyConfig {
    /// Address to bind the listening socket to.
    pub listen_addr: SocketAddr,
    /// Path of the upstream browser endpoint's Unix socket.
    pub upstream_socket: PathBuf,
    /// Per-frame payload limit for the decoders.
    pub max_frame_len: usize,
    /// Where decoded messages and lifecycle events are recorded.
    pub audit: AuditSink,
}

/// The relay server.
///
/// Accepts client connections, opens a fresh upstream connection for each,
/// and relays bytes in both directions. Every request head on a connection
/// is audited; once a request upgrades, its frames are audited one by one.
/// Plain HTTP bodies are only forwarded.
pub struct Proxy {
    config: Arc<ProxyConfig>,
}

impl Proxy {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Bind `listen_addr` and serve forever.
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener. Each connection is
    /// handled in its own task.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        tracing::info!(
            addr = %listener.local_addr()?,
            upstream = %self.config.upstream_socket.display(),
            "relay listening"
        );

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let config = Arc::clone(&self.config);

            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, remote_addr, config).await {
                    tracing::debug!(%remote_addr, %err, "connection handler error");
                }
            });
        }
    }
}

/// Handle a single client connection from its request head to teardown.
async fn handle_connection(
    mut stream: TcpStream,
    remote_addr: SocketAddr,
    config: Arc<ProxyConfig>,
) -> anyhow::Result<()> {
    let connection_id = uuid::Uuid::new_v4();

    let (head, rest) = match http_head::read_request_head(&mut stream).await {
        Ok(parsed) => parsed,
        Err(HeadError::Closed) => return Ok(()),
        Err(err) => {
            tracing::warn!(%connection_id, %remote_addr, %err, "rejecting malformed request");
            stream
                .write_all(&http_head::simple_response(StatusCode::BAD_REQUEST))
                .await?;
            return Ok(());
        }
    };

    let taps = match Taps::after_request(&head, config.max_frame_len) {
        Ok(taps) => taps,
        Err(err) => {
            tracing::warn!(%connection_id, %remote_addr, %err, "rejecting unframeable request");
            stream
                .write_all(&http_head::simple_response(StatusCode::BAD_REQUEST))
                .await?;
            return Ok(());
        }
    };

    let upgrade = head.is_websocket_upgrade();
    if upgrade {
        tracing::info!(%connection_id, %remote_addr, target = %head.target, "websocket upgrade");
    } else {
        tracing::debug!(%connection_id, method = %head.method, target = %head.target, "http request");
    }
    config
        .audit
        .record(head.audit_entry(Direction::ExtensionToGateway));

    let mut upstream = match UnixStream::connect(&config.upstream_socket).await {
        Ok(upstream) => upstream,
        Err(err) => {
            tracing::error!(
                %connection_id,
                upstream = %config.upstream_socket.display(),
                %err,
                "upstream connect failed"
            );
            config.audit.record(AuditEntry::close(
                Direction::ExtensionToGateway,
                format!("upstream connect failed: {err}"),
            ));
            // An upgrading client gets no response; the socket just closes.
            if !upgrade {
                stream
                    .write_all(&http_head::simple_response(StatusCode::BAD_GATEWAY))
                    .await?;
            }
            return Ok(());
        }
    };

    if let Err(err) = upstream.write_all(head.raw()).await {
        // A failed write counts as the upstream side going away.
        let end = PumpEnd::WriteFailed(err);
        tracing::warn!(%connection_id, %remote_addr, reason = %end, "upstream rejected request head");
        config
            .audit
            .record(AuditEntry::close(Direction::GatewayToExtension, end.to_string()));
        return Ok(());
    }

    let closed = relay::relay(stream, upstream, &rest, taps, &config.audit).await;

    tracing::info!(
        %connection_id,
        %remote_addr,
        initiator = %closed.initiator,
        reason = %closed.end,
        "connection closed"
    );
    Ok(())
}
