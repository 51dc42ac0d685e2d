//! Transport handle: the single physical connection a session runs on.

use std::time::Duration;

use tonic::transport::{Channel, ClientTlsConfig, Endpoint as TonicEndpoint};

use crate::endpoint::Endpoint;
use crate::error::Result;

/// Maximum inbound message size (64 MiB).
///
/// Bounds what a misbehaving server can make the client buffer for a single
/// reply or log entry.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// gRPC channel configuration for connection reliability.
///
/// Keep-alive pings run even while idle so a dead peer is noticed at the
/// HTTP/2 layer between heartbeats.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Connection timeout (how long to wait for initial connection)
    pub connect_timeout: Duration,
    /// HTTP/2 keepalive interval (how often to send keepalive pings)
    pub keepalive_interval: Duration,
    /// Keepalive timeout (how long to wait for keepalive ack)
    pub keepalive_timeout: Duration,
    /// Whether to send keepalive pings even when idle
    pub keepalive_while_idle: bool,
    /// Maximum decoded size of any inbound message
    pub max_message_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(10),
            keepalive_timeout: Duration::from_secs(5),
            keepalive_while_idle: true,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

/// Long-lived connection to one endpoint.
///
/// Owns no business logic. Clients built from [`Transport::channel`] share
/// the same HTTP/2 connection. [`Transport::teardown`] consumes the handle,
/// so a torn-down transport cannot be reused.
#[derive(Debug)]
pub struct Transport {
    endpoint: Endpoint,
    channel: Channel,
    max_message_size: usize,
}

impl Transport {
    /// Connect to `endpoint`.
    ///
    /// The connection is established eagerly, so an unreachable server fails
    /// here instead of on the first request.
    pub async fn connect(endpoint: &Endpoint, config: &TransportConfig) -> Result<Self> {
        // No request timeout: the log subscription is a long-lived call.
        let mut tonic_endpoint = TonicEndpoint::from_shared(endpoint.as_str().to_string())?
            .connect_timeout(config.connect_timeout)
            .http2_keep_alive_interval(config.keepalive_interval)
            .keep_alive_timeout(config.keepalive_timeout)
            .keep_alive_while_idle(config.keepalive_while_idle)
            .tcp_nodelay(true);

        if endpoint.is_tls() {
            // Server name comes from the URI host; trust anchors are the system roots.
            tonic_endpoint = tonic_endpoint.tls_config(ClientTlsConfig::new())?;
        }

        tracing::debug!(endpoint = %endpoint, "Opening transport");
        let channel = tonic_endpoint.connect().await?;

        Ok(Self {
            endpoint: endpoint.clone(),
            channel,
            max_message_size: config.max_message_size,
        })
    }

    /// The endpoint this transport is connected to.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// A cheap handle onto the shared connection.
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// Inbound message ceiling to apply to clients built on this transport.
    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Close the connection and release its resources.
    ///
    /// The underlying connection closes once the last channel clone is
    /// dropped; clients handed out earlier keep it alive until they finish.
    pub fn teardown(self) {
        tracing::debug!(endpoint = %self.endpoint, "Transport released");
        drop(self.channel);
    }
}
