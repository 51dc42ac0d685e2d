//! Request/response operations on a shared transport.
//!
//! Every call is fail-fast: no internal retry, the remote status is handed
//! back to the caller as [`ClientError::Rpc`].

use std::sync::Arc;

use async_trait::async_trait;
use edlink_proto::{
    editor_service_client::EditorServiceClient, CommandRequest, CommandResponse,
    GetInterfaceSetRequest, HeartbeatRequest, InterfaceSet, LogEntry, SubscribeLogsRequest,
};
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};
use tonic::transport::Channel;
use tonic::{Request, Status, Streaming};

use crate::error::{ClientError, Result};
use crate::transport::Transport;

/// Optional headers attached uniformly to every request of a session.
///
/// Empty metadata means no headers at all; nothing is attached.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    map: Option<Arc<MetadataMap>>,
}

impl RequestMetadata {
    /// No headers.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Build from `(key, value)` pairs, rejecting anything that is not valid
    /// ASCII gRPC metadata.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut map = MetadataMap::new();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            let parsed_key = key
                .to_ascii_lowercase()
                .parse::<AsciiMetadataKey>()
                .map_err(|_| ClientError::InvalidMetadata(format!("bad key '{key}'")))?;
            let parsed_value = value
                .parse::<AsciiMetadataValue>()
                .map_err(|_| ClientError::InvalidMetadata(format!("bad value for '{key}'")))?;
            map.insert(parsed_key, parsed_value);
        }

        if map.is_empty() {
            Ok(Self::none())
        } else {
            Ok(Self {
                map: Some(Arc::new(map)),
            })
        }
    }

    /// True when no headers will be attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_none()
    }

    /// Wrap a message in a request, attaching the headers if there are any.
    pub fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        if let Some(map) = &self.map {
            *request.metadata_mut() = MetadataMap::clone(map);
        }
        request
    }
}

/// Liveness probe seam used by the health monitor.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Send one heartbeat and return the server timestamp (ms since epoch).
    async fn probe(&self) -> std::result::Result<i64, Status>;
}

/// Stateless request/response surface of a session.
///
/// Cheap to clone; clones share the transport's connection.
#[derive(Clone)]
pub struct Invoker {
    client: EditorServiceClient<Channel>,
    metadata: RequestMetadata,
}

impl Invoker {
    /// Build an invoker on top of an established transport.
    #[must_use]
    pub fn new(transport: &Transport, metadata: RequestMetadata) -> Self {
        let client = EditorServiceClient::new(transport.channel())
            .max_decoding_message_size(transport.max_message_size());
        Self { client, metadata }
    }

    /// Execute one command on the server.
    ///
    /// The text is sent as given; filtering empty input is the caller's job.
    pub async fn execute_command(&self, command: &str) -> Result<CommandResponse> {
        tracing::debug!(command, "ExecuteCommand");
        let response = self
            .client
            .clone()
            .execute_command(self.metadata.request(CommandRequest {
                command: command.to_string(),
            }))
            .await?;
        Ok(response.into_inner())
    }

    /// Liveness probe. Returns the server timestamp in ms since the epoch.
    pub async fn heartbeat(&self) -> Result<i64> {
        Ok(self.probe().await?)
    }

    /// Fetch the server's interface set.
    pub async fn fetch_interface_set(&self) -> Result<InterfaceSet> {
        let response = self
            .client
            .clone()
            .get_interface_set(self.metadata.request(GetInterfaceSetRequest {}))
            .await?;
        Ok(response.into_inner())
    }

    /// Replace the server's interface set.
    pub async fn apply_interface_set(&self, set: InterfaceSet) -> Result<CommandResponse> {
        tracing::debug!(interfaces = set.interfaces.len(), "WriteInterfaceSet");
        let response = self
            .client
            .clone()
            .write_interface_set(self.metadata.request(set))
            .await?;
        Ok(response.into_inner())
    }

    /// Open the server-streaming log subscription.
    pub async fn subscribe_logs(&self) -> Result<Streaming<LogEntry>> {
        let response = self
            .client
            .clone()
            .subscribe_logs(self.metadata.request(SubscribeLogsRequest {}))
            .await?;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl Probe for Invoker {
    async fn probe(&self) -> std::result::Result<i64, Status> {
        let response = self
            .client
            .clone()
            .heartbeat(self.metadata.request(HeartbeatRequest {}))
            .await?;
        Ok(response.into_inner().timestamp_ms)
    }
}
