//! In-process mock of the editor/automation server.
//!
//! Binds to a random local port and exposes knobs to script heartbeat
//! outcomes, push log records, and break the log stream.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use edlink_client::proto::editor_service_server::{EditorService, EditorServiceServer};
use edlink_client::proto::{
    CommandRequest, CommandResponse, GetInterfaceSetRequest, HeartbeatRequest, HeartbeatResponse,
    InterfaceSet, LogEntry, SubscribeLogsRequest,
};
use edlink_client::{Endpoint, HealthConfig, SessionConfig};
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::transport::Server;
use tonic::{Request, Response, Status};

type LogFeed = mpsc::Sender<Result<LogEntry, Status>>;

#[derive(Default)]
pub struct MockState {
    /// Scripted heartbeat outcomes; once empty, `healthy` decides.
    heartbeat_plan: Mutex<VecDeque<bool>>,
    healthy: Mutex<bool>,
    /// Accept heartbeat calls but never answer them.
    heartbeats_hang: Mutex<bool>,
    heartbeat_calls: AtomicUsize,
    clock_skew_ms: Mutex<i64>,
    log_subscribers: Mutex<Vec<LogFeed>>,
    subscribe_calls: AtomicUsize,
    interface_set: Mutex<InterfaceSet>,
    commands: Mutex<Vec<String>>,
    /// `authorization` header of every request seen, in order.
    auth_headers: Mutex<Vec<Option<String>>>,
}

impl MockState {
    fn record_auth<T>(&self, request: &Request<T>) {
        let header = request
            .metadata()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.auth_headers.lock().unwrap().push(header);
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

#[tonic::async_trait]
impl EditorService for MockState {
    async fn execute_command(
        &self,
        request: Request<CommandRequest>,
    ) -> Result<Response<CommandResponse>, Status> {
        self.record_auth(&request);
        let command = request.into_inner().command;
        self.commands.lock().unwrap().push(command.clone());

        match command.as_str() {
            "explode" => Err(Status::invalid_argument("unknown command 'explode'")),
            "nope" => Ok(Response::new(CommandResponse {
                success: false,
                message: "refused".into(),
                timestamp_ms: now_ms(),
            })),
            _ => Ok(Response::new(CommandResponse {
                success: true,
                message: format!("ran {command}"),
                timestamp_ms: now_ms(),
            })),
        }
    }

    async fn heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        self.record_auth(&request);
        self.heartbeat_calls.fetch_add(1, Ordering::SeqCst);
        let hang = *self.heartbeats_hang.lock().unwrap();
        if hang {
            return std::future::pending().await;
        }

        let planned = self.heartbeat_plan.lock().unwrap().pop_front();
        let ok = planned.unwrap_or_else(|| *self.healthy.lock().unwrap());
        if ok {
            Ok(Response::new(HeartbeatResponse {
                timestamp_ms: now_ms() + *self.clock_skew_ms.lock().unwrap(),
            }))
        } else {
            Err(Status::unavailable("mock heartbeat outage"))
        }
    }

    async fn get_interface_set(
        &self,
        request: Request<GetInterfaceSetRequest>,
    ) -> Result<Response<InterfaceSet>, Status> {
        self.record_auth(&request);
        Ok(Response::new(self.interface_set.lock().unwrap().clone()))
    }

    async fn write_interface_set(
        &self,
        request: Request<InterfaceSet>,
    ) -> Result<Response<CommandResponse>, Status> {
        self.record_auth(&request);
        let set = request.into_inner();
        let count = set.interfaces.len();
        *self.interface_set.lock().unwrap() = set;
        Ok(Response::new(CommandResponse {
            success: true,
            message: format!("{count} interfaces written"),
            timestamp_ms: now_ms(),
        }))
    }

    type SubscribeLogsStream = ReceiverStream<Result<LogEntry, Status>>;

    async fn subscribe_logs(
        &self,
        request: Request<SubscribeLogsRequest>,
    ) -> Result<Response<Self::SubscribeLogsStream>, Status> {
        self.record_auth(&request);
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(64);
        self.log_subscribers.lock().unwrap().push(tx);
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Handle to a running mock server.
pub struct MockServer {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockServer {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        *state.healthy.lock().unwrap() = true;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let serve_future = Server::builder()
            .add_service(EditorServiceServer::from_arc(Arc::clone(&state)))
            .serve_with_incoming(TcpListenerStream::new(listener));
        tokio::spawn(serve_future);

        Self { addr, state }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::parse(&format!("http://{}", self.addr)).unwrap()
    }

    pub fn plan_heartbeats(&self, outcomes: &[bool]) {
        self.state
            .heartbeat_plan
            .lock()
            .unwrap()
            .extend(outcomes.iter().copied());
    }

    pub fn set_healthy(&self, healthy: bool) {
        *self.state.healthy.lock().unwrap() = healthy;
    }

    pub fn hang_heartbeats(&self) {
        *self.state.heartbeats_hang.lock().unwrap() = true;
    }

    pub fn set_clock_skew_ms(&self, skew: i64) {
        *self.state.clock_skew_ms.lock().unwrap() = skew;
    }

    pub fn heartbeat_calls(&self) -> usize {
        self.state.heartbeat_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().unwrap().clone()
    }

    pub fn auth_headers(&self) -> Vec<Option<String>> {
        self.state.auth_headers.lock().unwrap().clone()
    }

    /// Wait until at least one log subscription is open.
    pub async fn wait_for_log_subscriber(&self) {
        for _ in 0..200 {
            if !self.state.log_subscribers.lock().unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("client never subscribed to logs");
    }

    fn feeds(&self) -> Vec<LogFeed> {
        self.state.log_subscribers.lock().unwrap().clone()
    }

    pub async fn push_log(&self, message: &str, level: i32) {
        for feed in self.feeds() {
            let _ = feed
                .send(Ok(LogEntry {
                    message: message.to_string(),
                    level,
                    timestamp_ms: now_ms(),
                }))
                .await;
        }
    }

    /// Terminate every open log stream with an error status.
    pub async fn break_log_stream(&self) {
        for feed in self.feeds() {
            let _ = feed.send(Err(Status::internal("log pipeline crashed"))).await;
        }
    }

    /// End every open log stream cleanly by dropping its sender.
    pub fn end_log_streams(&self) {
        self.state.log_subscribers.lock().unwrap().clear();
    }

    /// Number of log streams the client still holds open.
    pub fn open_log_streams(&self) -> usize {
        self.feeds().iter().filter(|feed| !feed.is_closed()).count()
    }
}

/// Session settings with short intervals so tests finish quickly.
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        health: HealthConfig {
            interval: Duration::from_millis(40),
            retry_delay: Duration::from_millis(20),
            timeout: Duration::from_secs(2),
            failure_threshold: 2,
        },
        ..SessionConfig::default()
    }
}
