//! Managed gRPC session client for the edlink editor/automation server.
//!
//! This crate owns the connection lifecycle: it opens one transport, verifies
//! the server with a heartbeat before handing out a [`Session`], keeps a
//! heartbeat monitor and a log subscription running in the background, and
//! reports a lost connection exactly once before tearing everything down.
//! It is UI-agnostic and can be used by CLI tools, test harnesses, and
//! alternative frontends.
//!
//! # Example
//!
//! ```no_run
//! use edlink_client::{Endpoint, Session};
//!
//! # async fn example() -> edlink_client::Result<()> {
//! let endpoint = Endpoint::parse("http://127.0.0.1:50051")?;
//! let session = Session::connect(&endpoint).await?;
//!
//! let mut logs = session.subscribe_logs();
//! let reply = session.execute_command("save-all").await?;
//! println!("{}: {}", reply.success, reply.message);
//!
//! while let Ok(record) = logs.recv().await {
//!     println!("[{}] {}", record.level, record.message);
//! }
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod endpoint;
pub mod error;
pub mod events;
pub mod invoker;
mod latch;
mod log_stream;
pub mod monitor;
pub mod session;
pub mod transport;

pub use endpoint::{Endpoint, EndpointError};
pub use error::{describe_status, ClientError, Result};
pub use events::{Disconnect, DisconnectSource, HeartbeatSample, LogRecord, Severity};
pub use invoker::{Invoker, Probe, RequestMetadata};
pub use monitor::HealthConfig;
pub use session::{Session, SessionConfig, SessionState};
pub use transport::{Transport, TransportConfig, MAX_MESSAGE_SIZE};

/// Generated protocol types used in this crate's public API.
pub use edlink_proto as proto;
