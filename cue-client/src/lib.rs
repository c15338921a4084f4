//! # cuesync-client
//!
//! Transports and the child session for cuesync.
//!
//! ## Features
//!
//! - **Transport Abstraction**: pluggable stream transport (TCP, mock)
//! - **Companion Channel**: live plus durable delivery to a sleepy display
//! - **Child Session**: dial with retry, follow the parent, predict locally
//! - **Pure State Machines**: uses cuesync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use cuesync_client::{ChildSession, FollowerConfig, TcpTransport};
//!
//! let config = FollowerConfig::new("192.168.1.20:7420".parse()?);
//! let (session, handle) = ChildSession::new(Arc::new(TcpTransport::new()), config, shutdown);
//! tokio::spawn(session.run());
//!
//! if let Some(prediction) = handle.prediction() {
//!     draw(prediction.current_main_value(Instant::now()));
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod session;
pub mod transport;

pub use session::{
    connect_with_retry, ChildHandle, ChildSession, ClientError, FollowerConfig,
    DEFAULT_CONNECT_TIMEOUT,
};
pub use transport::{
    CompanionChannel, CompanionError, CompanionReceiver, MemoryCompanion, MockTransport,
    TcpTransport, Transport, TransportError, DEFAULT_PORT,
};
