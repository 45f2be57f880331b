//! # Transport Abstraction
//!
//! A minimal, async interface for moving bytes between the client and the actor runtime.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: Transports know nothing about frames, correlation ids, or events.
//!   They move opaque buffers.
//! - **Two Channels**: Resolving an actor is a single request/response exchange
//!   ([`Transport::call`]). Everything after that flows over one persistent, bidirectional
//!   [`Connection`] per handle.
//! - **Fail-Fast**: There is no reconnection. A connection that reports loss stays lost.

use std::fmt;

use actorwire::Encoding;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// Establishing the connection or the exchange took longer than allowed.
    Timeout,
    /// The remote side answered the request/response channel with a failure status and no frame.
    Rejected { status: u16, body: String },
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Timeout => write!(f, "Transport timed out"),
            Self::Rejected { status, body } => write!(f, "Rejected with status {}: {}", status, body),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A way to reach an actor runtime.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`), so one client can be
/// pointed at HTTP/WebSocket in production and at an in-memory server in tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a payload over the request/response channel and waits for the reply.
    ///
    /// # invariants
    /// - Must return `Ok(vec)` with the raw reply bytes whenever the remote side produced a frame,
    ///   even if that frame reports a failure.
    /// - Must return `Err` if the network fails.
    /// - Should not interpret the payload content.
    async fn call(&self, payload: &[u8]) -> Result<Vec<u8>>;

    /// Opens the persistent connection for a resolved actor.
    async fn open(&self, actor_id: &str, encoding: Encoding) -> Result<Box<dyn Connection>>;
}

/// One persistent, bidirectional message stream, owned by exactly one handle.
#[async_trait::async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Sends one message.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Receives the next message.
    ///
    /// Returns `Ok(None)` once the remote side has closed the stream.
    ///
    /// # invariants
    /// - Must be cancel-safe: dropping the future before it completes must not lose a message.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;

    /// Closes the stream. Calling it more than once is harmless.
    async fn close(&self);
}
