//! # Client Errors
//!
//! Every failure an operation on a client or handle can surface.
//!
//! Anomalies detected by the driver for frames nobody is waiting on are logged and dropped;
//! they only become an `Error` when a caller would otherwise never complete.

use actorwire::ErrorFrame;
use serde_json::Value;

use crate::transport::TransportError;

/// A failure described by the remote side.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub code: String,
    pub reason: String,
    pub metadata: Option<Value>,
}

impl From<ErrorFrame> for RemoteError {
    fn from(frame: ErrorFrame) -> Self {
        Self {
            code: frame.code,
            reason: frame.reason,
            metadata: frame.metadata,
        }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.code.is_empty() {
            write!(f, "{}", self.reason)
        } else {
            write!(f, "{}: {}", self.code, self.reason)
        }
    }
}

#[derive(Debug, Clone)]
pub enum Error {
    /// The transport could not be established or failed during resolve.
    Connection(TransportError),
    /// The resolve was rejected because no matching actor exists.
    ActorNotFound(String),
    /// The resolve was rejected because the tags are malformed.
    InvalidTags(String),
    /// The resolve was rejected for another remote-supplied reason.
    ResolveRejected(RemoteError),
    /// The action ran and failed on the remote side.
    RemoteAction(RemoteError),
    /// The connection was lost while the operation was pending, or before it started.
    Disconnected,
    /// The handle was explicitly disconnected.
    HandleClosed,
    /// A caller-imposed deadline passed.
    Timeout,
    /// The remote side broke the protocol in a way that affects this caller.
    ProtocolViolation(String),
    /// The event name already has a subscription in the other delivery mode.
    SubscriptionConflict(String),
    /// `receive` was called for an event with no queue-mode subscription.
    NotSubscribed(String),
    Codec(actorwire::Error),
    Config(String),
}

/// Discriminant of an [`Error`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    ActorNotFound,
    InvalidTags,
    ResolveRejected,
    RemoteAction,
    Disconnected,
    HandleClosed,
    Timeout,
    ProtocolViolation,
    SubscriptionConflict,
    NotSubscribed,
    Codec,
    Config,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) => ErrorKind::Connection,
            Self::ActorNotFound(_) => ErrorKind::ActorNotFound,
            Self::InvalidTags(_) => ErrorKind::InvalidTags,
            Self::ResolveRejected(_) => ErrorKind::ResolveRejected,
            Self::RemoteAction(_) => ErrorKind::RemoteAction,
            Self::Disconnected => ErrorKind::Disconnected,
            Self::HandleClosed => ErrorKind::HandleClosed,
            Self::Timeout => ErrorKind::Timeout,
            Self::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Self::SubscriptionConflict(_) => ErrorKind::SubscriptionConflict,
            Self::NotSubscribed(_) => ErrorKind::NotSubscribed,
            Self::Codec(_) => ErrorKind::Codec,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// The remote-supplied failure, for resolve rejections and failed actions.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::ResolveRejected(e) | Self::RemoteAction(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "Connection error: {}", e),
            Self::ActorNotFound(msg) => write!(f, "Actor not found: {}", msg),
            Self::InvalidTags(msg) => write!(f, "Invalid tags: {}", msg),
            Self::ResolveRejected(e) => write!(f, "Resolve rejected: {}", e),
            Self::RemoteAction(e) => write!(f, "Remote action failed: {}", e),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::HandleClosed => write!(f, "Handle is closed"),
            Self::Timeout => write!(f, "Operation timed out"),
            Self::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
            Self::SubscriptionConflict(event) => {
                write!(f, "Event '{}' is already subscribed in the other delivery mode", event)
            }
            Self::NotSubscribed(event) => write!(f, "No queue subscription for '{}'", event),
            Self::Codec(e) => write!(f, "Codec error: {}", e),
            Self::Config(msg) => write!(f, "Config error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Connection(e)
    }
}

impl From<actorwire::Error> for Error {
    fn from(e: actorwire::Error) -> Self {
        Self::Codec(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
