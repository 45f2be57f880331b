//! # Protocol Frames
//!
//! Defines every message that crosses the wire, in both directions.
//!
//! ## Invariants
//! - **Tagged**: Every frame carries a `type` discriminator; the body fields sit beside it.
//! - **Forward Compatibility**: Unknown fields are ignored on decode. Unknown `type` tags are
//!   decode errors.
//! - **Canonical Tags**: Tags are a sorted map, so the same `(actorType, tags)` pair always
//!   encodes to the same bytes.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Instance-disambiguating tags. Order-insensitive, matched exactly by the remote side.
pub type Tags = BTreeMap<String, String>;

// ============================================================================
//  SERVER-BOUND
// ============================================================================

/// How the remote side should treat a resolve request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolveMode {
    /// Return the instance matching `(actorType, tags)`, creating it if absent.
    #[default]
    GetOrCreate,
    /// Return the matching instance; fail with `actor_not_found` if absent.
    Get,
    /// Always create a fresh instance.
    Create,
    /// Address an instance directly by the id a previous resolve returned.
    GetForId,
}

/// Asks the remote side for the identity of an actor instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub tags: Tags,
    /// Opaque creation parameters, only consulted when the instance is created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default)]
    pub mode: ResolveMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Invokes a named action on a resolved actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    pub handle_id: String,
    pub correlation_id: u64,
    pub action: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Tells the remote side which events this connection wants pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub handle_id: String,
    pub event_name: String,
    /// `true` to subscribe, `false` to unsubscribe.
    pub subscribe: bool,
}

/// All frames a client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToServer {
    Resolve(ResolveRequest),
    Call(CallRequest),
    Subscribe(SubscriptionRequest),
}

// ============================================================================
//  CLIENT-BOUND
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedFrame {
    pub handle_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultFrame {
    pub correlation_id: u64,
    #[serde(default)]
    pub value: Value,
}

/// A failure reported by the remote side.
///
/// With a correlation id it answers exactly one call. Without one it is either a resolve
/// rejection or a connection-level notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<u64>,
    /// Machine-readable code, e.g. `actor_not_found`.
    #[serde(default)]
    pub code: String,
    /// Human-readable message.
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// A server-initiated push. Carries no correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    pub handle_id: String,
    pub event_name: String,
    #[serde(default)]
    pub payload: Value,
}

/// All frames a client receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToClient {
    Resolved(ResolvedFrame),
    Result(ResultFrame),
    Error(ErrorFrame),
    Event(EventFrame),
}

impl ToClient {
    /// The correlation id this frame answers, if any.
    pub fn correlation_id(&self) -> Option<u64> {
        match self {
            Self::Result(frame) => Some(frame.correlation_id),
            Self::Error(frame) => frame.correlation_id,
            Self::Resolved(_) | Self::Event(_) => None,
        }
    }

    /// Short name of the frame kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resolved(_) => "resolved",
            Self::Result(_) => "result",
            Self::Error(_) => "error",
            Self::Event(_) => "event",
        }
    }
}

/// Well-known error codes.
pub mod codes {
    pub const ACTOR_NOT_FOUND: &str = "actor_not_found";
    pub const INVALID_TAGS: &str = "invalid_tags";
    pub const ACTION_NOT_FOUND: &str = "action_not_found";
    pub const INTERNAL: &str = "internal_error";
}
