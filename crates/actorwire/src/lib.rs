//! # ActorWire
//!
//! The wire protocol spoken between an actor client and the remote actor runtime.
//!
//! ## Architecture
//!
//! Frames are plain serde types ([`ToServer`], [`ToClient`]), tagged by a `type` field.
//! An [`Encoding`] moves them to and from byte buffers. Nothing in this crate performs I/O
//! or tracks connection state; correlation of calls and replies lives in the client.
//!
//! ## Message shapes
//!
//! | Direction | `type` | Purpose |
//! |---|---|---|
//! | client → server | `resolve` | Find or create an actor instance |
//! | client → server | `call` | Invoke an action, tagged with a correlation id |
//! | client → server | `subscribe` | Ask for an event to be pushed |
//! | server → client | `resolved` | Identity of the resolved instance |
//! | server → client | `result` | Successful reply to one call |
//! | server → client | `error` | Failed reply, resolve rejection, or connection notice |
//! | server → client | `event` | Server-initiated push |

pub mod codec;
pub mod error;
pub mod frame;

pub use codec::Encoding;
pub use codec::peek_correlation_id;
pub use error::Error;
pub use error::Result;
pub use frame::CallRequest;
pub use frame::ErrorFrame;
pub use frame::EventFrame;
pub use frame::ResolveMode;
pub use frame::ResolveRequest;
pub use frame::ResolvedFrame;
pub use frame::ResultFrame;
pub use frame::SubscriptionRequest;
pub use frame::Tags;
pub use frame::ToClient;
pub use frame::ToServer;
pub use frame::codes;
