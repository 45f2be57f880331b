//! # ActorLink
//!
//! A client for remotely hosted, stateful actors.
//!
//! A [`Client`] resolves an actor address (type plus tags, or a known id) to an
//! [`ActorHandle`]. Through the handle a caller invokes named actions and awaits their
//! results, and receives server-pushed events either through callbacks or by pulling them
//! from a queue.
//!
//! The same API is offered twice: async in the crate root, and blocking in [`blocking`].
//! Both run on the one protocol engine.
//!
//! ```no_run
//! # async fn demo() -> actorlink::Result<()> {
//! use actorlink::Client;
//! use actorlink::ClientConfig;
//! use actorlink::GetOptions;
//! use serde_json::json;
//!
//! let client = Client::new(ClientConfig::new("http://127.0.0.1:6420"))?;
//! let counter = client.get("counter", GetOptions::default()).await?;
//!
//! counter.on_event("newCount", |count| println!("count is now {}", count))?;
//! let count = counter.action("increment", vec![json!(5)]).await?;
//! assert_eq!(count, json!(5));
//!
//! counter.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod blocking;
pub mod client;
pub mod config;
mod engine;
pub mod error;
pub mod handle;
pub mod http;
#[cfg(any(test, feature = "test-util"))]
pub mod mock_transport;
pub mod reference;
mod registry;
pub mod transport;

pub use actorwire::Encoding;
pub use actorwire::Tags;
pub use client::Client;
pub use client::CreateOptions;
pub use client::CreateRequestMetadata;
pub use client::GetOptions;
pub use client::GetWithIdOptions;
pub use config::ClientConfig;
pub use engine::Dispatch;
pub use engine::DropReason;
pub use engine::LinkState;
pub use error::Error;
pub use error::ErrorKind;
pub use error::RemoteError;
pub use error::Result;
pub use handle::ActorHandle;
pub use reference::ActorQuery;
pub use reference::ActorReference;
pub use registry::Event;
pub use registry::EventCallback;
pub use transport::Connection;
pub use transport::Transport;
pub use transport::TransportError;
