//! # Actor Handle
//!
//! A caller's live session with one resolved actor instance.
//!
//! Every handle owns its own connection, pending-call table and subscriptions. Handles for
//! the same actor share nothing on the client side.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Handle;

use crate::config::ClientConfig;
use crate::engine;
use crate::engine::Engine;
use crate::engine::LinkState;
use crate::error::Result;
use crate::reference::ActorReference;
use crate::registry::Event;
use crate::transport::Transport;

/// A resolved actor.
///
/// Dropping the handle without calling [`ActorHandle::disconnect`] stops its driver task;
/// the connection is released without a close frame.
pub struct ActorHandle {
    pub(crate) engine: Arc<Engine>,
}

impl ActorHandle {
    /// Resolves `reference`, opens the push connection and starts the driver on `runtime`.
    pub(crate) async fn connect(
        transport: &dyn Transport,
        reference: &ActorReference,
        config: &ClientConfig,
        runtime: &Handle,
    ) -> Result<Self> {
        let actor_id = engine::resolve(transport, reference, config.encoding).await?;
        let connection = transport.open(&actor_id, config.encoding).await?;
        tracing::debug!(actor_id = %actor_id, reference = %reference, "actor connected");

        Ok(Self {
            engine: Engine::start(actor_id, connection, config, runtime),
        })
    }

    /// The identity assigned by the remote side at resolve time.
    pub fn actor_id(&self) -> &str {
        self.engine.actor_id()
    }

    /// Invokes `name` on the actor and waits for its result.
    ///
    /// Calls issued concurrently on one handle are independent; each completes with its own
    /// reply regardless of the order replies arrive in.
    pub async fn action(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.engine.call(name, args).await
    }

    /// Registers `callback` for every future `name` event.
    ///
    /// Callbacks for one name run in registration order, on the driver task, before the next
    /// inbound frame is processed. Never suspends.
    pub fn on_event<F>(&self, name: &str, callback: F) -> Result<()>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.engine.on_event(name, Arc::new(callback))
    }

    /// Starts queueing `name` events for [`ActorHandle::receive`]. Never suspends.
    pub fn subscribe(&self, name: &str) -> Result<()> {
        self.engine.subscribe(name)
    }

    /// Waits for `count` queued events named `name`, or of any subscribed name if `None`.
    ///
    /// Events are returned in arrival order. Events that do not match stay queued.
    pub async fn receive(&self, name: Option<&str>, count: usize) -> Result<Vec<Event>> {
        self.engine.receive(name, count).await
    }

    /// Like [`ActorHandle::receive`], failing with `Timeout` after `timeout`. Nothing is
    /// consumed on timeout.
    pub async fn receive_timeout(
        &self,
        name: Option<&str>,
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<Event>> {
        self.engine.receive_timeout(name, count, timeout).await
    }

    /// Number of calls still waiting for their reply.
    pub fn pending_calls(&self) -> usize {
        self.engine.pending_calls()
    }

    /// Number of queued events not yet received.
    pub fn queued_events(&self, name: Option<&str>) -> usize {
        self.engine.queued_events(name)
    }

    /// Closes the connection. Pending calls fail with `Disconnected`; later operations fail
    /// with `HandleClosed`. Idempotent.
    pub async fn disconnect(&self) {
        self.engine.disconnect().await;
    }

    pub fn state(&self) -> LinkState {
        self.engine.state()
    }

    pub fn is_closed(&self) -> bool {
        self.state() != LinkState::Ready
    }
}

impl Drop for ActorHandle {
    fn drop(&mut self) {
        self.engine.abort_driver();
    }
}

impl std::fmt::Debug for ActorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorHandle")
            .field("actor_id", &self.actor_id())
            .field("state", &self.state())
            .finish()
    }
}
