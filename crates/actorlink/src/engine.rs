//! # Correlation Engine
//!
//! The protocol core shared by the async and blocking facades.
//!
//! Each resolved actor gets one [`Engine`]. A single driver task per engine ([`Engine::run`])
//! owns the connection's read side and write side: it forwards queued outbound frames in
//! FIFO order and feeds every inbound frame to [`Engine::dispatch_inbound`], the one step
//! function that completes pending calls and routes events.
//!
//! ## Invariants
//! - **Unique Ids**: Correlation ids come from a per-engine counter and are never reused.
//! - **Single Assignment**: A pending call is removed from the table before its slot is filled,
//!   so no reply can fill it twice. Later replies for the same id are logged and dropped.
//! - **No Stranded Callers**: Losing or closing the connection fails every pending call with
//!   `Disconnected`.
//! - **Resilient Loop**: Nothing a remote peer sends can stop the driver. Malformed or
//!   unmatched frames are logged and dropped.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use actorwire::CallRequest;
use actorwire::Encoding;
use actorwire::SubscriptionRequest;
use actorwire::ToClient;
use actorwire::ToServer;
use actorwire::codes;
use actorwire::peek_correlation_id;
use dashmap::DashMap;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::config::ClientConfig;
use crate::error::Error;
use crate::error::Result;
use crate::reference::ActorReference;
use crate::registry::Delivered;
use crate::registry::Event;
use crate::registry::EventCallback;
use crate::registry::Registry;
use crate::transport::Connection;
use crate::transport::Transport;
use crate::transport::TransportError;

/// The first correlation id an engine hands out.
const FIRST_CORRELATION_ID: u64 = 1;

/// Lifecycle of a handle's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Connected; calls and subscriptions are accepted.
    Ready,
    /// The transport went away. Final: there is no reconnection.
    Lost,
    /// `disconnect()` was called.
    Closed,
}

/// Why an inbound frame was dropped instead of being delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The bytes did not decode to a frame.
    Malformed,
    /// A reply for an id this engine never issued.
    UnknownCorrelation(u64),
    /// A reply for an id already answered, timed out, or otherwise no longer pending.
    StaleCorrelation(u64),
    /// The reply matched, but the caller had stopped waiting.
    CallerGone(u64),
    /// An event addressed to a different actor.
    ForeignHandle(String),
    NoSubscriber(String),
    QueueOverflow(String),
    /// An error frame with no correlation id.
    ConnectionNotice,
    /// A frame kind that never travels on the push connection.
    UnexpectedFrame(&'static str),
    /// The handle no longer accepts deliveries.
    Closed,
}

/// Outcome of dispatching one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The pending call with this id received its result.
    Completed(u64),
    /// The event was handed to its subscription.
    Delivered(String),
    Dropped(DropReason),
}

/// A call awaiting its reply.
struct PendingCall {
    action: String,
    slot: oneshot::Sender<Result<Value>>,
}

/// Sends a resolve request and waits for the actor's identity.
pub(crate) async fn resolve(
    transport: &dyn Transport,
    reference: &ActorReference,
    encoding: Encoding,
) -> Result<String> {
    reference.validate()?;

    let payload = encoding.encode(&ToServer::Resolve(reference.to_request()))?;
    tracing::debug!(reference = %reference, "resolving actor");

    let reply = transport.call(&payload).await?;
    let frame: ToClient = encoding
        .decode(&reply)
        .map_err(|e| Error::ProtocolViolation(format!("malformed resolve reply: {}", e)))?;

    match frame {
        ToClient::Resolved(resolved) => {
            tracing::debug!(reference = %reference, actor_id = %resolved.handle_id, "actor resolved");
            Ok(resolved.handle_id)
        }
        ToClient::Error(err) => Err(match err.code.as_str() {
            codes::ACTOR_NOT_FOUND => Error::ActorNotFound(err.reason),
            codes::INVALID_TAGS => Error::InvalidTags(err.reason),
            _ => Error::ResolveRejected(err.into()),
        }),
        other => Err(Error::ProtocolViolation(format!(
            "expected a resolved frame, got {}",
            other.kind()
        ))),
    }
}

pub(crate) struct Engine {
    actor_id: String,
    encoding: Encoding,
    connection: Arc<dyn Connection>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    pending: DashMap<u64, PendingCall>,
    next_id: AtomicU64,
    registry: Registry,
    state: Mutex<LinkState>,
    driver: Mutex<Option<AbortHandle>>,
    call_timeout: Option<Duration>,
}

impl Engine {
    /// Creates the engine for a resolved actor and spawns its driver task on `runtime`.
    pub(crate) fn start(
        actor_id: String,
        connection: Box<dyn Connection>,
        config: &ClientConfig,
        runtime: &Handle,
    ) -> Arc<Self> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let engine = Arc::new(Self {
            actor_id,
            encoding: config.encoding,
            connection: Arc::from(connection),
            outbound,
            pending: DashMap::new(),
            next_id: AtomicU64::new(FIRST_CORRELATION_ID),
            registry: Registry::new(config.event_queue_capacity),
            state: Mutex::new(LinkState::Ready),
            driver: Mutex::new(None),
            call_timeout: config.call_timeout,
        });

        let task = runtime.spawn(engine.clone().run(outbound_rx));
        *engine.lock_driver() = Some(task.abort_handle());

        engine
    }

    pub(crate) fn actor_id(&self) -> &str {
        &self.actor_id
    }

    pub(crate) fn state(&self) -> LinkState {
        *self.lock_state()
    }

    /// Number of calls still waiting for a reply.
    pub(crate) fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn queued_events(&self, name: Option<&str>) -> usize {
        self.registry.queued(name)
    }

    fn lock_state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_driver(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            LinkState::Ready => Ok(()),
            LinkState::Lost => Err(Error::Disconnected),
            LinkState::Closed => Err(Error::HandleClosed),
        }
    }

    // ------------------------------------------------------------------------
    //  Driver
    // ------------------------------------------------------------------------

    /// The driver loop: writes outbound frames and dispatches inbound ones until the
    /// connection ends.
    async fn run(self: Arc<Self>, mut outbound: mpsc::UnboundedReceiver<Vec<u8>>) {
        let error = loop {
            tokio::select! {
                inbound = self.connection.recv() => match inbound {
                    Ok(Some(bytes)) => {
                        self.dispatch_inbound(&bytes);
                    }
                    Ok(None) => break TransportError::ConnectionLost("stream closed by remote".into()),
                    Err(e) => break e,
                },
                Some(payload) = outbound.recv() => {
                    if let Err(e) = self.connection.send(&payload).await {
                        break e;
                    }
                }
            }
        };

        self.on_connection_lost(error);
    }

    fn on_connection_lost(&self, error: TransportError) {
        {
            let mut state = self.lock_state();
            if *state != LinkState::Ready {
                // Closed on purpose; disconnect() owns the teardown.
                return;
            }
            *state = LinkState::Lost;
        }

        tracing::warn!(actor_id = %self.actor_id, error = %error, "connection lost");
        self.fail_pending(Error::Disconnected);
        self.registry.close(Error::Disconnected, false);
    }

    /// Fails every pending call with `reason`.
    fn fail_pending(&self, reason: Error) {
        let ids: Vec<u64> = self.pending.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, call)) = self.pending.remove(&id) {
                let _ = call.slot.send(Err(reason.clone()));
            }
        }
    }

    /// Demultiplexes one inbound frame.
    pub(crate) fn dispatch_inbound(&self, bytes: &[u8]) -> Dispatch {
        let frame: ToClient = match self.encoding.decode(bytes) {
            Ok(frame) => frame,
            Err(e) => return self.on_malformed(bytes, e),
        };

        match frame {
            ToClient::Result(result) => self.complete(result.correlation_id, Ok(result.value)),
            ToClient::Error(err) => match err.correlation_id {
                Some(id) => self.complete(id, Err(Error::RemoteAction(err.into()))),
                None => {
                    tracing::warn!(
                        actor_id = %self.actor_id,
                        code = %err.code,
                        reason = %err.reason,
                        "connection-level error from remote"
                    );
                    Dispatch::Dropped(DropReason::ConnectionNotice)
                }
            },
            ToClient::Event(event) => {
                if event.handle_id != self.actor_id {
                    tracing::warn!(
                        actor_id = %self.actor_id,
                        foreign = %event.handle_id,
                        event = %event.event_name,
                        "event addressed to another actor"
                    );
                    return Dispatch::Dropped(DropReason::ForeignHandle(event.handle_id));
                }

                match self.registry.deliver(&event.event_name, event.payload) {
                    Delivered::Callbacks(_) | Delivered::Queued => Dispatch::Delivered(event.event_name),
                    Delivered::Overflow => Dispatch::Dropped(DropReason::QueueOverflow(event.event_name)),
                    Delivered::NoSubscriber => {
                        tracing::trace!(actor_id = %self.actor_id, event = %event.event_name, "no subscriber");
                        Dispatch::Dropped(DropReason::NoSubscriber(event.event_name))
                    }
                    Delivered::Closed => Dispatch::Dropped(DropReason::Closed),
                }
            }
            ToClient::Resolved(_) => {
                tracing::warn!(actor_id = %self.actor_id, "resolved frame on the push connection");
                Dispatch::Dropped(DropReason::UnexpectedFrame("resolved"))
            }
        }
    }

    fn on_malformed(&self, bytes: &[u8], error: actorwire::Error) -> Dispatch {
        let correlation_id = peek_correlation_id(self.encoding, bytes);
        tracing::warn!(
            actor_id = %self.actor_id,
            correlation_id = ?correlation_id,
            error = %error,
            "dropping malformed frame"
        );

        // A caller waiting on this id would otherwise never complete.
        if let Some(id) = correlation_id {
            if self.pending.contains_key(&id) {
                return self.complete(id, Err(Error::ProtocolViolation(error.to_string())));
            }
        }

        Dispatch::Dropped(DropReason::Malformed)
    }

    /// Fills the result slot of pending call `id`, removing it from the table.
    fn complete(&self, id: u64, result: Result<Value>) -> Dispatch {
        let Some((_, PendingCall { action, slot })) = self.pending.remove(&id) else {
            let issued = FIRST_CORRELATION_ID..self.next_id.load(Ordering::Relaxed);
            if issued.contains(&id) {
                tracing::warn!(actor_id = %self.actor_id, correlation_id = id, "reply for a call no longer pending");
                return Dispatch::Dropped(DropReason::StaleCorrelation(id));
            }
            tracing::warn!(actor_id = %self.actor_id, correlation_id = id, "reply for an unknown correlation id");
            return Dispatch::Dropped(DropReason::UnknownCorrelation(id));
        };

        if slot.send(result).is_err() {
            tracing::debug!(
                actor_id = %self.actor_id,
                correlation_id = id,
                action = %action,
                "caller stopped waiting; reply dropped"
            );
            return Dispatch::Dropped(DropReason::CallerGone(id));
        }

        Dispatch::Completed(id)
    }

    // ------------------------------------------------------------------------
    //  Operations
    // ------------------------------------------------------------------------

    /// Issues an action call and waits for its reply.
    ///
    /// If the returned future is dropped early, the pending entry stays until its reply
    /// arrives (and is dropped) or the handle disconnects.
    pub(crate) async fn call(&self, action: &str, args: Vec<Value>) -> Result<Value> {
        self.ensure_ready()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = self.encoding.encode(&ToServer::Call(CallRequest {
            handle_id: self.actor_id.clone(),
            correlation_id: id,
            action: action.to_string(),
            args,
        }))?;

        let (slot, completion) = oneshot::channel();
        self.pending.insert(
            id,
            PendingCall {
                action: action.to_string(),
                slot,
            },
        );

        // A disconnect that raced with the insert has already drained the table.
        if let Err(e) = self.ensure_ready() {
            self.pending.remove(&id);
            return Err(e);
        }

        if self.outbound.send(payload).is_err() {
            self.pending.remove(&id);
            return Err(Error::Disconnected);
        }
        tracing::debug!(actor_id = %self.actor_id, correlation_id = id, action, "call issued");

        let outcome = match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, completion).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending.remove(&id);
                    tracing::debug!(actor_id = %self.actor_id, correlation_id = id, action, "call timed out");
                    return Err(Error::Timeout);
                }
            },
            None => completion.await,
        };

        match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::Disconnected),
        }
    }

    /// Registers an event callback. Never suspends.
    pub(crate) fn on_event(&self, name: &str, callback: Arc<EventCallback>) -> Result<()> {
        self.ensure_ready()?;
        if self.registry.register_callback(name, callback)? {
            self.announce(name)?;
        }
        Ok(())
    }

    /// Activates queue-mode delivery for `name`. Never suspends.
    pub(crate) fn subscribe(&self, name: &str) -> Result<()> {
        self.ensure_ready()?;
        if self.registry.subscribe(name)? {
            self.announce(name)?;
        }
        Ok(())
    }

    /// Queues the subscribe frame for a newly created subscription.
    ///
    /// If the frame cannot be queued the subscription is removed again, so a later attempt
    /// fails the same way instead of finding a subscription the server never heard of.
    fn announce(&self, name: &str) -> Result<()> {
        let announced = self.ensure_ready().and_then(|_| self.send_subscribe(name));
        if let Err(e) = announced {
            self.registry.remove(name);
            return Err(e);
        }
        Ok(())
    }

    fn send_subscribe(&self, name: &str) -> Result<()> {
        let payload = self.encoding.encode(&ToServer::Subscribe(SubscriptionRequest {
            handle_id: self.actor_id.clone(),
            event_name: name.to_string(),
            subscribe: true,
        }))?;

        self.outbound.send(payload).map_err(|_| Error::Disconnected)?;
        tracing::debug!(actor_id = %self.actor_id, event = name, "subscribed");
        Ok(())
    }

    /// Waits for `count` queued events.
    ///
    /// After a connection loss, events that were already queued can still be received.
    pub(crate) async fn receive(&self, name: Option<&str>, count: usize) -> Result<Vec<Event>> {
        if self.state() == LinkState::Closed {
            return Err(Error::HandleClosed);
        }
        self.registry.receive(name, count).await
    }

    pub(crate) async fn receive_timeout(
        &self,
        name: Option<&str>,
        count: usize,
        limit: Duration,
    ) -> Result<Vec<Event>> {
        tokio::time::timeout(limit, self.receive(name, count))
            .await
            .map_err(|_| Error::Timeout)?
    }

    /// Closes the connection and fails everything still pending. Idempotent.
    pub(crate) async fn disconnect(&self) {
        {
            let mut state = self.lock_state();
            if *state == LinkState::Closed {
                return;
            }
            *state = LinkState::Closed;
        }

        tracing::debug!(actor_id = %self.actor_id, "disconnecting");
        self.abort_driver();
        self.connection.close().await;
        self.fail_pending(Error::Disconnected);
        self.registry.close(Error::Disconnected, true);
    }

    /// Stops the driver task without touching the connection.
    pub(crate) fn abort_driver(&self) {
        if let Some(driver) = self.lock_driver().take() {
            driver.abort();
        }
    }

    /// Whether the driver has gone away and nothing can be queued for it any more.
    #[cfg(test)]
    pub(crate) fn outbound_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}
