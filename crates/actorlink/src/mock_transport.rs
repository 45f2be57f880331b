//! An in-memory actor runtime for tests.
//!
//! [`MockServer`] implements [`Transport`] without any networking. Frames a client sends are
//! processed inline, and replies and events land on per-connection channels. The server can
//! also be told to misbehave: inject raw frames, answer twice, never answer, or drop every
//! connection at once.
//!
//! Only compiled for this crate's tests or with the `test-util` feature.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use actorwire::CallRequest;
use actorwire::Encoding;
use actorwire::ErrorFrame;
use actorwire::EventFrame;
use actorwire::ResolveMode;
use actorwire::ResolveRequest;
use actorwire::ResolvedFrame;
use actorwire::ResultFrame;
use actorwire::Tags;
use actorwire::ToClient;
use actorwire::ToServer;
use actorwire::codes;
use serde_json::Value;
use serde_json::json;
use tokio::sync::mpsc;

use crate::error::RemoteError;
use crate::transport;
use crate::transport::Connection;
use crate::transport::Transport;
use crate::transport::TransportError;

/// How an actor answers one action call.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Value(Value),
    Error(RemoteError),
    /// Never answer.
    Never,
}

/// Events an action emits while it runs. They are broadcast before the action's reply.
#[derive(Debug, Default)]
pub struct ActorContext {
    emitted: Vec<(String, Value)>,
}

impl ActorContext {
    pub fn emit(&mut self, name: impl Into<String>, payload: Value) {
        self.emitted.push((name.into(), payload));
    }
}

/// Server-side logic of one actor instance.
pub trait ActorBehavior: Send + 'static {
    fn handle(&mut self, action: &str, args: &[Value], ctx: &mut ActorContext) -> Reply;
}

/// A counter actor.
///
/// | Action      | Effect                                                         |
/// |-------------|----------------------------------------------------------------|
/// | `increment` | adds `args[0]` (default 1), emits `newCount`, returns the count |
/// | `getCount`  | returns the count                                              |
/// | `params`    | returns the creation parameters                                |
/// | `echo`      | returns the arguments as an array                              |
/// | `emit`      | emits event `args[0]` with payload `args[1]`                   |
/// | `burst`     | emits `tick` events numbered `1..=args[0]`                     |
/// | `fail`      | fails with code `counter_failure`                              |
/// | `hang`      | never replies                                                  |
#[derive(Debug, Default)]
pub struct Counter {
    count: i64,
    params: Option<Value>,
}

impl Counter {
    pub fn new(params: Option<&Value>) -> Self {
        Self {
            count: params.and_then(|p| p.get("start")).and_then(Value::as_i64).unwrap_or(0),
            params: params.cloned(),
        }
    }
}

impl ActorBehavior for Counter {
    fn handle(&mut self, action: &str, args: &[Value], ctx: &mut ActorContext) -> Reply {
        match action {
            "increment" => {
                self.count += args.first().and_then(Value::as_i64).unwrap_or(1);
                ctx.emit("newCount", json!(self.count));
                Reply::Value(json!(self.count))
            }
            "getCount" => Reply::Value(json!(self.count)),
            "params" => Reply::Value(self.params.clone().unwrap_or(Value::Null)),
            "echo" => Reply::Value(Value::Array(args.to_vec())),
            "emit" => {
                let name = args.first().and_then(Value::as_str).unwrap_or("event");
                ctx.emit(name, args.get(1).cloned().unwrap_or(Value::Null));
                Reply::Value(Value::Null)
            }
            "burst" => {
                let n = args.first().and_then(Value::as_u64).unwrap_or(0);
                for i in 1..=n {
                    ctx.emit("tick", json!(i));
                }
                Reply::Value(json!(n))
            }
            "fail" => Reply::Error(RemoteError {
                code: "counter_failure".into(),
                reason: args
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or("requested failure")
                    .to_string(),
                metadata: Some(json!({ "count": self.count })),
            }),
            "hang" => Reply::Never,
            other => Reply::Error(RemoteError {
                code: codes::ACTION_NOT_FOUND.into(),
                reason: format!("no action named '{}'", other),
                metadata: None,
            }),
        }
    }
}

type Factory = Box<dyn Fn(Option<&Value>) -> Box<dyn ActorBehavior> + Send + Sync>;

struct Peer {
    actor_id: String,
    encoding: Encoding,
    subscriptions: HashSet<String>,
    outbox: mpsc::UnboundedSender<Vec<u8>>,
}

impl Peer {
    fn push(&self, frame: &ToClient) {
        match self.encoding.encode(frame) {
            Ok(bytes) => {
                let _ = self.outbox.send(bytes);
            }
            Err(e) => tracing::error!(error = %e, "mock server failed to encode frame"),
        }
    }
}

#[derive(Default)]
struct ServerState {
    factories: HashMap<String, Factory>,
    actors: HashMap<String, Box<dyn ActorBehavior>>,
    identities: HashMap<(String, Tags), String>,
    peers: HashMap<u64, Peer>,
    next_actor: u64,
    next_peer: u64,
    duplicate_replies: bool,
    received: Vec<ToServer>,
}

impl ServerState {
    fn spawn_actor(&mut self, actor_type: &str, params: Option<&Value>) -> Option<String> {
        let behavior = self.factories.get(actor_type)?(params);
        self.next_actor += 1;
        let actor_id = format!("{}-{}", actor_type, self.next_actor);
        self.actors.insert(actor_id.clone(), behavior);
        Some(actor_id)
    }

    fn resolve(&mut self, request: ResolveRequest) -> ToClient {
        let rejected = |code: &str, reason: String| {
            ToClient::Error(ErrorFrame {
                correlation_id: None,
                code: code.to_string(),
                reason,
                metadata: None,
            })
        };

        if request.mode == ResolveMode::GetForId {
            return match request.actor_id {
                Some(id) if self.actors.contains_key(&id) => ToClient::Resolved(ResolvedFrame { handle_id: id }),
                Some(id) => rejected(codes::ACTOR_NOT_FOUND, format!("no actor with id '{}'", id)),
                None => rejected(codes::ACTOR_NOT_FOUND, "missing actor id".into()),
            };
        }

        let Some(actor_type) = request.actor_type else {
            return rejected(codes::ACTOR_NOT_FOUND, "missing actor type".into());
        };
        if request.tags.keys().any(|k| k.is_empty()) {
            return rejected(codes::INVALID_TAGS, "tag keys must not be empty".into());
        }
        if !self.factories.contains_key(&actor_type) {
            return rejected(codes::ACTOR_NOT_FOUND, format!("unknown actor type '{}'", actor_type));
        }

        let identity = (actor_type.clone(), request.tags);
        let existing = self.identities.get(&identity).cloned();

        let actor_id = match (request.mode, existing) {
            (ResolveMode::Get | ResolveMode::GetOrCreate, Some(id)) => id,
            (ResolveMode::Get, None) => {
                return rejected(codes::ACTOR_NOT_FOUND, format!("no '{}' actor with these tags", actor_type));
            }
            (_, existing) => {
                let Some(id) = self.spawn_actor(&actor_type, request.params.as_ref()) else {
                    return rejected(codes::INTERNAL, "actor factory vanished".into());
                };
                if existing.is_none() {
                    self.identities.insert(identity, id.clone());
                }
                id
            }
        };

        ToClient::Resolved(ResolvedFrame { handle_id: actor_id })
    }

    fn call(&mut self, peer_id: u64, request: CallRequest) {
        let Some(peer) = self.peers.get(&peer_id) else {
            return;
        };

        let failure = |code: &str, reason: String| {
            ToClient::Error(ErrorFrame {
                correlation_id: Some(request.correlation_id),
                code: code.to_string(),
                reason,
                metadata: None,
            })
        };

        if request.handle_id != peer.actor_id {
            peer.push(&failure(codes::INTERNAL, "call addressed to another actor".into()));
            return;
        }
        let actor_id = peer.actor_id.clone();
        let Some(actor) = self.actors.get_mut(&actor_id) else {
            peer.push(&failure(codes::ACTOR_NOT_FOUND, "actor is gone".into()));
            return;
        };

        let mut ctx = ActorContext::default();
        let reply = actor.handle(&request.action, &request.args, &mut ctx);

        for (name, payload) in ctx.emitted {
            self.broadcast(&actor_id, &name, payload);
        }

        let frame = match reply {
            Reply::Value(value) => ToClient::Result(ResultFrame {
                correlation_id: request.correlation_id,
                value,
            }),
            Reply::Error(e) => ToClient::Error(ErrorFrame {
                correlation_id: Some(request.correlation_id),
                code: e.code,
                reason: e.reason,
                metadata: e.metadata,
            }),
            Reply::Never => return,
        };

        if let Some(peer) = self.peers.get(&peer_id) {
            peer.push(&frame);
            if self.duplicate_replies {
                peer.push(&frame);
            }
        }
    }

    /// Sends an event to every connection of `actor_id` subscribed to `name`.
    fn broadcast(&self, actor_id: &str, name: &str, payload: Value) {
        let frame = ToClient::Event(EventFrame {
            handle_id: actor_id.to_string(),
            event_name: name.to_string(),
            payload,
        });

        let mut peers: Vec<(&u64, &Peer)> = self
            .peers
            .iter()
            .filter(|(_, p)| p.actor_id == actor_id && p.subscriptions.contains(name))
            .collect();
        peers.sort_by_key(|(id, _)| **id);

        for (_, peer) in peers {
            peer.push(&frame);
        }
    }
}

struct ServerInner {
    encoding: Encoding,
    state: Mutex<ServerState>,
}

impl ServerInner {
    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An in-memory actor runtime. Clones share the same state.
#[derive(Clone)]
pub struct MockServer {
    inner: Arc<ServerInner>,
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServer {
    /// A server speaking JSON on the resolve channel.
    pub fn new() -> Self {
        Self::with_encoding(Encoding::Json)
    }

    pub fn with_encoding(encoding: Encoding) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                encoding,
                state: Mutex::new(ServerState::default()),
            }),
        }
    }

    /// Registers [`Counter`] under the actor type `counter`.
    pub fn with_counter(self) -> Self {
        self.register("counter", Counter::new);
        self
    }

    /// Registers an actor type. `factory` receives the creation parameters.
    pub fn register<F, B>(&self, actor_type: &str, factory: F)
    where
        F: Fn(Option<&Value>) -> B + Send + Sync + 'static,
        B: ActorBehavior,
    {
        self.inner.lock().factories.insert(
            actor_type.to_string(),
            Box::new(move |params: Option<&Value>| Box::new(factory(params)) as Box<dyn ActorBehavior>),
        );
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    /// Makes every later reply arrive twice.
    pub fn set_duplicate_replies(&self, enabled: bool) {
        self.inner.lock().duplicate_replies = enabled;
    }

    /// Drops every open connection, as if the network went away.
    pub fn sever(&self) {
        self.inner.lock().peers.clear();
    }

    /// Pushes raw bytes to every connection of `actor_id`, bypassing subscriptions.
    pub fn inject(&self, actor_id: &str, bytes: &[u8]) {
        for peer in self.inner.lock().peers.values().filter(|p| p.actor_id == actor_id) {
            let _ = peer.outbox.send(bytes.to_vec());
        }
    }

    /// Emits an event from `actor_id` to its subscribed connections.
    pub fn emit(&self, actor_id: &str, name: &str, payload: Value) {
        self.inner.lock().broadcast(actor_id, name, payload);
    }

    /// Open connections to `actor_id`.
    pub fn connections(&self, actor_id: &str) -> usize {
        self.inner.lock().peers.values().filter(|p| p.actor_id == actor_id).count()
    }

    /// Whether some connection to `actor_id` is subscribed to `name`.
    pub fn is_subscribed(&self, actor_id: &str, name: &str) -> bool {
        self.inner
            .lock()
            .peers
            .values()
            .any(|p| p.actor_id == actor_id && p.subscriptions.contains(name))
    }

    pub fn actor_count(&self) -> usize {
        self.inner.lock().actors.len()
    }

    /// Every frame the server has received, in order.
    pub fn received(&self) -> Vec<ToServer> {
        self.inner.lock().received.clone()
    }
}

#[async_trait::async_trait]
impl Transport for MockServer {
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        let encoding = self.inner.encoding;
        let frame: ToServer = encoding
            .decode(payload)
            .map_err(|e| TransportError::Rejected { status: 400, body: e.to_string() })?;

        let mut state = self.inner.lock();
        state.received.push(frame.clone());

        let reply = match frame {
            ToServer::Resolve(request) => state.resolve(request),
            _ => ToClient::Error(ErrorFrame {
                correlation_id: None,
                code: codes::INTERNAL.into(),
                reason: "only resolve is accepted here".into(),
                metadata: None,
            }),
        };

        encoding.encode(&reply).map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn open(&self, actor_id: &str, encoding: Encoding) -> transport::Result<Box<dyn Connection>> {
        let (outbox, inbox) = mpsc::unbounded_channel();

        let mut state = self.inner.lock();
        if !state.actors.contains_key(actor_id) {
            return Err(TransportError::ConnectionLost(format!("no actor with id '{}'", actor_id)));
        }

        state.next_peer += 1;
        let peer_id = state.next_peer;
        state.peers.insert(
            peer_id,
            Peer {
                actor_id: actor_id.to_string(),
                encoding,
                subscriptions: HashSet::new(),
                outbox,
            },
        );

        Ok(Box::new(MockConnection {
            server: self.inner.clone(),
            peer_id,
            encoding,
            inbox: tokio::sync::Mutex::new(inbox),
        }))
    }
}

/// The client side of one mock connection.
struct MockConnection {
    server: Arc<ServerInner>,
    peer_id: u64,
    encoding: Encoding,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

#[async_trait::async_trait]
impl Connection for MockConnection {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        let mut state = self.server.lock();
        if !state.peers.contains_key(&self.peer_id) {
            return Err(TransportError::ConnectionLost("connection severed".into()));
        }

        let frame: ToServer = match self.encoding.decode(payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "mock server received a malformed frame");
                return Ok(());
            }
        };
        state.received.push(frame.clone());

        match frame {
            ToServer::Call(request) => state.call(self.peer_id, request),
            ToServer::Subscribe(request) => {
                if let Some(peer) = state.peers.get_mut(&self.peer_id) {
                    if request.subscribe {
                        peer.subscriptions.insert(request.event_name);
                    } else {
                        peer.subscriptions.remove(&request.event_name);
                    }
                }
            }
            ToServer::Resolve(_) => {
                if let Some(peer) = state.peers.get(&self.peer_id) {
                    peer.push(&ToClient::Error(ErrorFrame {
                        correlation_id: None,
                        code: codes::INTERNAL.into(),
                        reason: "resolve is not accepted on a push connection".into(),
                        metadata: None,
                    }));
                }
            }
        }

        Ok(())
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        Ok(self.inbox.lock().await.recv().await)
    }

    async fn close(&self) {
        self.server.lock().peers.remove(&self.peer_id);
    }
}
