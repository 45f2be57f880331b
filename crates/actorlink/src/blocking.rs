//! # Blocking Facade
//!
//! The same client and handle API for callers without an async runtime.
//!
//! ## Design
//!
//! Each blocking [`Client`] starts one background thread running a current-thread tokio
//! runtime. That thread drives I/O, timers and every handle's driver task. Blocking
//! operations run the async implementation on the caller's thread with
//! [`tokio::runtime::Handle::block_on`], so both facades share one protocol engine and
//! behave identically.
//!
//! Event callbacks registered through this facade run on the background thread. They fire
//! while the caller is blocked in any operation on the handle, or not blocked at all.
//!
//! ## Panics
//!
//! Blocking operations panic if called from within an async execution context.

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::client::CreateOptions;
use crate::client::GetOptions;
use crate::client::GetWithIdOptions;
use crate::config::ClientConfig;
use crate::engine::LinkState;
use crate::error::Error;
use crate::error::Result;
use crate::reference::ActorReference;
use crate::registry::Event;
use crate::transport::Transport;
use crate::transport::TransportError;

/// The background runtime thread shared by a client and its handles.
struct Driver {
    runtime: Handle,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Driver {
    fn start() -> Result<Arc<Self>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Connection(TransportError::Io(e.to_string())))?;
        let handle = runtime.handle().clone();

        let (shutdown, stopped) = oneshot::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("actorlink-driver".into())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = stopped.await;
                });
                tracing::debug!("driver thread exiting");
            })
            .map_err(|e| Error::Connection(TransportError::Io(e.to_string())))?;

        Ok(Arc::new(Self {
            runtime: handle,
            shutdown: Mutex::new(Some(shutdown)),
            thread: Mutex::new(Some(thread)),
        }))
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.get_mut().ok().and_then(Option::take) {
            let _ = shutdown.send(());
        }

        if let Some(thread) = self.thread.get_mut().ok().and_then(Option::take) {
            // The last reference can be released by a callback running on the driver itself.
            if thread.thread().id() != std::thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

/// Blocking counterpart of [`crate::Client`].
pub struct Client {
    inner: crate::Client,
    driver: Arc<Driver>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let inner = crate::Client::new(config)?;
        Ok(Self {
            inner,
            driver: Driver::start()?,
        })
    }

    pub fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> Result<Self> {
        Ok(Self {
            inner: crate::Client::with_transport(transport, config),
            driver: Driver::start()?,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        self.inner.config()
    }

    pub fn get(&self, actor_type: &str, opts: GetOptions) -> Result<ActorHandle> {
        self.resolve(opts.into_reference(actor_type))
    }

    pub fn create(&self, actor_type: &str, opts: CreateOptions) -> Result<ActorHandle> {
        self.resolve(opts.into_reference(actor_type))
    }

    pub fn get_with_id(&self, actor_id: &str, opts: GetWithIdOptions) -> Result<ActorHandle> {
        self.resolve(opts.into_reference(actor_id))
    }

    pub fn resolve(&self, reference: ActorReference) -> Result<ActorHandle> {
        let inner = self.driver.block_on(self.inner.resolve(reference))?;
        Ok(ActorHandle {
            inner,
            driver: self.driver.clone(),
        })
    }
}

/// Blocking counterpart of [`crate::ActorHandle`].
pub struct ActorHandle {
    inner: crate::ActorHandle,
    driver: Arc<Driver>,
}

impl ActorHandle {
    pub fn actor_id(&self) -> &str {
        self.inner.actor_id()
    }

    pub fn action(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.driver.block_on(self.inner.action(name, args))
    }

    /// Registers `callback` for every future `name` event. It runs on the driver thread.
    pub fn on_event<F>(&self, name: &str, callback: F) -> Result<()>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.on_event(name, callback)
    }

    pub fn subscribe(&self, name: &str) -> Result<()> {
        self.inner.subscribe(name)
    }

    /// Blocks until `count` queued events are available.
    pub fn receive(&self, name: Option<&str>, count: usize) -> Result<Vec<Event>> {
        self.driver.block_on(self.inner.receive(name, count))
    }

    pub fn receive_timeout(&self, name: Option<&str>, count: usize, timeout: Duration) -> Result<Vec<Event>> {
        self.driver.block_on(self.inner.receive_timeout(name, count, timeout))
    }

    pub fn queued_events(&self, name: Option<&str>) -> usize {
        self.inner.queued_events(name)
    }

    pub fn disconnect(&self) {
        self.driver.block_on(self.inner.disconnect());
    }

    pub fn state(&self) -> LinkState {
        self.inner.state()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl std::fmt::Debug for ActorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}
