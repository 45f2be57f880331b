//! # Client
//!
//! Entry point: turns actor addresses into [`ActorHandle`]s.

use std::sync::Arc;

use actorwire::Tags;
use serde_json::Value;
use tokio::runtime::Handle;

use crate::config::ClientConfig;
use crate::error::Error;
use crate::error::Result;
use crate::handle::ActorHandle;
use crate::http::HttpTransport;
use crate::reference::ActorQuery;
use crate::reference::ActorReference;
use crate::transport::Transport;

/// Where a `get` that may create the actor should put it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateRequestMetadata {
    /// Tags for the new instance. Defaults to the lookup tags when empty.
    pub tags: Tags,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetOptions {
    pub tags: Tags,
    pub params: Option<Value>,
    /// Fail with `ActorNotFound` instead of creating the instance.
    pub no_create: bool,
    pub create: Option<CreateRequestMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateOptions {
    pub tags: Tags,
    pub params: Option<Value>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetWithIdOptions {
    pub params: Option<Value>,
}

impl GetOptions {
    pub(crate) fn into_reference(self, actor_type: &str) -> ActorReference {
        let query = if self.no_create {
            ActorQuery::Get {
                actor_type: actor_type.to_string(),
                tags: self.tags,
            }
        } else {
            let (tags, region) = match self.create {
                Some(create) if !create.tags.is_empty() => (create.tags, create.region),
                Some(create) => (self.tags, create.region),
                None => (self.tags, None),
            };
            ActorQuery::GetOrCreate {
                actor_type: actor_type.to_string(),
                tags,
                region,
            }
        };

        ActorReference {
            query,
            params: self.params,
        }
    }
}

impl CreateOptions {
    pub(crate) fn into_reference(self, actor_type: &str) -> ActorReference {
        ActorReference {
            query: ActorQuery::Create {
                actor_type: actor_type.to_string(),
                tags: self.tags,
                region: self.region,
            },
            params: self.params,
        }
    }
}

impl GetWithIdOptions {
    pub(crate) fn into_reference(self, actor_id: &str) -> ActorReference {
        ActorReference {
            query: ActorQuery::ById {
                actor_id: actor_id.to_string(),
            },
            params: self.params,
        }
    }
}

/// Resolves actors over a [`Transport`]. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
}

impl Client {
    /// Creates a client that talks HTTP and WebSocket to `config.endpoint`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Creates a client over a custom transport.
    pub fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Gets the `actor_type` instance matching `opts.tags`, creating it unless `no_create`.
    pub async fn get(&self, actor_type: &str, opts: GetOptions) -> Result<ActorHandle> {
        self.resolve(opts.into_reference(actor_type)).await
    }

    /// Creates a new `actor_type` instance.
    pub async fn create(&self, actor_type: &str, opts: CreateOptions) -> Result<ActorHandle> {
        self.resolve(opts.into_reference(actor_type)).await
    }

    /// Connects to the instance with a known id.
    pub async fn get_with_id(&self, actor_id: &str, opts: GetWithIdOptions) -> Result<ActorHandle> {
        self.resolve(opts.into_reference(actor_id)).await
    }

    /// Resolves `reference` and connects to it.
    ///
    /// The handle's driver task is spawned on the runtime this future runs on.
    pub async fn resolve(&self, reference: ActorReference) -> Result<ActorHandle> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Config(format!("resolve must run inside a tokio runtime: {}", e)))?;

        ActorHandle::connect(self.transport.as_ref(), &reference, &self.config, &runtime).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("config", &self.config).finish()
    }
}
