//! # Actor Addressing
//!
//! What a caller wants to talk to, before anything has been resolved.
//!
//! Identity for tag-based queries is `(actor_type, tags)`. Creation parameters are not part of
//! identity: they are only consulted by the remote side when it creates the instance.

use actorwire::ResolveMode;
use actorwire::ResolveRequest;
use actorwire::Tags;
use serde_json::Value;

use crate::error::Error;
use crate::error::Result;

/// How to find the actor instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorQuery {
    /// The instance with these tags, created if it does not exist yet.
    GetOrCreate {
        actor_type: String,
        tags: Tags,
        region: Option<String>,
    },
    /// The instance with these tags; `ActorNotFound` if it does not exist.
    Get { actor_type: String, tags: Tags },
    /// A brand-new instance.
    Create {
        actor_type: String,
        tags: Tags,
        region: Option<String>,
    },
    /// An instance addressed by the id a previous resolve returned.
    ById { actor_id: String },
}

/// A caller's intent to address one actor instance. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorReference {
    pub query: ActorQuery,
    pub params: Option<Value>,
}

impl ActorReference {
    /// The tagless, get-or-create reference to `actor_type`.
    pub fn new(actor_type: impl Into<String>) -> Self {
        Self {
            query: ActorQuery::GetOrCreate {
                actor_type: actor_type.into(),
                tags: Tags::new(),
                region: None,
            },
            params: None,
        }
    }

    pub fn with_query(query: ActorQuery) -> Self {
        Self { query, params: None }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Adds one tag. Ignored for `ById` references.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Some(tags) = self.tags_mut() {
            tags.insert(key.into(), value.into());
        }
        self
    }

    pub fn actor_type(&self) -> Option<&str> {
        match &self.query {
            ActorQuery::GetOrCreate { actor_type, .. }
            | ActorQuery::Get { actor_type, .. }
            | ActorQuery::Create { actor_type, .. } => Some(actor_type),
            ActorQuery::ById { .. } => None,
        }
    }

    pub fn tags(&self) -> Option<&Tags> {
        match &self.query {
            ActorQuery::GetOrCreate { tags, .. }
            | ActorQuery::Get { tags, .. }
            | ActorQuery::Create { tags, .. } => Some(tags),
            ActorQuery::ById { .. } => None,
        }
    }

    fn tags_mut(&mut self) -> Option<&mut Tags> {
        match &mut self.query {
            ActorQuery::GetOrCreate { tags, .. }
            | ActorQuery::Get { tags, .. }
            | ActorQuery::Create { tags, .. } => Some(tags),
            ActorQuery::ById { .. } => None,
        }
    }

    /// Checks what can be checked locally before anything is sent.
    pub fn validate(&self) -> Result<()> {
        if let Some(actor_type) = self.actor_type() {
            if actor_type.is_empty() {
                return Err(Error::ActorNotFound("actor type must not be empty".into()));
            }
        }

        if let ActorQuery::ById { actor_id } = &self.query {
            if actor_id.is_empty() {
                return Err(Error::ActorNotFound("actor id must not be empty".into()));
            }
        }

        if let Some(tags) = self.tags() {
            if tags.keys().any(|k| k.is_empty()) {
                return Err(Error::InvalidTags("tag keys must not be empty".into()));
            }
        }

        Ok(())
    }

    /// Builds the resolve frame for this reference.
    pub fn to_request(&self) -> ResolveRequest {
        let (actor_type, actor_id, tags, mode, region) = match &self.query {
            ActorQuery::GetOrCreate { actor_type, tags, region } => (
                Some(actor_type.clone()),
                None,
                tags.clone(),
                ResolveMode::GetOrCreate,
                region.clone(),
            ),
            ActorQuery::Get { actor_type, tags } => {
                (Some(actor_type.clone()), None, tags.clone(), ResolveMode::Get, None)
            }
            ActorQuery::Create { actor_type, tags, region } => (
                Some(actor_type.clone()),
                None,
                tags.clone(),
                ResolveMode::Create,
                region.clone(),
            ),
            ActorQuery::ById { actor_id } => {
                (None, Some(actor_id.clone()), Tags::new(), ResolveMode::GetForId, None)
            }
        };

        ResolveRequest {
            actor_type,
            actor_id,
            tags,
            params: self.params.clone(),
            mode,
            region,
        }
    }
}

impl std::fmt::Display for ActorReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.query {
            ActorQuery::ById { actor_id } => write!(f, "#{}", actor_id),
            _ => {
                write!(f, "{}", self.actor_type().unwrap_or_default())?;
                if let Some(tags) = self.tags().filter(|t| !t.is_empty()) {
                    let pairs: Vec<String> = tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                    write!(f, "[{}]", pairs.join(","))?;
                }
                Ok(())
            }
        }
    }
}
