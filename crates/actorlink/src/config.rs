//! Client configuration.
//!
//! Built in code with the `with_*` setters or parsed from TOML:
//!
//! ```toml
//! endpoint = "http://127.0.0.1:6420"
//! encoding = "msgpack"
//! connect_timeout_ms = 5000
//! call_timeout_ms = 30000
//! event_queue_capacity = 1024
//! ```

use std::path::Path;
use std::time::Duration;

use actorwire::Encoding;
use serde::Deserialize;
use serde::Deserializer;

use crate::error::Error;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientConfig {
    /// Base address of the actor runtime, `http://` or `https://`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub encoding: Encoding,
    /// Limit for establishing the resolve exchange and the push connection.
    #[serde(default, rename = "connect_timeout_ms", deserialize_with = "opt_millis")]
    pub connect_timeout: Option<Duration>,
    /// Per-call deadline. `None` waits until a reply or a disconnect.
    #[serde(default, rename = "call_timeout_ms", deserialize_with = "opt_millis")]
    pub call_timeout: Option<Duration>,
    /// Bound on undelivered queue-mode events per event name. `None` is unbounded.
    #[serde(default)]
    pub event_queue_capacity: Option<usize>,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:6420".to_string()
}

fn opt_millis<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            encoding: Encoding::default(),
            connect_timeout: None,
            call_timeout: None,
            event_queue_capacity: None,
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = Some(capacity);
        self
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint '{}': {}", self.endpoint, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "endpoint must be http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.event_queue_capacity == Some(0) {
            return Err(Error::Config("event_queue_capacity must be at least 1".into()));
        }

        Ok(())
    }
}
