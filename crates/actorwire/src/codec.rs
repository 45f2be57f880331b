//! # Byte Codec
//!
//! Turns frames into transport messages and back.
//!
//! The codec knows nothing about connections or pending calls. It moves between typed
//! frames and opaque buffers, in one of two encodings.

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Error;
use crate::error::Result;

/// Byte representation of frames on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Encoding {
    /// UTF-8 JSON; sent as text messages.
    #[default]
    #[serde(rename = "json")]
    Json,
    /// MessagePack with named fields; sent as binary messages.
    #[serde(rename = "msgpack")]
    MessagePack,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::MessagePack => "msgpack",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::MessagePack => "application/msgpack",
        }
    }

    /// Whether frames in this encoding travel as binary rather than text messages.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::MessagePack)
    }

    /// Serializes a frame.
    pub fn encode<T: Serialize>(&self, frame: &T) -> Result<Vec<u8>> {
        match self {
            Self::Json => serde_json::to_vec(frame).map_err(|e| Error::Encode(e.to_string())),
            Self::MessagePack => Ok(rmp_serde::to_vec_named(frame)?),
        }
    }

    /// Deserializes a frame.
    ///
    /// Never panics on arbitrary input; every failure is an `Error::Decode`.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Self::Json => serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string())),
            Self::MessagePack => Ok(rmp_serde::from_slice(bytes)?),
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(Self::Json),
            "msgpack" | "messagepack" => Ok(Self::MessagePack),
            other => Err(Error::Decode(format!("unknown encoding: {}", other))),
        }
    }
}

/// Extracts just the correlation id from a raw frame.
///
/// This is useful for logging which call a reply belonged to when full decoding fails
/// (e.g. an unknown `type` tag or a mistyped field).
pub fn peek_correlation_id(encoding: Encoding, bytes: &[u8]) -> Option<u64> {
    let value: Value = encoding.decode(bytes).ok()?;
    value.get("correlationId")?.as_u64()
}
