//! # Error Definitions
//!
//! Failures of the codec itself. Failures reported *by the remote side* travel inside
//! an `error` frame and are not represented here.

/// Operational failures while turning frames into bytes and back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The frame could not be serialized.
    Encode(String),
    /// The bytes were not a valid frame for the chosen encoding.
    Decode(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(msg) => write!(f, "Encode error: {}", msg),
            Self::Decode(msg) => write!(f, "Decode error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Self::Encode(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// A specialized Result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;
