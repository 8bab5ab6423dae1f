//! Error types for the dispatcher
//!
//! This module defines the crate-level error type used throughout the
//! dispatcher, using `thiserror` for ergonomic error handling. Component
//! specific errors (queue, remote lookup, sinks) live next to their
//! components and convert into [`DispatchError`].

use thiserror::Error;

use crate::misp::client::ResolverError;
use crate::queue::QueueError;
use crate::sinks::SinkError;

/// Main error type for dispatcher operations
///
/// Covers configuration loading, envelope decoding, routing failures
/// inside handlers, and failures of the collaborators the handlers call.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Envelope or topic-split decoding errors
    #[error("Decode error: {0}")]
    Decode(String),

    /// A handler expected a field the payload does not carry
    #[error("Missing field: {0}")]
    MissingField(String),

    /// Remote tag-cascade lookup failed
    #[error("Remote lookup error: {0}")]
    Remote(#[from] ResolverError),

    /// A downstream sink rejected a call
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Queue backend errors
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DispatchError {
    /// Shorthand for a [`DispatchError::MissingField`] naming the field path.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }
}

/// Result type alias for dispatcher operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
