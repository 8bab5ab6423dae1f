//! Downstream collaborators
//!
//! The dispatcher only forwards derived records; counting, scoring,
//! geolocation and live-feed rendering happen elsewhere. Each collaborator
//! is an async trait so the dispatcher can be wired to Redis in production
//! and to an in-memory recorder in tests.
//!
//! # Modules
//!
//! - [`store`]: Forwarding adapter writing to the shared Redis store
//! - [`recording`]: Recorder keeping every call in order

pub mod recording;
pub mod store;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::misp::Tag;

pub use self::recording::{RecordingSinks, SinkCall};
pub use self::store::RedisSinks;

/// Errors raised by a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Redis error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Record could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other failure.
    #[error("other: {0}")]
    Other(String),
}

/// Entity kind credited by a contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContributionKind {
    /// A whole event.
    Event,
    /// A direct event attribute.
    Attribute,
    /// An attribute owned by an object.
    ObjectAttribute,
    /// A sighting.
    Sighting,
    /// A discussion post.
    Discussion,
}

/// A contribution-scoring request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contribution {
    /// Feed the message came from.
    pub source: String,
    /// Contributing organisation.
    pub org: String,
    /// What was contributed.
    pub kind: ContributionKind,
    /// Category of the contributed attribute, if any.
    pub category: Option<String>,
    /// Action that produced the message.
    pub action: Option<String>,
    /// Whether the contribution carries tags.
    pub labeled: bool,
    /// Point multiplier applied by the scorer.
    pub point_multiplier: u32,
}

impl Contribution {
    /// Builds an unlabeled contribution with a multiplier of 1.
    pub fn new(source: &str, org: &str, kind: ContributionKind) -> Self {
        Self {
            source: source.to_string(),
            org: org.to_string(),
            kind,
            category: None,
            action: None,
            labeled: false,
            point_multiplier: 1,
        }
    }
}

/// Kind under which a live-feed record is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    /// Uptime heartbeat.
    Keepalive,
    /// Direct event attribute.
    Attribute,
    /// Object-owned attribute.
    ObjectAttribute,
}

impl FeedKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Keepalive => "Keepalive",
            FeedKind::Attribute => "Attribute",
            FeedKind::ObjectAttribute => "ObjectAttribute",
        }
    }
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trend counters.
#[async_trait]
pub trait TrendRecorder: Send + Sync {
    /// Counts an event by display name.
    async fn add_trending_event(&self, name: &str, timestamp: i64) -> Result<(), SinkError>;
    /// Counts each tag by name.
    async fn add_trending_tags(&self, tags: &[Tag], timestamp: i64) -> Result<(), SinkError>;
    /// Counts an attribute category.
    async fn add_trending_category(&self, category: &str, timestamp: i64)
        -> Result<(), SinkError>;
    /// Counts a sighting; `None` when the sighting carries no timestamp.
    async fn add_sightings(&self, timestamp: Option<i64>) -> Result<(), SinkError>;
    /// Counts a false-positive report; `None` when it carries no timestamp.
    async fn add_false_positive(&self, timestamp: Option<i64>) -> Result<(), SinkError>;
    /// Counts a discussion.
    async fn add_trending_discussion(&self, name: &str, timestamp: i64)
        -> Result<(), SinkError>;
}

/// Contribution scoring.
#[async_trait]
pub trait ContributionScorer: Send + Sync {
    /// Credits an organisation for a contribution.
    async fn handle_contribution(&self, contribution: Contribution) -> Result<(), SinkError>;
}

/// Geolocation enrichment.
#[async_trait]
pub trait GeoEnricher: Send + Sync {
    /// Geolocates an IP address and publishes the coordinates.
    async fn coord_from_ip(&self, value: &str, category: &str) -> Result<(), SinkError>;
    /// Geolocates a phone number and publishes the coordinates.
    async fn coord_from_phone(&self, value: &str, category: &str) -> Result<(), SinkError>;
}

/// Live-feed publication.
#[async_trait]
pub trait LivePublisher: Send + Sync {
    /// Publishes `record` under `kind` for feed `source`.
    async fn publish_log(
        &self,
        source: &str,
        kind: FeedKind,
        record: JsonValue,
    ) -> Result<(), SinkError>;
}

/// User login history.
#[async_trait]
pub trait UserLoginRecorder: Send + Sync {
    /// Records a login of `email` from `org` at `timestamp`.
    async fn add_user_login(&self, timestamp: i64, org: &str, email: &str)
        -> Result<(), SinkError>;
}

/// Key/value side store for diagnostics.
#[async_trait]
pub trait DiagnosticStore: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value.
    async fn store(&self, key: &str, value: &str) -> Result<(), SinkError>;
}

/// Handles to every collaborator, built once at startup.
#[derive(Clone)]
pub struct Sinks {
    /// Trend counters.
    pub trends: Arc<dyn TrendRecorder>,
    /// Contribution scoring.
    pub contributions: Arc<dyn ContributionScorer>,
    /// Geolocation enrichment.
    pub geo: Arc<dyn GeoEnricher>,
    /// Live-feed publication.
    pub live: Arc<dyn LivePublisher>,
    /// User login history.
    pub users: Arc<dyn UserLoginRecorder>,
    /// Diagnostic side store.
    pub diagnostics: Arc<dyn DiagnosticStore>,
}

impl Sinks {
    /// Wires every forwarding collaborator to `sinks` and the side store to
    /// `diagnostics`.
    pub fn from_parts<S, D>(sinks: Arc<S>, diagnostics: Arc<D>) -> Self
    where
        S: TrendRecorder
            + ContributionScorer
            + GeoEnricher
            + LivePublisher
            + UserLoginRecorder
            + 'static,
        D: DiagnosticStore + 'static,
    {
        Self {
            trends: sinks.clone(),
            contributions: sinks.clone(),
            geo: sinks.clone(),
            live: sinks.clone(),
            users: sinks,
            diagnostics,
        }
    }
}
