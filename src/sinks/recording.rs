//! Recorder keeping every collaborator call in order.
//!
//! Useful for tests and for replaying a queue dump without touching the
//! shared store.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::{
    Contribution, ContributionScorer, DiagnosticStore, FeedKind, GeoEnricher, LivePublisher,
    SinkError, TrendRecorder, UserLoginRecorder,
};
use crate::misp::Tag;

/// One recorded collaborator call.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    TrendingEvent { name: String, timestamp: i64 },
    TrendingTags { tags: Vec<String>, timestamp: i64 },
    TrendingCategory { category: String, timestamp: i64 },
    Sightings { timestamp: Option<i64> },
    FalsePositive { timestamp: Option<i64> },
    TrendingDiscussion { name: String, timestamp: i64 },
    Contribution(Contribution),
    GeoFromIp { value: String, category: String },
    GeoFromPhone { value: String, category: String },
    Publish {
        source: String,
        kind: FeedKind,
        record: JsonValue,
    },
    UserLogin {
        timestamp: i64,
        org: String,
        email: String,
    },
    Diagnostic { key: String, value: String },
}

/// Collaborator implementation that records calls instead of forwarding them.
#[derive(Debug, Default)]
pub struct RecordingSinks {
    calls: Mutex<Vec<SinkCall>>,
}

impl RecordingSinks {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every call recorded so far.
    pub fn calls(&self) -> Vec<SinkCall> {
        self.lock().clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&SinkCall) -> bool) -> usize {
        self.lock().iter().filter(|call| predicate(call)).count()
    }

    /// Forgets every recorded call.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn record(&self, call: SinkCall) -> Result<(), SinkError> {
        self.lock().push(call);
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SinkCall>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TrendRecorder for RecordingSinks {
    async fn add_trending_event(&self, name: &str, timestamp: i64) -> Result<(), SinkError> {
        self.record(SinkCall::TrendingEvent {
            name: name.to_string(),
            timestamp,
        })
    }

    async fn add_trending_tags(&self, tags: &[Tag], timestamp: i64) -> Result<(), SinkError> {
        self.record(SinkCall::TrendingTags {
            tags: tags.iter().map(|t| t.name.clone()).collect(),
            timestamp,
        })
    }

    async fn add_trending_category(
        &self,
        category: &str,
        timestamp: i64,
    ) -> Result<(), SinkError> {
        self.record(SinkCall::TrendingCategory {
            category: category.to_string(),
            timestamp,
        })
    }

    async fn add_sightings(&self, timestamp: Option<i64>) -> Result<(), SinkError> {
        self.record(SinkCall::Sightings { timestamp })
    }

    async fn add_false_positive(&self, timestamp: Option<i64>) -> Result<(), SinkError> {
        self.record(SinkCall::FalsePositive { timestamp })
    }

    async fn add_trending_discussion(
        &self,
        name: &str,
        timestamp: i64,
    ) -> Result<(), SinkError> {
        self.record(SinkCall::TrendingDiscussion {
            name: name.to_string(),
            timestamp,
        })
    }
}

#[async_trait]
impl ContributionScorer for RecordingSinks {
    async fn handle_contribution(&self, contribution: Contribution) -> Result<(), SinkError> {
        self.record(SinkCall::Contribution(contribution))
    }
}

#[async_trait]
impl GeoEnricher for RecordingSinks {
    async fn coord_from_ip(&self, value: &str, category: &str) -> Result<(), SinkError> {
        self.record(SinkCall::GeoFromIp {
            value: value.to_string(),
            category: category.to_string(),
        })
    }

    async fn coord_from_phone(&self, value: &str, category: &str) -> Result<(), SinkError> {
        self.record(SinkCall::GeoFromPhone {
            value: value.to_string(),
            category: category.to_string(),
        })
    }
}

#[async_trait]
impl LivePublisher for RecordingSinks {
    async fn publish_log(
        &self,
        source: &str,
        kind: FeedKind,
        record: JsonValue,
    ) -> Result<(), SinkError> {
        self.record(SinkCall::Publish {
            source: source.to_string(),
            kind,
            record,
        })
    }
}

#[async_trait]
impl UserLoginRecorder for RecordingSinks {
    async fn add_user_login(
        &self,
        timestamp: i64,
        org: &str,
        email: &str,
    ) -> Result<(), SinkError> {
        self.record(SinkCall::UserLogin {
            timestamp,
            org: org.to_string(),
            email: email.to_string(),
        })
    }
}

#[async_trait]
impl DiagnosticStore for RecordingSinks {
    async fn store(&self, key: &str, value: &str) -> Result<(), SinkError> {
        self.record(SinkCall::Diagnostic {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}
