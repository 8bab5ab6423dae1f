//! Forwarding adapter writing to the shared Redis store.
//!
//! Trend counters are per-day sorted sets and counters; everything that
//! needs further work (scoring, geolocation, login history) is pushed as a
//! JSON work item for the helper that owns it, and live-feed records are
//! published on a channel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info};

use super::{
    Contribution, ContributionScorer, FeedKind, GeoEnricher, LivePublisher, SinkError,
    TrendRecorder, UserLoginRecorder,
};
use crate::misp::Tag;

const TRENDING_EVENTS: &str = "TRENDINGS_EVENTS";
const TRENDING_TAGS: &str = "TRENDINGS_TAGS";
const TRENDING_CATEGORIES: &str = "TRENDINGS_CATEGS";
const TRENDING_DISCUSSIONS: &str = "TRENDINGS_DISC";
const SIGHTINGS: &str = "TRENDINGS_SIGHT_sightings";
const FALSE_POSITIVES: &str = "TRENDINGS_SIGHT_false_positive";
const CONTRIBUTION_QUEUE: &str = "CONTRIB_QUEUE";
const GEO_QUEUE: &str = "GEO_QUEUE";
const LOGIN_QUEUE: &str = "LOGIN_QUEUE";

/// Collaborator implementation backed by Redis.
#[derive(Clone)]
pub struct RedisSinks {
    conn: MultiplexedConnection,
    live_channel: String,
}

impl RedisSinks {
    /// Connects to `redis_url`; live-feed records go to `live_channel`.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Redis` if the server cannot be reached.
    pub async fn connect(redis_url: &str, live_channel: &str) -> Result<Self, SinkError> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(channel = %live_channel, "Connected to sink store");

        Ok(Self {
            conn,
            live_channel: live_channel.to_string(),
        })
    }

    async fn bump(&self, prefix: &str, member: &str, timestamp: i64) -> Result<(), SinkError> {
        let mut conn = self.conn.clone();
        conn.zincr::<_, _, _, ()>(day_key(prefix, Some(timestamp)), member, 1)
            .await?;
        Ok(())
    }

    async fn count(&self, prefix: &str, timestamp: Option<i64>) -> Result<(), SinkError> {
        let mut conn = self.conn.clone();
        conn.incr::<_, _, ()>(day_key(prefix, timestamp), 1).await?;
        Ok(())
    }

    async fn enqueue(&self, queue: &str, item: JsonValue) -> Result<(), SinkError> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(queue, serde_json::to_string(&item)?)
            .await?;
        Ok(())
    }
}

/// `<prefix>:<YYYYMMDD>` for the day containing `timestamp` (today when absent).
fn day_key(prefix: &str, timestamp: Option<i64>) -> String {
    let day = timestamp
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .unwrap_or_else(Utc::now);
    format!("{}:{}", prefix, day.format("%Y%m%d"))
}

#[async_trait]
impl TrendRecorder for RedisSinks {
    async fn add_trending_event(&self, name: &str, timestamp: i64) -> Result<(), SinkError> {
        self.bump(TRENDING_EVENTS, name, timestamp).await
    }

    async fn add_trending_tags(&self, tags: &[Tag], timestamp: i64) -> Result<(), SinkError> {
        for tag in tags {
            self.bump(TRENDING_TAGS, &serde_json::to_string(tag)?, timestamp)
                .await?;
        }
        Ok(())
    }

    async fn add_trending_category(
        &self,
        category: &str,
        timestamp: i64,
    ) -> Result<(), SinkError> {
        self.bump(TRENDING_CATEGORIES, category, timestamp).await
    }

    async fn add_sightings(&self, timestamp: Option<i64>) -> Result<(), SinkError> {
        self.count(SIGHTINGS, timestamp).await
    }

    async fn add_false_positive(&self, timestamp: Option<i64>) -> Result<(), SinkError> {
        self.count(FALSE_POSITIVES, timestamp).await
    }

    async fn add_trending_discussion(
        &self,
        name: &str,
        timestamp: i64,
    ) -> Result<(), SinkError> {
        self.bump(TRENDING_DISCUSSIONS, name, timestamp).await
    }
}

#[async_trait]
impl ContributionScorer for RedisSinks {
    async fn handle_contribution(&self, contribution: Contribution) -> Result<(), SinkError> {
        debug!(org = %contribution.org, kind = ?contribution.kind, "Forwarding contribution");
        self.enqueue(CONTRIBUTION_QUEUE, serde_json::to_value(&contribution)?)
            .await
    }
}

#[async_trait]
impl GeoEnricher for RedisSinks {
    async fn coord_from_ip(&self, value: &str, category: &str) -> Result<(), SinkError> {
        self.enqueue(
            GEO_QUEUE,
            json!({"kind": "ip", "value": value, "category": category}),
        )
        .await
    }

    async fn coord_from_phone(&self, value: &str, category: &str) -> Result<(), SinkError> {
        self.enqueue(
            GEO_QUEUE,
            json!({"kind": "phone", "value": value, "category": category}),
        )
        .await
    }
}

#[async_trait]
impl LivePublisher for RedisSinks {
    async fn publish_log(
        &self,
        source: &str,
        kind: FeedKind,
        record: JsonValue,
    ) -> Result<(), SinkError> {
        let message = json!({"name": kind.as_str(), "log": record, "zmqName": source});
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(&self.live_channel, serde_json::to_string(&message)?)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UserLoginRecorder for RedisSinks {
    async fn add_user_login(
        &self,
        timestamp: i64,
        org: &str,
        email: &str,
    ) -> Result<(), SinkError> {
        self.enqueue(
            LOGIN_QUEUE,
            json!({"timestamp": timestamp, "org": org, "email": email}),
        )
        .await
    }
}
