//! Remote tag-cascade lookup.
//!
//! Given an event id, asks the platform for the full event and reports
//! whether its tag list carries the configured "import all attributes" tag.
//! One request per call, no caching and no retry.
//!
//! # Example
//!
//! ```rust,no_run
//! use misp_dispatcher::misp::client::{CascadeCheck, RemoteTagResolver, ResolverConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = RemoteTagResolver::new(ResolverConfig {
//!         base_url: "https://misp.local:8443".to_string(),
//!         auth_key: "secret".to_string(),
//!         cascade_tag: "import-all-attributes".to_string(),
//!         verify_tls: true,
//!     })?;
//!
//!     let cascade = resolver.has_cascade_tag("42").await?;
//!     println!("import all attributes: {}", cascade);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::message::{one_or_many, Tag};

/// Errors that can occur during the remote lookup.
#[derive(Error, Debug)]
pub enum ResolverError {
    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API error with status code.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// Response body is not an event document.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Answers "does this event carry the cascade tag?".
#[async_trait]
pub trait CascadeCheck: Send + Sync {
    /// Returns true iff the event identified by `event_id` carries the cascade tag.
    async fn has_cascade_tag(&self, event_id: &str) -> Result<bool, ResolverError>;
}

/// Remote lookup configuration.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Base URL of the platform (scheme, host and port).
    pub base_url: String,
    /// Value of the `Authorization` header.
    pub auth_key: String,
    /// Tag name that forces every attribute of the event through.
    pub cascade_tag: String,
    /// Verify the server certificate.
    pub verify_tls: bool,
}

/// The part of the event-detail response the lookup reads. Attributes and
/// objects are never deserialized, so malformed fields there cannot fail it.
#[derive(Debug, Deserialize)]
struct EventResponse {
    #[serde(rename = "Event")]
    event: TaggedEvent,
}

#[derive(Debug, Deserialize)]
struct TaggedEvent {
    #[serde(rename = "Tag", default, deserialize_with = "one_or_many")]
    tags: Vec<Tag>,
}

/// [`CascadeCheck`] backed by the platform's event-detail endpoint.
pub struct RemoteTagResolver {
    client: Client,
    config: ResolverConfig,
}

impl RemoteTagResolver {
    /// Creates a new resolver.
    ///
    /// # Errors
    ///
    /// Returns `ResolverError::Http` if the HTTP client cannot be created.
    pub fn new(config: ResolverConfig) -> Result<Self, ResolverError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        Ok(Self { client, config })
    }

    fn event_url(&self, event_id: &str) -> String {
        format!(
            "{}/events/{}",
            self.config.base_url.trim_end_matches('/'),
            event_id
        )
    }
}

#[async_trait]
impl CascadeCheck for RemoteTagResolver {
    async fn has_cascade_tag(&self, event_id: &str) -> Result<bool, ResolverError> {
        let response = self
            .client
            .post(self.event_url(event_id))
            .header("Authorization", &self.config.auth_key)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ResolverError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: EventResponse = serde_json::from_str(&body)?;
        let found = parsed
            .event
            .tags
            .iter()
            .any(|tag| tag.name == self.config.cascade_tag);

        debug!(event_id = %event_id, cascade = found, "Remote tag check");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> ResolverConfig {
        ResolverConfig {
            base_url: base_url.to_string(),
            auth_key: "key".to_string(),
            cascade_tag: "import-all".to_string(),
            verify_tls: false,
        }
    }

    #[test]
    fn test_event_url_joins_path() {
        let resolver = RemoteTagResolver::new(config("https://misp:8443/")).unwrap();
        assert_eq!(resolver.event_url("42"), "https://misp:8443/events/42");
    }

    #[test]
    fn test_resolver_error_display() {
        let err = ResolverError::Api {
            status: 403,
            message: "forbidden".to_string(),
        };
        assert_eq!(err.to_string(), "API error (403): forbidden");
    }

    #[test]
    fn test_event_response_requires_event() {
        let parsed: Result<EventResponse, _> = serde_json::from_str(r#"{"name": "x"}"#);
        assert!(parsed.is_err());

        let parsed: EventResponse =
            serde_json::from_str(r#"{"Event": {"Tag": [{"name": "import-all"}]}}"#).unwrap();
        assert_eq!(parsed.event.tags.len(), 1);
    }

    #[test]
    fn test_event_response_ignores_malformed_attributes() {
        let parsed: EventResponse = serde_json::from_value(serde_json::json!({
            "Event": {
                "Tag": [{"name": "import-all"}],
                "Attribute": [{"id": "1", "timestamp": ""}],
                "Object": {"Attribute": {"object_id": []}}
            }
        }))
        .unwrap();
        assert_eq!(parsed.event.tags[0].name, "import-all");
    }
}
