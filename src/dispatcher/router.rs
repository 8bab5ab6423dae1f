//! Topic router
//!
//! Decodes queue items and routes their payload to the handler registered
//! for the topic. Handler failures are turned into [`Outcome::Dropped`] here
//! so a bad message never reaches the consumer loop as an error.

use std::fmt;

use serde_json::Value as JsonValue;
use tracing::{error, info_span, Instrument};

use super::Dispatcher;
use crate::error::DispatchError;
use crate::misp::Envelope;

/// Topics the platform publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Generic event notification; decomposed only when it has attributes.
    MispJson,
    /// Full event.
    Event,
    /// Publisher heartbeat.
    SelfKeepalive,
    /// Single attribute.
    Attribute,
    /// Single object.
    Object,
    /// Sighting or false positive.
    Sighting,
    /// Organisation change.
    Organisation,
    /// User change.
    User,
    /// Discussion post.
    Conversation,
    /// Object reference change.
    ObjectReference,
    /// Audit log entry.
    Audit,
    /// Round-trip measurement from the diagnostic tool.
    Diagnostic,
}

impl Topic {
    /// Every topic, in wire-name order.
    pub const ALL: [Topic; 12] = [
        Topic::MispJson,
        Topic::Event,
        Topic::SelfKeepalive,
        Topic::Attribute,
        Topic::Object,
        Topic::Sighting,
        Topic::Organisation,
        Topic::User,
        Topic::Conversation,
        Topic::ObjectReference,
        Topic::Audit,
        Topic::Diagnostic,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::MispJson => "misp_json",
            Topic::Event => "misp_json_event",
            Topic::SelfKeepalive => "misp_json_self",
            Topic::Attribute => "misp_json_attribute",
            Topic::Object => "misp_json_object",
            Topic::Sighting => "misp_json_sighting",
            Topic::Organisation => "misp_json_organisation",
            Topic::User => "misp_json_user",
            Topic::Conversation => "misp_json_conversation",
            Topic::ObjectReference => "misp_json_object_reference",
            Topic::Audit => "misp_json_audit",
            Topic::Diagnostic => "diagnostic_channel",
        }
    }

    /// Looks a wire name up; `None` for unrecognized topics.
    pub fn parse(name: &str) -> Option<Topic> {
        Self::ALL.iter().copied().find(|topic| topic.as_str() == name)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a message was dropped.
#[derive(Debug)]
pub enum DropReason {
    /// No handler is registered for the topic.
    UnknownTopic(String),
    /// The handler failed (missing field, remote lookup, sink error).
    Failed(DispatchError),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::UnknownTopic(topic) => write!(f, "unknown topic {}", topic),
            DropReason::Failed(e) => write!(f, "{}", e),
        }
    }
}

/// Result of routing one message.
#[derive(Debug)]
pub enum Outcome {
    /// The handler ran to completion.
    Handled,
    /// The message was recognized but deliberately not processed.
    Skipped(String),
    /// The message was dropped.
    Dropped(DropReason),
}

impl Outcome {
    /// True for [`Outcome::Dropped`].
    pub fn is_dropped(&self) -> bool {
        matches!(self, Outcome::Dropped(_))
    }
}

/// Splits `"<topic> <json>"` on the first space.
///
/// # Errors
///
/// Returns `DispatchError::Decode` when the content has no space.
pub fn split_content(content: &str) -> Result<(&str, &str), DispatchError> {
    content
        .split_once(' ')
        .ok_or_else(|| DispatchError::Decode(format!("content has no topic: {:.80}", content)))
}

impl Dispatcher {
    /// Decodes one raw queue item and routes it.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Decode` when the envelope, the topic split or
    /// the payload JSON is malformed. Everything past decoding is reported
    /// through the returned [`Outcome`].
    pub async fn process_item(&self, raw: &str) -> Result<Outcome, DispatchError> {
        let envelope: Envelope = serde_json::from_str(raw)
            .map_err(|e| DispatchError::Decode(format!("invalid envelope: {}", e)))?;
        let (topic, body) = split_content(&envelope.content)?;
        let payload: JsonValue = serde_json::from_str(body)
            .map_err(|e| DispatchError::Decode(format!("invalid {} payload: {}", topic, e)))?;

        Ok(self.route(&envelope.source_name, topic, payload).await)
    }

    /// Routes a decoded payload to its handler.
    ///
    /// Never fails: unknown topics and handler errors are logged and
    /// returned as [`Outcome::Dropped`].
    pub async fn route(&self, source: &str, topic: &str, payload: JsonValue) -> Outcome {
        let span = info_span!("dispatch", source = %source, topic = %topic);

        async move {
            let Some(known) = Topic::parse(topic) else {
                error!("Unrecognized topic, message dropped");
                return Outcome::Dropped(DropReason::UnknownTopic(topic.to_string()));
            };

            match self.handle(source, known, payload).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Handler failed, message dropped");
                    Outcome::Dropped(DropReason::Failed(e))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn handle(
        &self,
        source: &str,
        topic: Topic,
        payload: JsonValue,
    ) -> Result<Outcome, DispatchError> {
        match topic {
            Topic::MispJson => self.handle_dispatch(source, payload).await,
            Topic::Event => self.handle_event(source, payload).await,
            Topic::SelfKeepalive => self.handle_keepalive(source, payload).await,
            Topic::Attribute => self.handle_attribute(source, payload).await,
            Topic::Object => self.handle_object(source, payload).await,
            Topic::Sighting => self.handle_sighting(source, payload).await,
            Topic::User => self.handle_user(source, payload).await,
            Topic::Conversation => self.handle_conversation(source, payload).await,
            Topic::Audit => self.handle_audit(source, payload).await,
            Topic::Diagnostic => Ok(self.handle_diagnostic(source, payload).await),
            Topic::Organisation | Topic::ObjectReference => Ok(self.handle_skip(source, payload)),
        }
    }
}
