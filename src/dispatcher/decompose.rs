//! Event decomposition
//!
//! Expands events, objects and sightings into attribute-filter calls. The
//! cascade flag is created at the top of each pass and threaded by mutable
//! reference, so it can go up mid-pass but never reaches another message.

use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use super::filter::{AttributeInput, CascadeFlag};
use super::router::Outcome;
use super::Dispatcher;
use crate::error::DispatchError;
use crate::misp::message::{one_or_many, require};
use crate::misp::{Attribute, Event, MispObject, Organisation, Sighting, Tag};
use crate::sinks::{Contribution, ContributionKind};

/// Sighting type counted as a sighting.
pub const SIGHTING: &str = "0";

/// Sighting type counted as a false positive.
pub const FALSE_POSITIVE: &str = "1";

#[derive(Debug, Deserialize)]
struct EventPayload {
    #[serde(rename = "Event")]
    event: Event,
    #[serde(default)]
    action: Option<String>,
    #[serde(rename = "Orgc", default)]
    orgc: Option<Organisation>,
    #[serde(rename = "EventTag", default, deserialize_with = "one_or_many")]
    event_tags: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct ObjectPayload {
    #[serde(rename = "Object", default)]
    object: Option<MispObject>,
    #[serde(rename = "Event", default)]
    event: Option<Event>,
    #[serde(default)]
    action: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WrappedAttribute {
    #[serde(rename = "Attribute")]
    attribute: Attribute,
    #[serde(rename = "Tag", default, deserialize_with = "one_or_many")]
    tags: Vec<Tag>,
    #[serde(rename = "Event", default)]
    event: Option<Event>,
    #[serde(default)]
    action: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SightingPayload {
    #[serde(rename = "Sighting")]
    sighting: Sighting,
    #[serde(default)]
    action: Option<String>,
}

/// Counts of what one pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Decomposition {
    /// Attribute-filter invocations.
    pub attributes: usize,
    /// Whether the cascade flag was raised by the end of the pass.
    pub cascade: bool,
}

fn parse<T: for<'de> Deserialize<'de>>(payload: JsonValue, what: &str) -> Result<T, DispatchError> {
    serde_json::from_value(payload)
        .map_err(|e| DispatchError::Decode(format!("invalid {} payload: {}", what, e)))
}

impl Dispatcher {
    /// `misp_json`: decomposes the payload when it carries an event with
    /// attributes.
    pub(crate) async fn handle_dispatch(
        &self,
        source: &str,
        payload: JsonValue,
    ) -> Result<Outcome, DispatchError> {
        let has_attributes = payload
            .get("Event")
            .and_then(|event| event.get("Attribute"))
            .is_some();
        if !has_attributes {
            return Ok(Outcome::Skipped("event without attributes".to_string()));
        }
        self.handle_event(source, payload).await
    }

    /// `misp_json_event`
    pub(crate) async fn handle_event(
        &self,
        source: &str,
        payload: JsonValue,
    ) -> Result<Outcome, DispatchError> {
        let payload: EventPayload = parse(payload, "event")?;
        let pass = self.decompose_event(source, &payload).await?;
        debug!(
            attributes = pass.attributes,
            cascade = pass.cascade,
            "Event decomposed"
        );
        Ok(Outcome::Handled)
    }

    async fn decompose_event(
        &self,
        source: &str,
        payload: &EventPayload,
    ) -> Result<Decomposition, DispatchError> {
        let event = &payload.event;
        let name = require(&event.info, "Event.info")?;
        let timestamp = *require(&event.timestamp, "Event.timestamp")?;

        self.sinks.trends.add_trending_event(name, timestamp).await?;
        self.sinks
            .trends
            .add_trending_tags(&event.tags, timestamp)
            .await?;

        let mut cascade = CascadeFlag::default();
        if event.has_attributes() {
            let event_id = require(&event.id, "Event.id")?;
            if self.resolver.has_cascade_tag(event_id).await? {
                info!(event_id = %event_id, "Event carries the cascade tag, importing all attributes");
                cascade.raise();
            }
        }

        let mut pass = Decomposition::default();

        for attribute in event.attributes.iter().flatten() {
            let input = AttributeInput {
                event: Some(event),
                action: payload.action.as_deref(),
                ..AttributeInput::bare(attribute)
            };
            self.filter_attribute(source, input, &mut cascade).await?;
            pass.attributes += 1;
        }

        for object in event.objects.iter().flatten() {
            pass.attributes += self
                .decompose_object(
                    source,
                    object,
                    Some(event),
                    payload.action.as_deref(),
                    &mut cascade,
                )
                .await?;
        }

        let org = event
            .org_name()
            .or_else(|| payload.orgc.as_ref().and_then(|o| o.name.as_deref()));
        match org {
            Some(org) => {
                let mut contribution = Contribution::new(source, org, ContributionKind::Event);
                contribution.action = payload.action.clone().or_else(|| event.action.clone());
                contribution.labeled = event.is_labeled() || !payload.event_tags.is_empty();
                self.sinks
                    .contributions
                    .handle_contribution(contribution)
                    .await?;
            }
            None => debug!("Event has no organisation, contribution skipped"),
        }

        pass.cascade = cascade.is_raised();
        Ok(pass)
    }

    /// Filters every attribute of `object`, returning how many were visited.
    async fn decompose_object(
        &self,
        source: &str,
        object: &MispObject,
        event: Option<&Event>,
        action: Option<&str>,
        cascade: &mut CascadeFlag,
    ) -> Result<usize, DispatchError> {
        let sole = object.sole();
        for attribute in &object.attributes {
            let input = AttributeInput {
                attribute,
                enclosing_tags: &object.tags,
                event,
                parent_object: Some(&sole),
                action,
                already_contributed: false,
            };
            self.filter_attribute(source, input, cascade).await?;
        }
        Ok(object.attributes.len())
    }

    /// `misp_json_object`
    pub(crate) async fn handle_object(
        &self,
        source: &str,
        payload: JsonValue,
    ) -> Result<Outcome, DispatchError> {
        let payload: ObjectPayload = parse(payload, "object")?;
        let Some(object) = payload.object.as_ref() else {
            return Ok(Outcome::Skipped("payload without object".to_string()));
        };
        let event = require(&payload.event, "Event")?;

        let mut cascade = CascadeFlag::default();
        self.decompose_object(
            source,
            object,
            Some(event),
            payload.action.as_deref(),
            &mut cascade,
        )
        .await?;
        Ok(Outcome::Handled)
    }

    /// `misp_json_attribute`: a bare attribute, or one wrapped with its
    /// tags and event context.
    pub(crate) async fn handle_attribute(
        &self,
        source: &str,
        payload: JsonValue,
    ) -> Result<Outcome, DispatchError> {
        let mut cascade = CascadeFlag::default();

        if payload.get("Attribute").is_some() {
            let wrapped: WrappedAttribute = parse(payload, "attribute")?;
            let input = AttributeInput {
                attribute: &wrapped.attribute,
                enclosing_tags: &wrapped.tags,
                event: wrapped.event.as_ref(),
                parent_object: None,
                action: wrapped.action.as_deref(),
                already_contributed: false,
            };
            self.filter_attribute(source, input, &mut cascade).await?;
        } else {
            let attribute: Attribute = parse(payload, "attribute")?;
            self.filter_attribute(source, AttributeInput::bare(&attribute), &mut cascade)
                .await?;
        }

        Ok(Outcome::Handled)
    }

    /// `misp_json_sighting`
    pub(crate) async fn handle_sighting(
        &self,
        source: &str,
        payload: JsonValue,
    ) -> Result<Outcome, DispatchError> {
        let payload: SightingPayload = parse(payload, "sighting")?;
        let sighting = &payload.sighting;

        let event = require(&sighting.event, "Sighting.Event")?;
        let org = event
            .org_name()
            .ok_or_else(|| DispatchError::missing("Sighting.Event.Orgc.name"))?;
        let attribute = require(&sighting.attribute, "Sighting.Attribute")?;
        let category = require(&attribute.category, "Sighting.Attribute.category")?;

        let mut contribution = Contribution::new(source, org, ContributionKind::Sighting);
        contribution.category = Some(category.clone());
        contribution.action = payload.action.clone();
        contribution.point_multiplier = 2;
        self.sinks
            .contributions
            .handle_contribution(contribution)
            .await?;

        let input = AttributeInput {
            attribute,
            enclosing_tags: &[],
            event: Some(event),
            parent_object: None,
            action: payload.action.as_deref(),
            already_contributed: true,
        };
        self.filter_attribute(source, input, &mut CascadeFlag::default())
            .await?;

        match require(&sighting.sighting_type, "Sighting.type")?.as_str() {
            SIGHTING => {
                self.sinks
                    .trends
                    .add_sightings(sighting.date_sighting)
                    .await?
            }
            FALSE_POSITIVE => {
                self.sinks
                    .trends
                    .add_false_positive(sighting.date_sighting)
                    .await?
            }
            other => debug!(sighting_type = %other, "Unknown sighting type, not counted"),
        }

        Ok(Outcome::Handled)
    }
}
