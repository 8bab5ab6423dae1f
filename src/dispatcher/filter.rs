//! Attribute filter
//!
//! Every attribute reached during decomposition passes through
//! [`Dispatcher::filter_attribute`]. Trend signals are always emitted; the
//! enrichment and live-feed steps only run for values inside the CIDR
//! allowlist or when the event's cascade flag is raised.

use serde_json::{json, Map, Value as JsonValue};
use tracing::debug;

use super::{now, Dispatcher};
use crate::error::DispatchError;
use crate::misp::message::require;
use crate::misp::{Attribute, AttributeOwner, Event, Tag};
use crate::sinks::{Contribution, ContributionKind, FeedKind};

/// Category whose values are geolocated as IP addresses.
pub const NETWORK_ACTIVITY: &str = "Network activity";

/// Attribute type whose values are geolocated as phone numbers.
pub const PHONE_NUMBER: &str = "phone-number";

/// Per-event "import all attributes" flag.
///
/// Lives for one decomposition pass. Raising it is one-way: attributes
/// processed after the flag goes up are import-worthy, earlier ones are not
/// revisited.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CascadeFlag(bool);

impl CascadeFlag {
    /// A flag in the given state.
    pub fn new(raised: bool) -> Self {
        Self(raised)
    }

    /// Raises the flag for the rest of the pass.
    pub fn raise(&mut self) {
        self.0 = true;
    }

    /// Whether the flag is raised.
    pub fn is_raised(&self) -> bool {
        self.0
    }
}

/// One attribute together with the context it was found in.
#[derive(Debug, Clone, Copy)]
pub struct AttributeInput<'a> {
    /// The attribute itself.
    pub attribute: &'a Attribute,
    /// Tag list of the payload that carried the attribute.
    pub enclosing_tags: &'a [Tag],
    /// Owning event, when the attribute arrived with one.
    pub event: Option<&'a Event>,
    /// Parent object without its attribute list.
    pub parent_object: Option<&'a JsonValue>,
    /// Action of the carrying message.
    pub action: Option<&'a str>,
    /// Set when the caller already credited the organisation.
    pub already_contributed: bool,
}

impl<'a> AttributeInput<'a> {
    /// An attribute with no surrounding context; its own tags are the
    /// enclosing tags.
    pub fn bare(attribute: &'a Attribute) -> Self {
        Self {
            attribute,
            enclosing_tags: &attribute.tags,
            event: None,
            parent_object: None,
            action: None,
            already_contributed: false,
        }
    }
}

/// What the filter did with an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    /// The attribute has no value; only trends were emitted.
    NoValue,
    /// The value is neither allowlisted nor covered by the cascade flag.
    Rejected,
    /// Enrichment ran; `published` tells whether a live-feed record went out.
    Accepted { published: bool },
}

impl Dispatcher {
    /// Runs one attribute through trend emission, cascade refresh, the
    /// allowlist test, enrichment and publication.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::MissingField` when a field needed by a step
    /// that applies to this attribute is absent, and sink errors as-is.
    pub async fn filter_attribute(
        &self,
        source: &str,
        input: AttributeInput<'_>,
        cascade: &mut CascadeFlag,
    ) -> Result<FilterVerdict, DispatchError> {
        let attribute = input.attribute;
        let owner = attribute.owner()?;
        let category = require(&attribute.category, "Attribute.category")?;
        let timestamp = attribute.timestamp.unwrap_or_else(now);

        self.sinks
            .trends
            .add_trending_category(category, timestamp)
            .await?;
        self.sinks
            .trends
            .add_trending_tags(&attribute.tags, timestamp)
            .await?;

        if !cascade.is_raised()
            && input
                .enclosing_tags
                .iter()
                .any(|tag| tag.name == self.settings.import_all_tag)
        {
            debug!(tag = %self.settings.import_all_tag, "Cascade tag found on enclosing payload");
            cascade.raise();
        }

        if !input.already_contributed {
            if let Some(org) = input.event.and_then(Event::org_name) {
                let kind = match owner {
                    AttributeOwner::Event => ContributionKind::Attribute,
                    AttributeOwner::Object => ContributionKind::ObjectAttribute,
                };
                let mut contribution = Contribution::new(source, org, kind);
                contribution.category = Some(category.clone());
                contribution.action = input.action.map(str::to_string);
                contribution.labeled = !attribute.tags.is_empty();
                self.sinks
                    .contributions
                    .handle_contribution(contribution)
                    .await?;
            }
        }

        let Some(value) = attribute.value.as_deref() else {
            return Ok(FilterVerdict::NoValue);
        };

        if !(self.allowlist.check_ip(value) || cascade.is_raised()) {
            return Ok(FilterVerdict::Rejected);
        }

        if category == NETWORK_ACTIVITY {
            self.sinks.geo.coord_from_ip(value, category).await?;
        }
        if require(&attribute.attr_type, "Attribute.type")? == PHONE_NUMBER {
            self.sinks.geo.coord_from_phone(value, category).await?;
        }

        let Some(event_id) = attribute.event_id.as_deref() else {
            return Ok(FilterVerdict::Accepted { published: false });
        };

        let record = live_record(event_id, attribute, input.parent_object)?;
        let kind = match owner {
            AttributeOwner::Event => FeedKind::Attribute,
            AttributeOwner::Object => FeedKind::ObjectAttribute,
        };
        self.sinks.live.publish_log(source, kind, record).await?;

        Ok(FilterVerdict::Accepted { published: true })
    }
}

/// Builds the reduced live-feed record for an accepted attribute.
fn live_record(
    event_id: &str,
    attribute: &Attribute,
    parent_object: Option<&JsonValue>,
) -> Result<JsonValue, DispatchError> {
    let reduced = json!({
        "id": require(&attribute.id, "Attribute.id")?,
        "type": require(&attribute.attr_type, "Attribute.type")?,
        "category": require(&attribute.category, "Attribute.category")?,
        "event_id": event_id,
        "timestamp": require(&attribute.timestamp, "Attribute.timestamp")?,
        "value": require(&attribute.value, "Attribute.value")?,
        "comment": attribute.comment.as_deref().unwrap_or_default(),
    });

    let mut record = Map::new();
    record.insert("Event".to_string(), json!({ "id": event_id }));
    record.insert("Attribute".to_string(), reduced);
    if let Some(object) = parent_object {
        record.insert("Object".to_string(), object.clone());
    }
    Ok(JsonValue::Object(record))
}
