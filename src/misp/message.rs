//! Platform message types consumed by the dispatcher.
//!
//! The upstream publisher is loose about shapes: identifiers arrive as
//! strings or numbers, timestamps as strings or integers, and `Attribute`,
//! `Object` and `Tag` members as either a single object or a list. All of
//! that is normalized here, at deserialization time, so handlers only ever
//! see owned strings, `i64` timestamps and `Vec`s.
//!
//! # Example
//!
//! ```rust
//! use misp_dispatcher::misp::message::Event;
//!
//! let json = r#"{
//!   "id": "42",
//!   "info": "Phishing campaign",
//!   "timestamp": "1700000000",
//!   "Attribute": {"id": "1", "type": "ip-dst", "category": "Network activity",
//!                 "value": "203.0.113.7", "event_id": "42", "object_id": "0"}
//! }"#;
//!
//! let event: Event = serde_json::from_str(json).unwrap();
//! assert_eq!(event.timestamp, Some(1_700_000_000));
//! assert_eq!(event.attributes.as_ref().map(Vec::len), Some(1));
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::DispatchError;

/// `object_id` sentinel marking an attribute owned directly by its event.
pub const NO_OWNING_OBJECT: &str = "0";

/// Queue item produced by the upstream subscriber.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Name of the feed the item was received from.
    #[serde(rename = "zmq_name")]
    pub source_name: String,

    /// `"<topic> <json-payload>"` string.
    pub content: String,
}

/// A tag attached to an event, object or attribute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    /// Tag name, e.g. `tlp:white`.
    pub name: String,

    /// Remaining tag metadata (colour, id, exportable, ...).
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Tag {
    /// Builds a tag carrying only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extra: Map::new(),
        }
    }
}

/// Organisation reference (`Orgc`, `Organisation`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Organisation {
    /// Display name of the organisation.
    #[serde(default)]
    pub name: Option<String>,

    /// Remaining organisation metadata.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// A single indicator value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Attribute {
    /// Attribute identifier.
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,

    /// Attribute type (e.g. `ip-dst`, `phone-number`).
    #[serde(rename = "type", default)]
    pub attr_type: Option<String>,

    /// Attribute category (e.g. `Network activity`).
    #[serde(default)]
    pub category: Option<String>,

    /// Indicator value.
    #[serde(default, deserialize_with = "string_or_number")]
    pub value: Option<String>,

    /// Owning event identifier.
    #[serde(default, deserialize_with = "string_or_number")]
    pub event_id: Option<String>,

    /// Owning object identifier; [`NO_OWNING_OBJECT`] for direct event attributes.
    #[serde(default, deserialize_with = "string_or_number")]
    pub object_id: Option<String>,

    /// Last modification time (unix seconds).
    #[serde(default, deserialize_with = "timestamp")]
    pub timestamp: Option<i64>,

    /// Free-text analyst comment.
    #[serde(default)]
    pub comment: Option<String>,

    /// Tags attached to the attribute.
    #[serde(rename = "Tag", default, deserialize_with = "one_or_many")]
    pub tags: Vec<Tag>,

    /// Remaining attribute metadata.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// Whether a published attribute belongs to its event or to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeOwner {
    /// Owned directly by the event.
    Event,
    /// Owned by an object of the event.
    Object,
}

impl Attribute {
    /// Classifies the attribute by its `object_id`.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::MissingField` when `object_id` is absent.
    pub fn owner(&self) -> Result<AttributeOwner, DispatchError> {
        match require(&self.object_id, "Attribute.object_id")?.as_str() {
            NO_OWNING_OBJECT => Ok(AttributeOwner::Event),
            _ => Ok(AttributeOwner::Object),
        }
    }
}

/// A grouping of attributes (e.g. a `file` object with hashes and a name).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MispObject {
    /// Attributes contained in the object.
    #[serde(rename = "Attribute", default, deserialize_with = "one_or_many")]
    pub attributes: Vec<Attribute>,

    /// Tags carried by the object itself.
    #[serde(rename = "Tag", default, deserialize_with = "one_or_many")]
    pub tags: Vec<Tag>,

    /// Remaining object metadata (name, uuid, meta-category, ...).
    #[serde(flatten)]
    pub meta: Map<String, JsonValue>,
}

impl MispObject {
    /// Copy of the object without its attribute list.
    pub fn sole(&self) -> JsonValue {
        let mut meta = self.meta.clone();
        if !self.tags.is_empty() {
            meta.insert(
                "Tag".to_string(),
                serde_json::to_value(&self.tags).unwrap_or(JsonValue::Null),
            );
        }
        JsonValue::Object(meta)
    }
}

/// Root of a decomposition tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Event {
    /// Event identifier.
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,

    /// Display name of the event.
    #[serde(default)]
    pub info: Option<String>,

    /// Last modification time (unix seconds).
    #[serde(default, deserialize_with = "timestamp")]
    pub timestamp: Option<i64>,

    /// Creator organisation.
    #[serde(rename = "Orgc", default)]
    pub orgc: Option<Organisation>,

    /// Event-level tags.
    #[serde(rename = "Tag", default, deserialize_with = "one_or_many")]
    pub tags: Vec<Tag>,

    /// Event-tag link records.
    #[serde(rename = "EventTag", default, deserialize_with = "one_or_many")]
    pub event_tags: Vec<JsonValue>,

    /// Direct attributes; `None` when the key is absent.
    #[serde(rename = "Attribute", default, deserialize_with = "optional_one_or_many")]
    pub attributes: Option<Vec<Attribute>>,

    /// Objects; `None` when the key is absent.
    #[serde(rename = "Object", default, deserialize_with = "optional_one_or_many")]
    pub objects: Option<Vec<MispObject>>,

    /// Action that produced the message (`add`, `edit`, ...).
    #[serde(default)]
    pub action: Option<String>,
}

impl Event {
    /// Name of the creator organisation, if attached.
    pub fn org_name(&self) -> Option<&str> {
        self.orgc.as_ref().and_then(|o| o.name.as_deref())
    }

    /// True when the event carries at least one event-level tag.
    pub fn is_labeled(&self) -> bool {
        !self.tags.is_empty() || !self.event_tags.is_empty()
    }

    /// True when the event carries at least one direct attribute.
    pub fn has_attributes(&self) -> bool {
        self.attributes.as_ref().is_some_and(|a| !a.is_empty())
    }
}

/// A sighting (or false-positive report) of an attribute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Sighting {
    /// Context of the sighted attribute's event.
    #[serde(rename = "Event", default)]
    pub event: Option<Event>,

    /// The sighted attribute.
    #[serde(rename = "Attribute", default)]
    pub attribute: Option<Attribute>,

    /// `"0"` for a sighting, `"1"` for a false positive.
    #[serde(rename = "type", default, deserialize_with = "string_or_number")]
    pub sighting_type: Option<String>,

    /// Time of the sighting (unix seconds).
    #[serde(default, deserialize_with = "timestamp")]
    pub date_sighting: Option<i64>,
}

/// Looks up a required field, naming it in the error when absent.
pub fn require<'a, T>(field: &'a Option<T>, name: &str) -> Result<&'a T, DispatchError> {
    field.as_ref().ok_or_else(|| DispatchError::missing(name))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> From<OneOrMany<T>> for Vec<T> {
    fn from(value: OneOrMany<T>) -> Self {
        match value {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

pub(crate) fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let value: Option<OneOrMany<T>> = Option::deserialize(deserializer)?;
    Ok(value.map(Vec::from).unwrap_or_default())
}

fn optional_one_or_many<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let value: Option<OneOrMany<T>> = Option::deserialize(deserializer)?;
    Ok(Some(value.map(Vec::from).unwrap_or_default()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Scalar> = Option::deserialize(deserializer)?;
    Ok(value.map(|v| match v {
        Scalar::Int(i) => i.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::Str(s) => s,
        Scalar::Bool(b) => b.to_string(),
    }))
}

fn timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value: Option<Scalar> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(Scalar::Int(i)) => Ok(Some(i)),
        Some(Scalar::Float(f)) => Ok(Some(f as i64)),
        Some(Scalar::Str(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid timestamp: {}", s))),
        Some(Scalar::Bool(b)) => Err(D::Error::custom(format!("invalid timestamp: {}", b))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_deserialize() {
        let json = r#"{"zmq_name":"1","content":"misp_json_self {\"uptime\":123}"}"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.source_name, "1");
        assert!(envelope.content.starts_with("misp_json_self "));
    }

    #[test]
    fn test_attribute_list_and_single_forms_normalize() {
        let single: Event = serde_json::from_value(json!({
            "Attribute": {"id": "1", "category": "Other", "object_id": "0"}
        }))
        .unwrap();
        let list: Event = serde_json::from_value(json!({
            "Attribute": [{"id": "1", "category": "Other", "object_id": "0"}]
        }))
        .unwrap();

        assert_eq!(single.attributes, list.attributes);
        assert_eq!(single.attributes.unwrap().len(), 1);
    }

    #[test]
    fn test_missing_collections_are_absent() {
        let event: Event = serde_json::from_value(json!({"id": "3"})).unwrap();
        assert!(event.attributes.is_none());
        assert!(event.objects.is_none());
        assert!(event.tags.is_empty());
        assert!(!event.has_attributes());
    }

    #[test]
    fn test_numeric_identifiers_become_strings() {
        let attr: Attribute = serde_json::from_value(json!({
            "id": 17, "event_id": 4, "object_id": 0, "timestamp": "1700000001"
        }))
        .unwrap();
        assert_eq!(attr.id.as_deref(), Some("17"));
        assert_eq!(attr.event_id.as_deref(), Some("4"));
        assert_eq!(attr.object_id.as_deref(), Some("0"));
        assert_eq!(attr.timestamp, Some(1_700_000_001));
    }

    #[test]
    fn test_invalid_timestamp_rejected() {
        let result: Result<Attribute, _> =
            serde_json::from_value(json!({"timestamp": "yesterday"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_attribute_owner() {
        let mut attr = Attribute {
            object_id: Some("0".to_string()),
            ..Default::default()
        };
        assert_eq!(attr.owner().unwrap(), AttributeOwner::Event);

        attr.object_id = Some("12".to_string());
        assert_eq!(attr.owner().unwrap(), AttributeOwner::Object);

        attr.object_id = None;
        assert!(matches!(
            attr.owner(),
            Err(DispatchError::MissingField(f)) if f == "Attribute.object_id"
        ));
    }

    #[test]
    fn test_sole_object_drops_attributes() {
        let object: MispObject = serde_json::from_value(json!({
            "name": "file",
            "uuid": "abc",
            "Attribute": [{"id": "1"}, {"id": "2"}]
        }))
        .unwrap();

        assert_eq!(object.attributes.len(), 2);
        let sole = object.sole();
        assert_eq!(sole["name"], "file");
        assert!(sole.get("Attribute").is_none());
    }

    #[test]
    fn test_event_labeled_and_org() {
        let event: Event = serde_json::from_value(json!({
            "Orgc": {"name": "CIRCL"},
            "Tag": [{"name": "tlp:white"}]
        }))
        .unwrap();
        assert!(event.is_labeled());
        assert_eq!(event.org_name(), Some("CIRCL"));

        let bare = Event::default();
        assert!(!bare.is_labeled());
        assert_eq!(bare.org_name(), None);
    }

    #[test]
    fn test_null_tag_list_is_empty() {
        let attr: Attribute = serde_json::from_value(json!({"Tag": null})).unwrap();
        assert!(attr.tags.is_empty());
    }
}
