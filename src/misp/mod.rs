//! Platform integration
//!
//! Types for the event documents carried on the work queue and the client
//! used to consult the platform about an event's tags.
//!
//! # Submodules
//!
//! - [`message`]: Envelope, event, object, attribute and sighting types
//! - [`client`]: Remote tag-cascade lookup

pub mod client;
pub mod message;

pub use client::{CascadeCheck, RemoteTagResolver, ResolverConfig, ResolverError};
pub use message::{
    Attribute, AttributeOwner, Envelope, Event, MispObject, Organisation, Sighting, Tag,
    NO_OWNING_OBJECT,
};
