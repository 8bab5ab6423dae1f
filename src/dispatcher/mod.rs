//! Routing-and-decomposition pipeline
//!
//! This module drains the work queue, classifies each envelope by topic,
//! decomposes events into their attributes and objects, applies the CIDR
//! allowlist and tag-cascade policy, and forwards derived records to the
//! downstream sinks.
//!
//! # Overview
//!
//! 1. [`consumer`] pops one envelope at a time and backs off when idle
//! 2. [`router`] decodes the envelope and maps its topic to a handler
//! 3. [`decompose`] expands events, objects and sightings into attributes
//! 4. [`filter`] decides per attribute whether enrichment and publication happen
//!
//! Everything runs sequentially: one message is fully processed, remote
//! lookups included, before the next one is popped.
//!
//! # Modules
//!
//! - [`allowlist`]: CIDR allowlist and `check_ip`
//! - [`logging`]: Structured logging configuration

pub mod allowlist;
pub mod consumer;
pub mod decompose;
pub mod filter;
pub mod handlers;
pub mod logging;
pub mod router;

use std::sync::Arc;

use crate::config::DispatcherConfig;
use crate::misp::CascadeCheck;
use crate::sinks::Sinks;

pub use allowlist::{Allowlist, Network};
pub use consumer::{Consumer, Throughput, Tick};
pub use filter::{AttributeInput, CascadeFlag, FilterVerdict};
pub use router::{DropReason, Outcome, Topic};

/// Policy knobs the handlers need at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Tag name that forces every attribute of an event through the filter.
    pub import_all_tag: String,
    /// Side-store key for diagnostic round-trip measurements.
    pub diagnostic_key: String,
}

impl DispatchSettings {
    /// Extracts the runtime policy from the dispatcher configuration.
    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self {
            import_all_tag: config.import_all_tag.clone(),
            diagnostic_key: config.diagnostic_key.clone(),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&DispatcherConfig::default())
    }
}

/// Shared context every handler runs against.
///
/// Built once at startup and never mutated afterwards; per-event state such
/// as the cascade flag lives on the stack of the decomposition pass.
pub struct Dispatcher {
    allowlist: Allowlist,
    sinks: Sinks,
    resolver: Arc<dyn CascadeCheck>,
    settings: DispatchSettings,
}

impl Dispatcher {
    /// Creates a dispatcher from its collaborators.
    pub fn new(
        allowlist: Allowlist,
        sinks: Sinks,
        resolver: Arc<dyn CascadeCheck>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            allowlist,
            sinks,
            resolver,
            settings,
        }
    }

    /// The allowlist loaded at startup.
    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    /// Runtime policy.
    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }
}

/// Current unix time in seconds.
pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
