//! misp-dispatcher - event-ingestion dispatcher library
//!
//! This library drains a Redis work queue of platform events, routes each
//! message by topic, decomposes events into objects and attributes, and
//! forwards derived records to the downstream aggregation sinks.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `dispatcher`: Consumer loop, topic router, event decomposer and attribute filter
//! - `misp`: Message types and the remote tag-cascade lookup
//! - `queue`: Work queue backends (Redis, in-memory)
//! - `sinks`: Downstream collaborator traits and their Redis/recording implementations
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use misp_dispatcher::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     // Consumer wiring would go here
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod misp;
pub mod queue;
pub mod sinks;

// Re-export commonly used types
pub use config::Config;
pub use dispatcher::{Allowlist, Consumer, DispatchSettings, Dispatcher, Outcome, Topic};
pub use error::{DispatchError, Result};
pub use queue::{MemoryQueue, RedisQueue, WorkQueue};
pub use sinks::{RecordingSinks, RedisSinks, Sinks};
