//! Work queue the dispatcher drains.
//!
//! The upstream subscriber pushes serialized envelopes onto the head of a
//! list; the dispatcher pops from the tail, so items come out in insertion
//! order. The same backend doubles as a small key/value side store for the
//! diagnostic channel.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError};
use thiserror::Error;
use tracing::info;

use crate::sinks::{DiagnosticStore, SinkError};

/// Errors raised by a queue backend.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Redis error.
    #[error("redis error: {0}")]
    Redis(#[from] RedisError),

    /// Any other backend failure.
    #[error("other: {0}")]
    Other(String),
}

/// A FIFO of serialized envelopes.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Removes one item from the tail of the queue without blocking.
    ///
    /// Returns `Ok(None)` when the queue is empty.
    async fn pop(&self) -> Result<Option<String>, QueueError>;
}

/// Redis list-backed work queue.
pub struct RedisQueue {
    conn: MultiplexedConnection,
    list_name: String,
}

impl RedisQueue {
    /// Connects to `redis_url` and binds to the list `list_name`.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Redis` if the URL is invalid or the server
    /// cannot be reached.
    pub async fn connect(redis_url: &str, list_name: &str) -> Result<Self, QueueError> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(list = %list_name, "Connected to work queue");

        Ok(Self {
            conn,
            list_name: list_name.to_string(),
        })
    }

    /// Name of the list this queue drains.
    pub fn list_name(&self) -> &str {
        &self.list_name
    }
}

#[async_trait]
impl WorkQueue for RedisQueue {
    async fn pop(&self) -> Result<Option<String>, QueueError> {
        let mut conn = self.conn.clone();
        let item: Option<String> = conn.rpop(&self.list_name, None).await?;
        Ok(item)
    }
}

#[async_trait]
impl DiagnosticStore for RedisQueue {
    async fn store(&self, key: &str, value: &str) -> Result<(), SinkError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }
}

/// In-process queue with the same head-push / tail-pop discipline.
#[derive(Default)]
pub struct MemoryQueue {
    items: Mutex<VecDeque<String>>,
    values: Mutex<HashMap<String, String>>,
}

impl MemoryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes an item onto the head of the queue.
    pub fn push(&self, item: impl Into<String>) {
        lock(&self.items).push_front(item.into());
    }

    /// Number of items still queued.
    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    /// True when no items are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads a value written through the side store.
    pub fn value(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn pop(&self) -> Result<Option<String>, QueueError> {
        Ok(lock(&self.items).pop_back())
    }
}

#[async_trait]
impl DiagnosticStore for MemoryQueue {
    async fn store(&self, key: &str, value: &str) -> Result<(), SinkError> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }
}
