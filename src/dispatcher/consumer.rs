//! Queue consumer loop
//!
//! Pops one item at a time from a [`WorkQueue`], hands it to the
//! [`Dispatcher`] and sleeps for the poll interval whenever the queue is
//! empty. Items are consumed at most once: nothing is acknowledged, retried
//! or requeued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::router::Outcome;
use super::Dispatcher;
use crate::error::DispatchError;
use crate::queue::{QueueError, WorkQueue};

/// What one poll of the queue produced.
#[derive(Debug)]
pub enum Tick {
    /// An item was routed.
    Processed(Outcome),
    /// An item could not be decoded and was discarded.
    Malformed(DispatchError),
    /// The queue was empty.
    Idle,
}

/// Count of items taken off the queue since the consumer last went idle.
#[derive(Debug, Default)]
pub struct Throughput {
    since_idle: AtomicU64,
}

impl Throughput {
    /// Counts one routed or malformed item.
    pub fn record(&self) {
        self.since_idle.fetch_add(1, Ordering::SeqCst);
    }

    /// Items counted since the last idle period, without resetting.
    pub fn pending(&self) -> u64 {
        self.since_idle.load(Ordering::SeqCst)
    }

    /// Closes an idle period: returns the summary line and resets the count.
    pub fn idle_summary(&self) -> String {
        let processed = self.since_idle.swap(0, Ordering::SeqCst);
        format!("Processed {} message(s) since last sleep.", processed)
    }
}

/// Drains a work queue into a dispatcher.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use misp_dispatcher::dispatcher::{Consumer, Dispatcher};
/// use misp_dispatcher::queue::MemoryQueue;
///
/// # async fn example(dispatcher: Dispatcher) -> anyhow::Result<()> {
/// let queue = Arc::new(MemoryQueue::new());
/// let consumer = Consumer::new(queue, dispatcher, Duration::from_secs(1));
/// consumer.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Consumer<Q: WorkQueue> {
    queue: Arc<Q>,
    dispatcher: Dispatcher,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    throughput: Throughput,
}

impl<Q: WorkQueue> Consumer<Q> {
    /// Creates a consumer; call [`Consumer::run`] to start it.
    pub fn new(queue: Arc<Q>, dispatcher: Dispatcher, poll_interval: Duration) -> Self {
        Self {
            queue,
            dispatcher,
            poll_interval,
            running: Arc::new(AtomicBool::new(false)),
            throughput: Throughput::default(),
        }
    }

    /// The dispatcher items are routed to.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Items taken off the queue since the last idle period.
    pub fn throughput(&self) -> &Throughput {
        &self.throughput
    }

    /// Pops and processes at most one item. Anything other than
    /// [`Tick::Idle`] counts towards [`Consumer::throughput`].
    ///
    /// # Errors
    ///
    /// Only queue backend failures are returned; decode failures are logged
    /// and reported as [`Tick::Malformed`].
    pub async fn tick(&self) -> Result<Tick, QueueError> {
        let Some(item) = self.queue.pop().await? else {
            return Ok(Tick::Idle);
        };

        self.throughput.record();
        match self.dispatcher.process_item(&item).await {
            Ok(outcome) => {
                match &outcome {
                    Outcome::Handled => debug!("Message handled"),
                    Outcome::Skipped(reason) => debug!(reason = %reason, "Message skipped"),
                    Outcome::Dropped(reason) => warn!(reason = %reason, "Message dropped"),
                }
                Ok(Tick::Processed(outcome))
            }
            Err(e) => {
                error!(error = %e, item = %item, "Failed to decode queue item");
                Ok(Tick::Malformed(e))
            }
        }
    }

    /// Runs until [`Consumer::stop`] is called or the queue backend fails.
    ///
    /// # Errors
    ///
    /// Returns the first queue backend error.
    pub async fn run(&self) -> Result<(), QueueError> {
        self.running.store(true, Ordering::SeqCst);
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "Dispatcher started"
        );

        while self.running.load(Ordering::SeqCst) {
            let tick = match self.tick().await {
                Ok(tick) => tick,
                Err(e) => {
                    self.running.store(false, Ordering::SeqCst);
                    error!(error = %e, "Queue backend failed, stopping");
                    return Err(e);
                }
            };

            if let Tick::Idle = tick {
                tokio::time::sleep(self.poll_interval).await;
                info!("{}", self.throughput.idle_summary());
            }
        }

        info!("Dispatcher stopped");
        Ok(())
    }

    /// Asks a running loop to exit after the current item.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{Allowlist, DispatchSettings};
    use crate::misp::{CascadeCheck, ResolverError};
    use crate::queue::MemoryQueue;
    use crate::sinks::{RecordingSinks, SinkCall, Sinks};
    use async_trait::async_trait;

    struct NoRemote;

    #[async_trait]
    impl CascadeCheck for NoRemote {
        async fn has_cascade_tag(&self, _event_id: &str) -> Result<bool, ResolverError> {
            Ok(false)
        }
    }

    struct BrokenQueue;

    #[async_trait]
    impl WorkQueue for BrokenQueue {
        async fn pop(&self) -> Result<Option<String>, QueueError> {
            Err(QueueError::Other("connection reset".to_string()))
        }
    }

    fn dispatcher(recorder: Arc<RecordingSinks>) -> Dispatcher {
        Dispatcher::new(
            Allowlist::default(),
            Sinks::from_parts(recorder.clone(), recorder),
            Arc::new(NoRemote),
            DispatchSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_tick_reports_each_kind() {
        let recorder = Arc::new(RecordingSinks::new());
        let queue = Arc::new(MemoryQueue::new());
        queue.push(r#"{"zmq_name":"1","content":"misp_json_self {\"uptime\":5}"}"#);
        queue.push("garbage");
        queue.push(r#"{"zmq_name":"1","content":"misp_json_nope {}"}"#);
        let consumer = Consumer::new(queue, dispatcher(recorder), Duration::from_millis(1));

        assert!(matches!(
            consumer.tick().await.unwrap(),
            Tick::Processed(Outcome::Handled)
        ));
        assert!(matches!(consumer.tick().await.unwrap(), Tick::Malformed(_)));
        match consumer.tick().await.unwrap() {
            Tick::Processed(outcome) => assert!(outcome.is_dropped()),
            other => panic!("unexpected tick {:?}", other),
        }
        assert!(matches!(consumer.tick().await.unwrap(), Tick::Idle));
    }

    #[tokio::test]
    async fn test_run_drains_queue_until_stopped() {
        let recorder = Arc::new(RecordingSinks::new());
        let queue = Arc::new(MemoryQueue::new());
        for uptime in 1..=3 {
            queue.push(format!(
                r#"{{"zmq_name":"1","content":"misp_json_self {{\"uptime\":{}}}"}}"#,
                uptime
            ));
        }
        let consumer = Arc::new(Consumer::new(
            queue.clone(),
            dispatcher(recorder.clone()),
            Duration::from_millis(5),
        ));

        let handle = tokio::spawn({
            let consumer = consumer.clone();
            async move { consumer.run().await }
        });

        for _ in 0..200 {
            if queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        consumer.stop();
        handle.await.unwrap().unwrap();

        assert!(queue.is_empty());
        assert!(!consumer.is_running());
        assert_eq!(recorder.count(|c| matches!(c, SinkCall::Publish { .. })), 3);
    }

    #[test]
    fn test_throughput_resets_on_idle() {
        let throughput = Throughput::default();
        throughput.record();
        throughput.record();

        assert_eq!(throughput.pending(), 2);
        assert_eq!(
            throughput.idle_summary(),
            "Processed 2 message(s) since last sleep."
        );
        assert_eq!(throughput.pending(), 0);
        assert_eq!(
            throughput.idle_summary(),
            "Processed 0 message(s) since last sleep."
        );
    }

    #[tokio::test]
    async fn test_malformed_items_count_but_idle_does_not() {
        let recorder = Arc::new(RecordingSinks::new());
        let queue = Arc::new(MemoryQueue::new());
        queue.push("garbage");
        queue.push(r#"{"zmq_name":"1","content":"misp_json_nope {}"}"#);
        let consumer = Consumer::new(queue, dispatcher(recorder), Duration::from_millis(1));

        consumer.tick().await.unwrap();
        consumer.tick().await.unwrap();
        consumer.tick().await.unwrap();
        consumer.tick().await.unwrap();

        assert_eq!(consumer.throughput().pending(), 2);
    }

    #[tokio::test]
    async fn test_run_resets_count_after_sleeping() {
        let recorder = Arc::new(RecordingSinks::new());
        let queue = Arc::new(MemoryQueue::new());
        queue.push(r#"{"zmq_name":"1","content":"misp_json_self {\"uptime\":5}"}"#);
        let consumer = Arc::new(Consumer::new(
            queue.clone(),
            dispatcher(recorder.clone()),
            Duration::from_millis(5),
        ));

        let handle = tokio::spawn({
            let consumer = consumer.clone();
            async move { consumer.run().await }
        });
        for _ in 0..200 {
            if recorder.count(|c| matches!(c, SinkCall::Publish { .. })) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Give the loop at least one full idle period.
        tokio::time::sleep(Duration::from_millis(50)).await;
        consumer.stop();
        handle.await.unwrap().unwrap();

        assert_eq!(consumer.throughput().pending(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_queue_error() {
        let recorder = Arc::new(RecordingSinks::new());
        let consumer = Consumer::new(
            Arc::new(BrokenQueue),
            dispatcher(recorder),
            Duration::from_millis(1),
        );

        let result = consumer.run().await;

        assert!(matches!(result, Err(QueueError::Other(_))));
        assert!(!consumer.is_running());
    }
}
