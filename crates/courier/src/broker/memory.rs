//! In-memory broker for testing.
//!
//! [`MemoryBroker`] behaves like a single broker node with manual
//! acknowledgment, per-channel prefetch and priority ordering. It also lets a
//! test break things on purpose:
//!
//! - refuse the next N connection attempts
//! - fail the next N publishes
//! - sever every open connection, requeueing unacknowledged messages
//! - sever the connection instead of honouring the next ack
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: no persistence, no distribution
//! - **Default exchange only**: routing keys are queue names
//! - Publishing to an undeclared queue creates it

use std::collections::{HashMap, VecDeque};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Notify;
use super::{Acknowledge, Broker, Channel, Delivery, DeliveryStream, QueueOptions};
use crate::error::BrokerError;
use crate::properties::MessageProperties;

/// A message as stored by the in-memory broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub properties: MessageProperties,
    pub body: Vec<u8>,
    pub redelivered: bool,
}

impl StoredMessage {
    /// Body decoded as JSON, for assertions.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

struct Unacked {
    queue: String,
    channel_id: u64,
    message: StoredMessage,
}

#[derive(Default)]
struct State {
    /// Bumped whenever every connection is severed.
    generation: u64,
    queues: HashMap<String, VecDeque<StoredMessage>>,
    declared: HashMap<String, QueueOptions>,
    unacked: HashMap<u64, Unacked>,
    next_tag: u64,
    next_channel: u64,
    acked: Vec<(String, StoredMessage)>,
    rejected: Vec<(String, StoredMessage)>,
    connect_attempts: u32,
    refuse_connects: u32,
    fatal_connect: Option<String>,
    fail_publishes: u32,
    sever_on_ack: u32,
}

impl State {
    fn enqueue(&mut self, queue: &str, message: StoredMessage) {
        let priority = message.properties.priority.unwrap_or(0);
        let entries = self.queues.entry(queue.to_string()).or_default();
        let position = entries
            .iter()
            .position(|m| m.properties.priority.unwrap_or(0) < priority)
            .unwrap_or(entries.len());
        entries.insert(position, message);
    }

    fn requeue(&mut self, mut unacked: Vec<(u64, Unacked)>) {
        // Oldest first so the original order is restored at the queue head.
        unacked.sort_by_key(|(tag, _)| std::cmp::Reverse(*tag));
        for (_, entry) in unacked {
            let mut message = entry.message;
            message.redelivered = true;
            self.queues.entry(entry.queue).or_default().push_front(message);
        }
    }

    fn sever(&mut self) {
        self.generation += 1;
        let unacked = self.unacked.drain().collect();
        self.requeue(unacked);
    }

    fn release_channel(&mut self, channel_id: u64) {
        let tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.channel_id == channel_id)
            .map(|(tag, _)| *tag)
            .collect();
        let released = tags
            .into_iter()
            .filter_map(|tag| self.unacked.remove(&tag).map(|u| (tag, u)))
            .collect();
        self.requeue(released);
    }
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    changed: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory broker. Clones share the same queues.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes directly, bypassing any channel.
    pub fn publish_raw(&self, queue: &str, body: impl Into<Vec<u8>>, properties: MessageProperties) {
        self.inner.lock().enqueue(queue, StoredMessage {
            properties,
            body: body.into(),
            redelivered: false,
        });
        self.inner.changed.notify_waiters();
    }

    /// Messages ready for delivery on `queue`, in delivery order.
    pub fn messages(&self, queue: &str) -> Vec<StoredMessage> {
        self.inner
            .lock()
            .queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes and returns the next ready message on `queue`.
    pub fn take(&self, queue: &str) -> Option<StoredMessage> {
        self.inner.lock().queues.get_mut(queue).and_then(VecDeque::pop_front)
    }

    /// Messages acknowledged from `queue`, in acknowledgment order.
    pub fn acked(&self, queue: &str) -> Vec<StoredMessage> {
        Self::filter_log(&self.inner.lock().acked, queue)
    }

    /// Messages rejected without requeue from `queue`.
    pub fn rejected(&self, queue: &str) -> Vec<StoredMessage> {
        Self::filter_log(&self.inner.lock().rejected, queue)
    }

    fn filter_log(log: &[(String, StoredMessage)], queue: &str) -> Vec<StoredMessage> {
        log.iter()
            .filter(|(q, _)| q == queue)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Number of delivered but unsettled messages across all channels.
    pub fn unacked_count(&self) -> usize {
        self.inner.lock().unacked.len()
    }

    pub fn declared(&self, queue: &str) -> Option<QueueOptions> {
        self.inner.lock().declared.get(queue).copied()
    }

    /// Total calls to [`Broker::connect`], successful or not.
    pub fn connect_attempts(&self) -> u32 {
        self.inner.lock().connect_attempts
    }

    /// Refuses the next `count` connection attempts with a retryable error.
    pub fn refuse_next_connects(&self, count: u32) {
        self.inner.lock().refuse_connects = count;
    }

    /// Fails every connection attempt with a non-retryable error.
    pub fn refuse_connects_fatally(&self, reason: impl Into<String>) {
        self.inner.lock().fatal_connect = Some(reason.into());
    }

    /// Fails the next `count` publishes without closing the channel.
    pub fn fail_next_publishes(&self, count: u32) {
        self.inner.lock().fail_publishes = count;
    }

    /// Makes the next ack sever every connection instead of succeeding.
    pub fn sever_on_next_ack(&self) {
        self.inner.lock().sever_on_ack += 1;
    }

    /// Drops every open connection. Unacknowledged messages go back to the
    /// head of their queues flagged as redelivered.
    pub fn sever(&self) {
        self.inner.lock().sever();
        self.inner.changed.notify_waiters();
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    type Channel = MemoryChannel;

    async fn connect(&self) -> Result<MemoryChannel, BrokerError> {
        let mut state = self.inner.lock();
        state.connect_attempts += 1;
        if let Some(reason) = &state.fatal_connect {
            return Err(BrokerError::Configuration(reason.clone()));
        }
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(BrokerError::Connection("connection refused".to_string()));
        }
        state.next_channel += 1;
        Ok(MemoryChannel {
            shared: Arc::new(ChannelShared {
                inner: self.inner.clone(),
                id: state.next_channel,
                generation: state.generation,
                prefetch: AtomicU16::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }
}

struct ChannelShared {
    inner: Arc<Inner>,
    id: u64,
    generation: u64,
    prefetch: AtomicU16,
    closed: AtomicBool,
}

impl ChannelShared {
    fn is_open(&self, state: &State) -> bool {
        state.generation == self.generation && !self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self, state: &State) -> Result<(), BrokerError> {
        if self.is_open(state) {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed)
        }
    }

    async fn next_delivery(self: &Arc<Self>, queue: &str) -> Result<Delivery, BrokerError> {
        loop {
            let mut notified = pin!(self.inner.changed.notified());
            notified.as_mut().enable();
            {
                let mut state = self.inner.lock();
                self.check_open(&state)?;
                let outstanding = state.unacked.values().filter(|u| u.channel_id == self.id).count();
                let prefetch = usize::from(self.prefetch.load(Ordering::SeqCst));
                if prefetch == 0 || outstanding < prefetch {
                    if let Some(message) = state.queues.get_mut(queue).and_then(VecDeque::pop_front) {
                        let tag = state.next_tag;
                        state.next_tag += 1;
                        state.unacked.insert(tag, Unacked {
                            queue: queue.to_string(),
                            channel_id: self.id,
                            message: message.clone(),
                        });
                        let acker = MemoryAcker {
                            channel: self.clone(),
                            tag,
                        };
                        return Ok(Delivery::new(message.properties, message.body, message.redelivered, Box::new(acker)));
                    }
                }
            }
            notified.await;
        }
    }
}

/// Channel on a [`MemoryBroker`].
pub struct MemoryChannel {
    shared: Arc<ChannelShared>,
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        let state = self.shared.inner.lock();
        self.shared.check_open(&state)?;
        self.shared.prefetch.store(count, Ordering::SeqCst);
        Ok(())
    }

    async fn declare_queue(&self, queue: &str, options: QueueOptions) -> Result<(), BrokerError> {
        let mut state = self.shared.inner.lock();
        self.shared.check_open(&state)?;
        match state.declared.get(queue) {
            Some(existing) if *existing != options => Err(BrokerError::Configuration(format!(
                "queue {queue} already declared with different arguments"
            ))),
            _ => {
                state.declared.insert(queue.to_string(), options);
                state.queues.entry(queue.to_string()).or_default();
                Ok(())
            }
        }
    }

    async fn publish(
        &self,
        queue: &str,
        body: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), BrokerError> {
        {
            let mut state = self.shared.inner.lock();
            self.shared.check_open(&state)?;
            if state.fail_publishes > 0 {
                state.fail_publishes -= 1;
                return Err(BrokerError::Connection(format!("publish to {queue} failed")));
            }
            state.enqueue(queue, StoredMessage {
                properties: properties.clone(),
                body: body.to_vec(),
                redelivered: false,
            });
        }
        self.shared.inner.changed.notify_waiters();
        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> Result<DeliveryStream, BrokerError> {
        {
            let state = self.shared.inner.lock();
            self.shared.check_open(&state)?;
        }
        let shared = self.shared.clone();
        let queue = queue.to_string();
        let stream = futures::stream::unfold(Some((shared, queue)), |cursor| async move {
            let (shared, queue) = cursor?;
            match shared.next_delivery(&queue).await {
                Ok(delivery) => Some((Ok(delivery), Some((shared, queue)))),
                Err(err) => Some((Err(err), None)),
            }
        });
        Ok(stream.boxed())
    }

    async fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.shared.inner.lock().release_channel(self.shared.id);
            self.shared.inner.changed.notify_waiters();
        }
    }
}

struct MemoryAcker {
    channel: Arc<ChannelShared>,
    tag: u64,
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        let inner = &self.channel.inner;
        let result = {
            let mut state = inner.lock();
            if state.sever_on_ack > 0 {
                state.sever_on_ack -= 1;
                state.sever();
                Err(BrokerError::ChannelClosed)
            } else {
                self.channel.check_open(&state).and_then(|()| match state.unacked.remove(&self.tag) {
                    Some(entry) => {
                        state.acked.push((entry.queue, entry.message));
                        Ok(())
                    }
                    None => Err(BrokerError::Connection(format!("unknown delivery tag {}", self.tag))),
                })
            }
        };
        inner.changed.notify_waiters();
        result
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        let inner = &self.channel.inner;
        let result = {
            let mut state = inner.lock();
            self.channel.check_open(&state).and_then(|()| match state.unacked.remove(&self.tag) {
                Some(entry) if requeue => {
                    state.requeue(vec![(self.tag, entry)]);
                    Ok(())
                }
                Some(entry) => {
                    state.rejected.push((entry.queue, entry.message));
                    Ok(())
                }
                None => Err(BrokerError::Connection(format!("unknown delivery tag {}", self.tag))),
            })
        };
        inner.changed.notify_waiters();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn props(id: &str) -> MessageProperties {
        MessageProperties::persistent().with_correlation_id(id)
    }

    async fn next(stream: &mut DeliveryStream) -> Delivery {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("delivery within a second")
            .expect("stream still open")
            .expect("delivery ok")
    }

    #[tokio::test]
    async fn test_publish_then_consume_and_ack() {
        let broker = MemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel.publish("jobs", b"{}", &props("a")).await.unwrap();

        let mut stream = channel.consume("jobs", "test").await.unwrap();
        let delivery = next(&mut stream).await;
        assert_eq!(delivery.properties.correlation_id.as_deref(), Some("a"));
        assert_eq!(broker.unacked_count(), 1);

        delivery.ack().await.unwrap();
        assert_eq!(broker.unacked_count(), 0);
        assert_eq!(broker.acked("jobs").len(), 1);
    }

    #[tokio::test]
    async fn test_prefetch_limits_outstanding_deliveries() {
        let broker = MemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel.set_prefetch(1).await.unwrap();
        broker.publish_raw("jobs", "1", props("1"));
        broker.publish_raw("jobs", "2", props("2"));

        let mut stream = channel.consume("jobs", "test").await.unwrap();
        let first = next(&mut stream).await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(blocked.is_err(), "second delivery must wait for the first ack");

        first.ack().await.unwrap();
        let second = next(&mut stream).await;
        assert_eq!(second.body, b"2");
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let broker = MemoryBroker::new();
        broker.publish_raw("jobs", "low", props("low").with_priority(1));
        broker.publish_raw("jobs", "high", props("high").with_priority(120));
        broker.publish_raw("jobs", "mid", props("mid").with_priority(20));

        let order: Vec<_> = broker
            .messages("jobs")
            .into_iter()
            .map(|m| String::from_utf8(m.body).unwrap())
            .collect();
        assert_eq!(order, vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_sever_requeues_unacked_as_redelivered() {
        let broker = MemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        broker.publish_raw("jobs", "1", props("1"));

        let mut stream = channel.consume("jobs", "test").await.unwrap();
        let delivery = next(&mut stream).await;
        broker.sever();

        assert!(matches!(stream.next().await, Some(Err(BrokerError::ChannelClosed))));
        assert!(stream.next().await.is_none());
        assert!(delivery.ack().await.is_err());

        let requeued = broker.messages("jobs");
        assert_eq!(requeued.len(), 1);
        assert!(requeued[0].redelivered);
    }

    #[tokio::test]
    async fn test_reject_without_requeue() {
        let broker = MemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        broker.publish_raw("jobs", "bad", MessageProperties::default());

        let mut stream = channel.consume("jobs", "test").await.unwrap();
        next(&mut stream).await.reject(false).await.unwrap();

        assert!(broker.messages("jobs").is_empty());
        assert_eq!(broker.rejected("jobs").len(), 1);
    }

    #[tokio::test]
    async fn test_close_releases_unacked() {
        let broker = MemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        broker.publish_raw("jobs", "1", props("1"));

        let mut stream = channel.consume("jobs", "test").await.unwrap();
        let _delivery = next(&mut stream).await;
        channel.close().await;

        assert_eq!(broker.unacked_count(), 0);
        assert_eq!(broker.messages("jobs").len(), 1);
        assert!(channel.publish("jobs", b"x", &props("2")).await.is_err());
    }

    #[tokio::test]
    async fn test_refused_and_fatal_connects() {
        let broker = MemoryBroker::new();
        broker.refuse_next_connects(2);
        assert!(broker.connect().await.is_err());
        assert!(broker.connect().await.is_err());
        assert!(broker.connect().await.is_ok());
        assert_eq!(broker.connect_attempts(), 3);

        broker.refuse_connects_fatally("bad vhost");
        let err = broker.connect().await.err().unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_redeclare_with_different_arguments_is_fatal() {
        let broker = MemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel.declare_queue("jobs", QueueOptions::default()).await.unwrap();
        channel.declare_queue("jobs", QueueOptions::default()).await.unwrap();

        let err = channel
            .declare_queue("jobs", QueueOptions { durable: true, max_priority: Some(10) })
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
