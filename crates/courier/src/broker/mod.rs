//! # Broker
//!
//! The seam between the protocol and the message broker.
//!
//! * [`Broker`] - opens a fresh connection and hands back a [`Channel`]
//! * [`Channel`] - quality of service, queue declaration, publish and consume
//! * [`Delivery`] - one consumed message plus the means to acknowledge it
//!
//! Two implementations ship with the crate:
//!
//! * `amqp` - a RabbitMQ connection through `lapin` (feature `amqp`)
//! * [`memory`] - a single-process broker with fault injection, for tests
//!
//! Messages are always published through the default exchange, so the routing
//! key is the destination queue name.

pub mod memory;

#[cfg(feature = "amqp")]
pub mod amqp;

use async_trait::async_trait;
use futures::stream::BoxStream;
use crate::error::BrokerError;
use crate::properties::MessageProperties;

/// Stream of deliveries from a consumer. An `Err` item means the channel is
/// gone and must be rebuilt.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

/// Settles a single delivery.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    /// Removes the message from the queue.
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Hands the message back to the broker, either for redelivery or for
    /// dead-lettering / discarding.
    async fn reject(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// A consumed message.
pub struct Delivery {
    pub properties: MessageProperties,
    pub body: Vec<u8>,
    /// Set when the broker has delivered this message before.
    pub redelivered: bool,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(
        properties: MessageProperties,
        body: Vec<u8>,
        redelivered: bool,
        acker: Box<dyn Acknowledge>,
    ) -> Self {
        Self {
            properties,
            body,
            redelivered,
            acker,
        }
    }

    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    pub async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.reject(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("properties", &self.properties)
            .field("body_len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

/// Arguments for declaring a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    /// Enables broker-side priority ordering up to this level.
    pub max_priority: Option<u8>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            durable: true,
            max_priority: None,
        }
    }
}

/// A live channel on a broker connection.
///
/// Closing a channel releases its unacknowledged deliveries back to the
/// broker.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Limits the number of unacknowledged deliveries held by this channel.
    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError>;

    async fn declare_queue(&self, queue: &str, options: QueueOptions) -> Result<(), BrokerError>;

    async fn publish(
        &self,
        queue: &str,
        body: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), BrokerError>;

    /// Starts a manual-acknowledgment consumer on `queue`.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerError>;

    /// Tears the channel and its connection down. Errors are swallowed; the
    /// channel is being discarded anyway.
    async fn close(&self) {}
}

/// Something that can open connections.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    type Channel: Channel;

    /// Opens a new connection and a channel on it. Never reuses a previous
    /// connection.
    async fn connect(&self) -> Result<Self::Channel, BrokerError>;
}
