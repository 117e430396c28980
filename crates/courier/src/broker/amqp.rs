//! RabbitMQ connections through `lapin`.
//!
//! Heartbeat and connection timeouts travel as URI query parameters. The
//! blocked-connection timeout bounds every publish: a broker that blocks
//! publishers (memory or disk alarm) longer than that is treated as a dead
//! connection so the consumer tears it down and reconnects.

use std::time::Duration;
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions,
    BasicConsumeOptions,
    BasicPublishOptions,
    BasicQosOptions,
    BasicRejectOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::uri::AMQPUri;
use lapin::{acker::Acker, BasicProperties, Connection, ConnectionProperties};
use tracing::debug;
use super::{Acknowledge, Broker, Channel, Delivery, DeliveryStream, QueueOptions};
use crate::config::BrokerSettings;
use crate::error::BrokerError;
use crate::properties::MessageProperties;

/// AMQP reply code for PRECONDITION_FAILED, raised when a queue is redeclared
/// with different arguments.
const PRECONDITION_FAILED: u16 = 406;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Opens RabbitMQ connections from a URI.
#[derive(Debug, Clone)]
pub struct AmqpBroker {
    uri: String,
    blocked_connection_timeout: Duration,
}

impl AmqpBroker {
    pub fn new(uri: impl Into<String>, blocked_connection_timeout: Duration) -> Self {
        Self {
            uri: uri.into(),
            blocked_connection_timeout,
        }
    }

    pub fn from_settings(settings: &BrokerSettings) -> Self {
        Self::new(settings.uri(), settings.blocked_connection_timeout())
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    type Channel = AmqpChannel;

    async fn connect(&self) -> Result<AmqpChannel, BrokerError> {
        let uri: AMQPUri = self.uri.parse().map_err(BrokerError::InvalidUri)?;
        debug!(host = %uri.authority.host, port = uri.authority.port, vhost = %uri.vhost, "opening amqp connection");
        let connection = Connection::connect_uri(uri, ConnectionProperties::default())
            .await
            .map_err(classify)?;
        let channel = connection.create_channel().await.map_err(classify)?;
        Ok(AmqpChannel {
            connection,
            channel,
            blocked_connection_timeout: self.blocked_connection_timeout,
        })
    }
}

/// A channel together with the connection that owns it.
pub struct AmqpChannel {
    connection: Connection,
    channel: lapin::Channel,
    blocked_connection_timeout: Duration,
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(classify)
    }

    async fn declare_queue(&self, queue: &str, options: QueueOptions) -> Result<(), BrokerError> {
        let arguments = queue_arguments(options);
        let declare = QueueDeclareOptions {
            durable: options.durable,
            ..QueueDeclareOptions::default()
        };
        self.channel
            .queue_declare(queue, declare, arguments)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn publish(
        &self,
        queue: &str,
        body: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), BrokerError> {
        let publish = async {
            self.channel
                .basic_publish("", queue, BasicPublishOptions::default(), body, to_basic_properties(properties))
                .await?
                .await?;
            Ok::<(), lapin::Error>(())
        };
        match tokio::time::timeout(self.blocked_connection_timeout, publish).await {
            Ok(result) => result.map_err(classify),
            Err(_) => Err(BrokerError::Blocked(self.blocked_connection_timeout)),
        }
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerError> {
        let consumer = self.channel
            .basic_consume(queue, consumer_tag, BasicConsumeOptions::default(), FieldTable::default())
            .await
            .map_err(classify)?;
        let stream = consumer.map(|item| {
            item.map(|delivery| {
                Delivery::new(
                    from_basic_properties(&delivery.properties),
                    delivery.data,
                    delivery.redelivered,
                    Box::new(AmqpAcker(delivery.acker)),
                )
            })
            .map_err(classify)
        });
        Ok(stream.boxed())
    }

    async fn close(&self) {
        if let Err(err) = self.channel.close(200, "closing").await {
            debug!(error = %err, "channel close failed");
        }
        if let Err(err) = self.connection.close(200, "closing").await {
            debug!(error = %err, "connection close failed");
        }
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledge for AmqpAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.0
            .reject(BasicRejectOptions { requeue })
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

fn to_basic_properties(properties: &MessageProperties) -> BasicProperties {
    let mut basic = BasicProperties::default().with_content_type(ShortString::from(JSON_CONTENT_TYPE));
    if let Some(correlation_id) = &properties.correlation_id {
        basic = basic.with_correlation_id(ShortString::from(correlation_id.as_str()));
    }
    if let Some(reply_to) = &properties.reply_to {
        basic = basic.with_reply_to(ShortString::from(reply_to.as_str()));
    }
    if let Some(priority) = properties.priority {
        basic = basic.with_priority(priority);
    }
    if let Some(delivery_mode) = properties.delivery_mode {
        basic = basic.with_delivery_mode(delivery_mode);
    }
    basic
}

fn from_basic_properties(basic: &BasicProperties) -> MessageProperties {
    MessageProperties {
        correlation_id: basic.correlation_id().as_ref().map(|s| s.as_str().to_string()),
        reply_to: basic.reply_to().as_ref().map(|s| s.as_str().to_string()),
        priority: *basic.priority(),
        delivery_mode: *basic.delivery_mode(),
    }
}

fn classify(err: lapin::Error) -> BrokerError {
    match &err {
        lapin::Error::ProtocolError(amqp) if amqp.get_id() == PRECONDITION_FAILED => {
            BrokerError::Configuration(err.to_string())
        }
        lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_) => {
            BrokerError::ChannelClosed
        }
        _ => BrokerError::Connection(err.to_string()),
    }
}

/// Queue arguments for a declaration. RabbitMQ only reads signed integer
/// field types, so the priority goes out as a long int.
fn queue_arguments(options: QueueOptions) -> FieldTable {
    let mut arguments = FieldTable::default();
    if let Some(max_priority) = options.max_priority {
        arguments.insert(ShortString::from("x-max-priority"), AMQPValue::LongInt(i32::from(max_priority)));
    }
    arguments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_survive_conversion() {
        let props = MessageProperties::persistent()
            .with_correlation_id("abc")
            .with_reply_to("bot_output")
            .with_priority(120);
        let basic = to_basic_properties(&props);
        assert_eq!(from_basic_properties(&basic), props);
    }

    #[test]
    fn test_absent_properties_stay_absent() {
        let basic = to_basic_properties(&MessageProperties::default());
        let props = from_basic_properties(&basic);
        assert_eq!(props.correlation_id, None);
        assert_eq!(props.reply_to, None);
        assert_eq!(props.priority, None);
    }

    #[test]
    fn test_max_priority_is_a_signed_argument() {
        let options = QueueOptions {
            max_priority: Some(255),
            ..QueueOptions::default()
        };
        let arguments = queue_arguments(options);
        assert_eq!(
            arguments.inner().get(&ShortString::from("x-max-priority")),
            Some(&AMQPValue::LongInt(255))
        );
        assert!(queue_arguments(QueueOptions::default()).inner().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_uri_is_fatal() {
        let broker = AmqpBroker::new("not a uri at all://", Duration::from_secs(1));
        let err = broker.connect().await.err().unwrap();
        assert!(err.is_fatal(), "unexpected error: {err}");
    }
}
