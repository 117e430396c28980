use async_trait::async_trait;
use futures::StreamExt;
use tracing::{info, warn};
use crate::broker::{Broker, Channel, Delivery, QueueOptions};
use crate::core::supervisor::ConnectionSupervisor;
use crate::core::worker::Shutdown;
use crate::error::{BrokerError, SupervisorError};

/// Processes deliveries pulled by [`consume_loop`].
#[async_trait]
pub trait DeliveryHandler<C: Channel>: Send + Sync {
    /// Handles one delivery to completion, settling it.
    ///
    /// Returning an error means the channel is no longer usable; the loop
    /// discards it and reconnects. Anything else must be dealt with here.
    async fn handle(&self, channel: &C, delivery: Delivery) -> Result<(), BrokerError>;
}

/// Where and how a consumer pulls messages.
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub queue: String,
    pub consumer_tag: String,
    /// Maximum unacknowledged deliveries held at once.
    pub prefetch: u16,
    /// Queues declared on every fresh channel before consuming.
    pub declarations: Vec<(String, QueueOptions)>,
}

impl ConsumerOptions {
    pub fn new(queue: impl Into<String>, consumer_tag: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            consumer_tag: consumer_tag.into(),
            prefetch: 1,
            declarations: vec![],
        }
    }

    pub fn declare(mut self, queue: impl Into<String>, options: QueueOptions) -> Self {
        self.declarations.push((queue.into(), options));
        self
    }
}

/// Consumes `options.queue` until `shutdown` fires, rebuilding the channel
/// whenever it breaks.
///
/// Returns `Ok(())` on shutdown. Only fatal connection errors (and an
/// exhausted retry policy) end the loop with an error.
pub async fn consume_loop<B, H>(
    supervisor: &ConnectionSupervisor<B>,
    options: &ConsumerOptions,
    handler: &H,
    shutdown: &Shutdown,
) -> Result<(), SupervisorError>
where
    B: Broker,
    H: DeliveryHandler<B::Channel>,
{
    while shutdown.is_running() {
        let channel = match supervisor.connect(shutdown).await {
            Ok(channel) => channel,
            Err(SupervisorError::Interrupted) => break,
            Err(err) => return Err(err),
        };

        let result = consume_channel(&channel, options, handler, shutdown).await;
        channel.close().await;
        match result {
            Ok(()) => break,
            Err(err) if err.is_fatal() => return Err(SupervisorError::Fatal(err)),
            Err(err) => {
                warn!(queue = %options.queue, error = %err, "consumer lost its channel, reconnecting");
            }
        }
    }
    info!(queue = %options.queue, "consumer stopped");
    Ok(())
}

async fn consume_channel<C, H>(
    channel: &C,
    options: &ConsumerOptions,
    handler: &H,
    shutdown: &Shutdown,
) -> Result<(), BrokerError>
where
    C: Channel,
    H: DeliveryHandler<C>,
{
    channel.set_prefetch(options.prefetch).await?;
    for (queue, queue_options) in &options.declarations {
        channel.declare_queue(queue, *queue_options).await?;
    }
    let mut deliveries = channel.consume(&options.queue, &options.consumer_tag).await?;
    info!(queue = %options.queue, prefetch = options.prefetch, "consuming");

    loop {
        let next = tokio::select! {
            next = deliveries.next() => next,
            _ = shutdown.stopped() => return Ok(()),
        };
        match next {
            Some(Ok(delivery)) => handler.handle(channel, delivery).await?,
            Some(Err(err)) => return Err(err),
            None => return Err(BrokerError::ChannelClosed),
        }
    }
}
