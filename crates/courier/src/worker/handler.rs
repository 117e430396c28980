use std::sync::Arc;
use std::time::Instant;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{Instrument, debug, error, info, info_span, warn};
use crate::broker::{Channel, Delivery};
use crate::core::consume::DeliveryHandler;
use crate::envelope::{ReplyEnvelope, RequestEnvelope};
use crate::error::BrokerError;
use crate::inference::InferenceAdapter;
use crate::properties::RequestMetadata;
use super::publisher::ReplyPublisher;
use super::stats::{Stage, WorkerStats};

/// Turns each request delivery into exactly one reply.
///
/// Everything that can go wrong with a single message (bad body, failing or
/// panicking adapter, failed reply publish) is handled here. Only a failed
/// acknowledgment escapes, since it means the channel is gone.
pub struct InferenceHandler<A> {
    adapter: Arc<A>,
    default_output_queue: String,
    publisher: ReplyPublisher,
    stats: Arc<WorkerStats>,
}

impl<A: InferenceAdapter> InferenceHandler<A> {
    pub fn new(adapter: A, default_output_queue: impl Into<String>) -> Self {
        Self {
            adapter: Arc::new(adapter),
            default_output_queue: default_output_queue.into(),
            publisher: ReplyPublisher::new(),
            stats: Arc::new(WorkerStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    async fn process<C: Channel>(
        &self,
        channel: &C,
        delivery: Delivery,
        metadata: &RequestMetadata,
        received: Instant,
    ) -> Result<(), BrokerError> {
        if delivery.redelivered {
            debug!("processing redelivered request");
        }

        let reply = match RequestEnvelope::decode(&delivery.body) {
            Ok(request) => {
                self.stats.record(Stage::Parsed);
                self.infer(request).await
            }
            Err(err) => {
                warn!(error = %err, "request body could not be parsed");
                self.stats.record(Stage::ParseFailed);
                ReplyEnvelope::error(err)
            }
        };

        match self
            .publisher
            .publish(channel, &metadata.reply_to, &reply, &metadata.correlation_id, metadata.priority)
            .await
        {
            Ok(()) => self.stats.record(Stage::Replied),
            Err(err) => {
                error!(error = %err, "failed to publish reply");
                self.stats.record(Stage::ReplyFailed);
            }
        }

        delivery.ack().await?;
        self.stats.record(Stage::Acknowledged);

        let latency = received.elapsed();
        self.stats.record_latency(latency);
        info!(
            latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            success = reply.is_success(),
            "request handled"
        );
        Ok(())
    }

    /// Runs the adapter on a blocking thread. Errors, panics and results that
    /// are not JSON objects become error replies.
    async fn infer(&self, request: RequestEnvelope) -> ReplyEnvelope {
        let adapter = self.adapter.clone();
        let outcome = tokio::task::spawn_blocking(move || adapter.infer(&request.data)).await;

        let failure = match outcome {
            Ok(Ok(result @ Value::Object(_))) => {
                self.stats.record(Stage::Inferred);
                return ReplyEnvelope::success(result);
            }
            Ok(Ok(other)) => format!("inference result must be a JSON object, got {other}"),
            Ok(Err(err)) => err.to_string(),
            Err(join_error) => match join_error.try_into_panic() {
                Ok(payload) => panic_message(&*payload),
                Err(join_error) => join_error.to_string(),
            },
        };
        warn!(error = %failure, "inference failed");
        self.stats.record(Stage::InferenceFailed);
        ReplyEnvelope::error(failure)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "inference panicked".to_string()
    }
}

#[async_trait]
impl<C, A> DeliveryHandler<C> for InferenceHandler<A>
where
    C: Channel,
    A: InferenceAdapter,
{
    async fn handle(&self, channel: &C, delivery: Delivery) -> Result<(), BrokerError> {
        let received = Instant::now();
        self.stats.record(Stage::Received);

        let metadata = match delivery.properties.resolve(&self.default_output_queue) {
            Ok(metadata) => metadata,
            Err(missing) => {
                warn!(reason = %missing, body_len = delivery.body.len(), "rejecting request");
                delivery.reject(false).await?;
                self.stats.record(Stage::Rejected);
                return Ok(());
            }
        };

        let span = info_span!(
            "request",
            correlation_id = %metadata.correlation_id,
            reply_to = %metadata.reply_to,
            priority = metadata.priority,
        );
        self.process(channel, delivery, &metadata, received).instrument(span).await
    }
}
