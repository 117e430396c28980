use tracing::debug;
use crate::broker::Channel;
use crate::envelope::ReplyEnvelope;
use crate::error::Result;
use crate::properties::MessageProperties;

/// Emits reply envelopes.
///
/// Replies are always persistent and carry the request's correlation id and
/// priority. Nothing is retried here; whoever calls decides what a failure
/// means.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyPublisher;

impl ReplyPublisher {
    pub fn new() -> Self {
        Self
    }

    pub async fn publish<C: Channel>(
        &self,
        channel: &C,
        reply_queue: &str,
        envelope: &ReplyEnvelope,
        correlation_id: &str,
        priority: u8,
    ) -> Result<()> {
        let body = envelope.encode()?;
        let properties = MessageProperties::persistent()
            .with_correlation_id(correlation_id)
            .with_priority(priority);
        channel.publish(reply_queue, &body, &properties).await?;
        debug!(correlation_id, queue = reply_queue, state = ?envelope.state, "reply published");
        Ok(())
    }
}
