use std::sync::Arc;
use async_trait::async_trait;
use tracing::{debug, warn};
use crate::broker::{Channel, Delivery};
use crate::core::consume::DeliveryHandler;
use crate::envelope::ReplyEnvelope;
use crate::error::BrokerError;
use super::pending::{Completion, PendingTable};

/// Routes replies from the reply queue to waiting callers.
///
/// Every reply is acknowledged, matched or not. Replies nobody waits for are
/// logged and dropped.
pub struct ReplyRouter {
    pending: Arc<PendingTable>,
}

impl ReplyRouter {
    pub fn new(pending: Arc<PendingTable>) -> Self {
        Self { pending }
    }

    fn route(&self, delivery: &Delivery) {
        let Some(correlation_id) = delivery.properties.correlation_id.as_deref().filter(|id| !id.is_empty()) else {
            warn!(body_len = delivery.body.len(), "dropping reply without correlation_id");
            return;
        };

        // A reply we cannot read still answers its request.
        let reply = ReplyEnvelope::decode(&delivery.body).unwrap_or_else(|err| {
            warn!(correlation_id, error = %err, "reply body could not be parsed");
            ReplyEnvelope::error(format!("malformed reply: {err}"))
        });

        match self.pending.complete(correlation_id, reply) {
            Completion::Delivered => debug!(correlation_id, "reply delivered"),
            Completion::Unknown => warn!(correlation_id, "dropping reply for unknown correlation_id"),
            Completion::Abandoned => warn!(correlation_id, "dropping reply, caller stopped waiting"),
        }
    }
}

#[async_trait]
impl<C: Channel> DeliveryHandler<C> for ReplyRouter {
    async fn handle(&self, _channel: &C, delivery: Delivery) -> Result<(), BrokerError> {
        self.route(&delivery);
        delivery.ack().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use crate::broker::Broker;
    use crate::broker::memory::MemoryBroker;
    use crate::properties::MessageProperties;

    async fn route_one(broker: &MemoryBroker, router: &ReplyRouter) {
        let channel = broker.connect().await.unwrap();
        let mut deliveries = channel.consume("bot_output", "test").await.unwrap();
        let delivery = deliveries.next().await.unwrap().unwrap();
        router.handle(&channel, delivery).await.unwrap();
    }

    #[tokio::test]
    async fn test_routes_by_correlation_id() {
        let broker = MemoryBroker::new();
        let pending = Arc::new(PendingTable::new());
        let router = ReplyRouter::new(pending.clone());
        let receiver = pending.register("abc").unwrap();

        let body = ReplyEnvelope::success(json!({"label": "ok"})).encode().unwrap();
        broker.publish_raw("bot_output", body, MessageProperties::persistent().with_correlation_id("abc"));
        route_one(&broker, &router).await;

        assert_eq!(receiver.await.unwrap().result, json!({"label": "ok"}));
        assert_eq!(broker.acked("bot_output").len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_and_anonymous_replies_are_acked_and_dropped() {
        let broker = MemoryBroker::new();
        let pending = Arc::new(PendingTable::new());
        let router = ReplyRouter::new(pending.clone());
        let body = ReplyEnvelope::success(json!({})).encode().unwrap();

        broker.publish_raw("bot_output", body.clone(), MessageProperties::persistent().with_correlation_id("ghost"));
        route_one(&broker, &router).await;
        broker.publish_raw("bot_output", body, MessageProperties::persistent());
        route_one(&broker, &router).await;

        assert_eq!(broker.acked("bot_output").len(), 2);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_reply_completes_with_error() {
        let broker = MemoryBroker::new();
        let pending = Arc::new(PendingTable::new());
        let router = ReplyRouter::new(pending.clone());
        let receiver = pending.register("abc").unwrap();

        broker.publish_raw("bot_output", "{oops", MessageProperties::persistent().with_correlation_id("abc"));
        route_one(&broker, &router).await;

        let reply = receiver.await.unwrap();
        assert!(!reply.is_success());
        assert!(reply.exception().is_some_and(|e| e.starts_with("malformed reply")));
    }
}
