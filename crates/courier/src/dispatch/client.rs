use std::sync::Arc;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;
use crate::broker::{Broker, Channel, QueueOptions};
use crate::config::DispatchSettings;
use crate::core::consume::{ConsumerOptions, consume_loop};
use crate::core::retry::RetryPolicy;
use crate::core::supervisor::ConnectionSupervisor;
use crate::core::worker::WorkerHandle;
use crate::envelope::{ReplyEnvelope, RequestEnvelope};
use crate::error::DispatchError;
use crate::properties::MessageProperties;
use super::pending::PendingTable;
use super::reply::PendingReply;
use super::router::ReplyRouter;

/// A published request and the means to wait for its reply.
pub struct Submission {
    pub correlation_id: String,
    pub reply: PendingReply,
}

/// # DispatchClient
///
/// The front-end side of the protocol. Publishes requests with a fresh
/// correlation id and routes replies from the shared reply queue back to the
/// caller that is waiting for them.
///
/// The reply router runs as a background task for the lifetime of the client,
/// reconnecting whenever its connection drops. The publish channel is opened
/// on first use and reopened on the next submit after a connection failure.
///
/// # Example
///
/// ```ignore
/// let client = DispatchClient::start(broker, RetryPolicy::default(), &settings.dispatch);
/// let reply = client.call(json!({"text": "hello"}).as_object().cloned().unwrap()).await?;
/// ```
pub struct DispatchClient<B: Broker> {
    supervisor: ConnectionSupervisor<B>,
    channel: Mutex<Option<Arc<B::Channel>>>,
    pending: Arc<PendingTable>,
    settings: DispatchSettings,
    router: WorkerHandle,
}

impl<B> DispatchClient<B>
where
    B: Broker + Clone,
{
    /// Starts the reply router and returns a client ready to submit.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(broker: B, policy: RetryPolicy, settings: &DispatchSettings) -> Self {
        let pending = Arc::new(PendingTable::new());
        let router_supervisor = ConnectionSupervisor::new(broker.clone(), policy);
        let options = ConsumerOptions::new(&settings.reply_queue, &settings.consumer_tag)
            .declare(&settings.reply_queue, QueueOptions::default());
        let router = ReplyRouter::new(pending.clone());
        let router_pending = pending.clone();

        let router = WorkerHandle::new(move |shutdown| {
            tokio::spawn(async move {
                if let Err(err) = consume_loop(&router_supervisor, &options, &router, &shutdown).await {
                    error!(queue = %options.queue, error = %err, "reply router stopped");
                }
                let abandoned = router_pending.close_all();
                if abandoned > 0 {
                    warn!(abandoned, "reply router closed with requests still pending");
                }
            })
        });

        Self {
            supervisor: ConnectionSupervisor::new(broker, policy),
            channel: Mutex::new(None),
            pending,
            settings: settings.clone(),
            router,
        }
    }

    /// Publishes `data` to the configured request queue.
    pub async fn submit(&self, data: Map<String, Value>) -> Result<Submission, DispatchError> {
        self.submit_to(&self.settings.request_queue, data).await
    }

    /// Publishes `data` to `queue`, expecting the reply on this client's
    /// reply queue.
    ///
    /// The caller is registered before the request is published, so a reply
    /// cannot overtake its own registration. If publishing fails the
    /// registration is dropped and the error returned.
    ///
    /// The reply timeout starts here. Connecting and publishing count against
    /// it, so a broker that stays down ends in [`DispatchError::Timeout`].
    pub async fn submit_to(&self, queue: &str, data: Map<String, Value>) -> Result<Submission, DispatchError> {
        let body = RequestEnvelope::new(data).encode()?;
        let correlation_id = Uuid::new_v4().to_string();
        let receiver = self.pending.register(&correlation_id)?;
        let reply = PendingReply::new(
            receiver,
            self.pending.clone(),
            correlation_id.clone(),
            self.settings.reply_timeout(),
        );

        let properties = MessageProperties::persistent()
            .with_correlation_id(&correlation_id)
            .with_reply_to(&self.settings.reply_queue)
            .with_priority(self.settings.priority);
        match tokio::time::timeout_at(reply.deadline(), self.publish(queue, &body, &properties)).await {
            Ok(published) => published?,
            Err(_) => {
                warn!(correlation_id = %correlation_id, queue, "gave up publishing request");
                return Err(reply.timeout_error());
            }
        }

        info!(correlation_id = %correlation_id, queue, "request submitted");
        Ok(Submission { correlation_id, reply })
    }

    /// Submits and waits for the reply.
    pub async fn call(&self, data: Map<String, Value>) -> Result<ReplyEnvelope, DispatchError> {
        self.submit(data).await?.reply.await
    }

    /// Number of callers still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Stops the reply router and closes the publish channel. Callers still
    /// waiting observe [`DispatchError::Closed`].
    pub async fn shutdown(self) {
        let Self { router, channel, .. } = self;
        router.join().await;
        if let Some(channel) = channel.into_inner() {
            channel.close().await;
        }
    }

    async fn publish(&self, queue: &str, body: &[u8], properties: &MessageProperties) -> Result<(), DispatchError> {
        let channel = self.channel().await?;
        if let Err(err) = channel.publish(queue, body, properties).await {
            warn!(queue, error = %err, "failed to publish request");
            if err.is_retryable() {
                self.discard(&channel).await;
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Returns the publish channel, connecting if there is none. The slot is
    /// not locked while connecting; when two submits race, the first channel
    /// stored wins and the other is closed.
    async fn channel(&self) -> Result<Arc<B::Channel>, DispatchError> {
        if let Some(channel) = self.channel.lock().await.as_ref() {
            return Ok(channel.clone());
        }
        let fresh = Arc::new(self.supervisor.connect(&self.router.shutdown_signal()).await?);

        let mut slot = self.channel.lock().await;
        if let Some(current) = slot.as_ref() {
            let current = current.clone();
            drop(slot);
            fresh.close().await;
            return Ok(current);
        }
        *slot = Some(fresh.clone());
        Ok(fresh)
    }

    /// Forgets `channel` unless it has already been replaced.
    async fn discard(&self, channel: &Arc<B::Channel>) {
        let mut slot = self.channel.lock().await;
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, channel)) {
            *slot = None;
            drop(slot);
            channel.close().await;
        }
    }
}
