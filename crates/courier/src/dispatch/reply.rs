use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, Sleep};
use crate::envelope::ReplyEnvelope;
use crate::error::DispatchError;
use super::pending::PendingTable;

/// # PendingReply
///
/// Resolves to the reply for one submitted request.
///
/// The wait is bounded: once the timeout elapses the future resolves to
/// [`DispatchError::Timeout`]. Dropping the future before it resolves cancels
/// the wait. Either way the correlation id leaves the pending table, so a
/// late reply is treated as unknown.
pub struct PendingReply {
    receiver: oneshot::Receiver<ReplyEnvelope>,
    deadline: Pin<Box<Sleep>>,
    table: Arc<PendingTable>,
    correlation_id: String,
    timeout: Duration,
}

impl PendingReply {
    pub(crate) fn new(
        receiver: oneshot::Receiver<ReplyEnvelope>,
        table: Arc<PendingTable>,
        correlation_id: String,
        timeout: Duration,
    ) -> Self {
        Self {
            receiver,
            deadline: Box::pin(tokio::time::sleep(timeout)),
            table,
            correlation_id,
            timeout,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// The instant the wait gives up.
    pub(crate) fn deadline(&self) -> Instant {
        self.deadline.deadline()
    }

    pub(crate) fn timeout_error(&self) -> DispatchError {
        DispatchError::Timeout {
            correlation_id: self.correlation_id.clone(),
            timeout: self.timeout,
        }
    }
}

impl Future for PendingReply {
    type Output = Result<ReplyEnvelope, DispatchError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(reply)) => return Poll::Ready(Ok(reply)),
            Poll::Ready(Err(_)) => {
                return Poll::Ready(Err(DispatchError::Closed(this.correlation_id.clone())));
            }
            Poll::Pending => {}
        }
        match this.deadline.as_mut().poll(cx) {
            Poll::Ready(()) => {
                this.table.remove(&this.correlation_id);
                Poll::Ready(Err(this.timeout_error()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.table.remove(&self.correlation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::dispatch::pending::Completion;

    fn pending(table: &Arc<PendingTable>, id: &str, timeout: Duration) -> PendingReply {
        let receiver = table.register(id).unwrap();
        PendingReply::new(receiver, table.clone(), id.to_string(), timeout)
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_with_reply() {
        let table = Arc::new(PendingTable::new());
        let reply = pending(&table, "a", Duration::from_secs(5));

        table.complete("a", ReplyEnvelope::success(json!({"label": "ok"})));
        assert!(reply.await.unwrap().is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_and_forgets_entry() {
        let table = Arc::new(PendingTable::new());
        let reply = pending(&table, "slow", Duration::from_secs(5));

        let err = reply.await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { ref correlation_id, timeout }
            if correlation_id == "slow" && timeout == Duration::from_secs(5)));
        assert!(table.is_empty());
        assert_eq!(table.complete("slow", ReplyEnvelope::success(json!({}))), Completion::Unknown);
    }

    #[tokio::test]
    async fn test_drop_cancels_wait() {
        let table = Arc::new(PendingTable::new());
        let reply = pending(&table, "a", Duration::from_secs(5));
        assert!(table.contains("a"));

        drop(reply);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_closed_table_resolves_with_error() {
        let table = Arc::new(PendingTable::new());
        let reply = pending(&table, "a", Duration::from_secs(5));

        table.close_all();
        assert!(matches!(reply.await, Err(DispatchError::Closed(id)) if id == "a"));
    }
}
