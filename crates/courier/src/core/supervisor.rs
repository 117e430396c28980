use tracing::{error, info, warn};
use crate::broker::Broker;
use crate::core::retry::RetryPolicy;
use crate::core::worker::Shutdown;
use crate::error::SupervisorError;

/// Establishes broker connections, retrying according to a [`RetryPolicy`].
///
/// The supervisor holds no connection itself: each successful
/// [`connect`](Self::connect) yields a brand-new channel that the caller owns
/// and discards wholesale when it fails.
#[derive(Debug, Clone)]
pub struct ConnectionSupervisor<B> {
    broker: B,
    policy: RetryPolicy,
}

impl<B: Broker> ConnectionSupervisor<B> {
    pub fn new(broker: B, policy: RetryPolicy) -> Self {
        Self { broker, policy }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Connects, retrying retryable failures until the policy gives up.
    ///
    /// # Errors
    ///
    /// * [`SupervisorError::Fatal`] - the broker reported a non-retryable error
    /// * [`SupervisorError::Exhausted`] - the policy ran out of attempts
    /// * [`SupervisorError::Interrupted`] - `shutdown` fired before a connection was made
    pub async fn connect(&self, shutdown: &Shutdown) -> Result<B::Channel, SupervisorError> {
        let mut attempt: u32 = 0;
        loop {
            if !shutdown.is_running() {
                return Err(SupervisorError::Interrupted);
            }
            attempt += 1;
            let err = match self.broker.connect().await {
                Ok(channel) => {
                    info!(attempt, "connected to broker");
                    return Ok(channel);
                }
                Err(err) => err,
            };

            if err.is_fatal() {
                error!(attempt, error = %err, "broker connection failed with a fatal error");
                return Err(SupervisorError::Fatal(err));
            }
            if !self.policy.allows(attempt + 1) {
                error!(attempt, error = %err, "broker connection failed, no attempts left");
                return Err(SupervisorError::Exhausted { attempts: attempt, last: err });
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "broker connection failed, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.stopped() => return Err(SupervisorError::Interrupted),
            }
        }
    }
}
