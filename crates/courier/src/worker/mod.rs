//! # Worker
//!
//! The consumer side of the protocol. A [`Worker`] pulls requests from its
//! input queue one at a time, runs them through an
//! [`InferenceAdapter`](crate::inference::InferenceAdapter) and publishes
//! exactly one reply per request before acknowledging it.
//!
//! * [`handler`] - the per-message state machine
//! * [`publisher`] - reply emission
//! * [`stats`] - counters and latency

pub mod handler;
pub mod publisher;
pub mod stats;

use std::sync::Arc;
use crate::broker::{Broker, QueueOptions};
use crate::config::WorkerSettings;
use crate::core::consume::{ConsumerOptions, consume_loop};
use crate::core::retry::RetryPolicy;
use crate::core::supervisor::ConnectionSupervisor;
use crate::core::worker::Shutdown;
use crate::error::SupervisorError;
use crate::inference::InferenceAdapter;
use self::handler::InferenceHandler;
use self::stats::WorkerStats;

/// A worker bound to one broker and one input queue.
pub struct Worker<B, A> {
    supervisor: ConnectionSupervisor<B>,
    options: ConsumerOptions,
    handler: InferenceHandler<A>,
}

impl<B, A> Worker<B, A>
where
    B: Broker,
    A: InferenceAdapter,
{
    pub fn new(broker: B, adapter: A, settings: &WorkerSettings, policy: RetryPolicy) -> Self {
        let mut options = ConsumerOptions::new(&settings.input_queue, &settings.consumer_tag);
        if settings.declare_queues {
            options = options
                .declare(&settings.input_queue, QueueOptions {
                    durable: true,
                    max_priority: settings.max_priority,
                })
                .declare(&settings.default_output_queue, QueueOptions::default());
        }
        Self {
            supervisor: ConnectionSupervisor::new(broker, policy),
            options,
            handler: InferenceHandler::new(adapter, &settings.default_output_queue),
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.handler.stats()
    }

    /// Consumes until `shutdown` fires or a fatal broker error occurs.
    pub async fn run(&self, shutdown: &Shutdown) -> Result<(), SupervisorError> {
        tracing::info!(
            queue = %self.options.queue,
            prefetch = self.options.prefetch,
            "worker starting"
        );
        consume_loop(&self.supervisor, &self.options, &self.handler, shutdown).await
    }
}
