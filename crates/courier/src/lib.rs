//! # Courier
//!
//! Broker-mediated request/reply dispatch for inference workers.
//!
//! ## Overview
//!
//! A front-end publishes jobs to a work queue; workers consume them one at a
//! time, run them through a model and publish exactly one reply per job to
//! the queue the requester named. Replies find their way back to the right
//! caller through the broker's own message properties:
//!
//! - `correlation_id` - pairs a reply with its request
//! - `reply_to` - the queue the reply goes to (the worker's default output
//!   queue when absent)
//! - `priority` - 20 unless the requester says otherwise
//! - `delivery_mode` - always persistent
//!
//! Bodies are small JSON envelopes, see [`envelope`].
//!
//! ## Architecture
//!
//! ### Broker seam
//!
//! The [`Broker`](broker::Broker) and [`Channel`](broker::Channel) traits hide
//! the broker. RabbitMQ support comes from `lapin` behind the `amqp` feature;
//! an in-memory broker with fault injection backs the tests.
//!
//! ### Connections
//!
//! A [`ConnectionSupervisor`](crate::core::supervisor::ConnectionSupervisor) opens
//! fresh connections according to a [`RetryPolicy`](crate::core::retry::RetryPolicy).
//! Consumers never repair a broken channel; they drop it and ask for a new
//! one.
//!
//! ### Worker
//!
//! [`Worker`](worker::Worker) consumes with a prefetch of one. Malformed
//! bodies, failing or panicking models and failed reply publishes all end in
//! an acknowledged request; only a lost connection interrupts processing, and
//! the broker redelivers whatever was not acknowledged.
//!
//! ### Dispatch
//!
//! [`DispatchClient`](dispatch::client::DispatchClient) mints a UUID per
//! request, registers the caller before publishing and routes replies back
//! through a background task. Every wait is bounded and cancellable.
//!
//! ## Features
//!
//! - **amqp** (default) - RabbitMQ broker through `lapin`, and the `courier` binary

pub mod broker;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod inference;
pub mod logging;
pub mod properties;
pub mod worker;

pub use crate::core::retry::RetryPolicy;
pub use crate::core::worker::{Shutdown, WorkerHandle};
pub use crate::dispatch::client::{DispatchClient, Submission};
pub use crate::envelope::{ReplyEnvelope, ReplyState, RequestEnvelope};
pub use crate::error::{Error, Result};
pub use crate::inference::{InferenceAdapter, InferenceError};
pub use crate::worker::Worker;

#[cfg(feature = "amqp")]
pub use crate::broker::amqp::AmqpBroker;
