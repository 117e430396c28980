//! # Core
//!
//! Connection management and consumption, independent of what is consumed.
//!
//! ## Module Structure
//!
//! * [`retry`] - The [`RetryPolicy`](retry::RetryPolicy) that decides how long
//!   to wait between connection attempts and when to give up.
//!
//! * [`supervisor`] - The [`ConnectionSupervisor`](supervisor::ConnectionSupervisor)
//!   establishes fresh broker connections, retrying according to the policy
//!   and stopping early on fatal errors or shutdown.
//!
//! * [`consume`] - The consumer loop. Pulls deliveries one at a time, hands
//!   them to a [`DeliveryHandler`](consume::DeliveryHandler) and rebuilds the
//!   channel whenever the connection is lost.
//!
//! * [`worker`] - Background task management. [`Shutdown`](worker::Shutdown)
//!   is the cooperative stop signal and [`WorkerHandle`](worker::WorkerHandle)
//!   owns a spawned task, stopping it when dropped.
pub mod consume;
pub mod retry;
pub mod supervisor;
pub mod worker;
