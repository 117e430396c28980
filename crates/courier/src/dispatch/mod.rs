//! # Dispatch
//!
//! The front-end side of the protocol: submit a job, get a handle, await the
//! reply.
//!
//! * [`client`] - [`DispatchClient`](client::DispatchClient) publishes requests and owns the reply router
//! * [`pending`] - the table of callers waiting for replies, keyed by correlation id
//! * [`reply`] - [`PendingReply`](reply::PendingReply), the bounded, cancellable wait
//! * [`router`] - consumes the reply queue and completes waiting callers

pub mod client;
pub mod pending;
pub mod reply;
pub mod router;
