//! Request-routing worker core for the fabriq messaging fabric.
//!
//! A [`RequestWorker`] owns one service endpoint and one heartbeat
//! endpoint. Framed client requests arrive on the service endpoint, are
//! dispatched by command name to registered handlers, and replies flow
//! back through a cross-thread relay so handler code may answer from any
//! thread. A monotonically increasing beacon is broadcast on the
//! heartbeat endpoint at a fixed interval, independent of request
//! traffic.
//!
//! The whole core runs on a single loop thread: one bounded wait per
//! iteration over the service endpoint and the relay, at most one
//! message serviced, then an unconditional heartbeat-deadline check.

pub mod beacon;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod relay;
pub mod request;
pub mod service;
pub mod worker;

pub use beacon::{BeaconPublisher, BeaconSubscriber};
pub use client::ServiceClient;
pub use config::Config;
pub use dispatch::{CommandHandler, DispatchTable};
pub use error::{Result, WorkerError};
pub use relay::{RelayClosed, ReplyQueue};
pub use request::{ConnectionId, Origin, Reply, Request, LIVENESS_PROBE};
pub use service::ServiceEndpoint;
pub use worker::{RequestWorker, StopHandle};
