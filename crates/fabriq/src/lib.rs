//! Request/response messaging fabric worker node.
//!
//! fabriq is the request-routing core of a single worker in a
//! request/reply fabric: framed requests in, command dispatch, replies
//! out through a cross-thread relay, liveness beacons on the side — all
//! behind a connection allowlist and an encrypted transport identity.
//!
//! # Crate Structure
//!
//! - [`transport`] — TCP endpoint, allowlist, identity, secure channel
//! - [`envelope`] — Multi-frame envelope codec
//! - [`worker`] — Dispatch table, reply relay, beacon, the event loop

/// Re-export transport types.
pub mod transport {
    pub use fabriq_transport::*;
}

/// Re-export envelope types.
pub mod envelope {
    pub use fabriq_envelope::*;
}

/// Re-export worker types.
pub mod worker {
    pub use fabriq_worker::*;
}
