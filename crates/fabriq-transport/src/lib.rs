//! Transport layer for the fabriq messaging fabric.
//!
//! Provides the pieces a worker applies to its listening endpoint before
//! it accepts traffic:
//! - [`TcpEndpoint`] — bind / non-blocking accept / connect over TCP
//! - [`Allowlist`] — peer-address filtering inside the accept path
//! - [`Identity`] — the local X25519 keypair, persisted on disk
//! - [`secure`] — Noise handshake plus the encrypted record stream
//!
//! This is the lowest layer of fabriq. Everything else builds on the
//! streams produced here.

pub mod allowlist;
pub mod error;
pub mod identity;
pub mod secure;
pub mod tcp;

pub use allowlist::Allowlist;
pub use error::{Result, TransportError};
pub use identity::{Identity, IdentityError};
pub use secure::{
    secure_initiator, secure_responder, AuthMode, SecureChannel, SecureReader, SecureWriter,
    NOISE_PATTERN,
};
pub use tcp::TcpEndpoint;
