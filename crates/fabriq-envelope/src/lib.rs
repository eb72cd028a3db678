//! Multi-frame envelope codec for the fabriq messaging fabric.
//!
//! One logical request or reply is an *envelope*: an ordered sequence of
//! opaque frames. Every frame is length-prefixed with:
//! - A 2-byte magic number ("FQ") for stream synchronization
//! - A 1-byte flags field; bit 0 (MORE) chains frames into one envelope
//! - A 4-byte little-endian payload length
//!
//! No partial reads, no buffer management in user code.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use envelope::{Envelope, MAX_ENVELOPE_FRAMES};
pub use error::{EnvelopeError, Result};
pub use reader::EnvelopeReader;
pub use writer::EnvelopeWriter;
