use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};

use crate::codec::{decode_frame, FrameConfig};
use crate::envelope::Envelope;
use crate::error::{EnvelopeError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete envelopes from any `Read` stream.
///
/// Handles partial reads internally — callers always get complete
/// envelopes. Frames already collected for a partially received envelope
/// survive an `Err` return, so a timed-out read can be retried without
/// losing stream state.
pub struct EnvelopeReader<T> {
    inner: T,
    buf: BytesMut,
    pending: Vec<Bytes>,
    config: FrameConfig,
}

impl<T: Read> EnvelopeReader<T> {
    /// Create a new envelope reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new envelope reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            pending: Vec::new(),
            config,
        }
    }

    /// Read the next complete envelope (blocking).
    ///
    /// Returns `Err(EnvelopeError::ConnectionClosed)` when EOF is reached.
    pub fn read_envelope(&mut self) -> Result<Envelope> {
        loop {
            while let Some(frame) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                if self.pending.len() >= self.config.max_frames {
                    return Err(EnvelopeError::TooManyFrames {
                        max: self.config.max_frames,
                    });
                }
                self.pending.push(frame.payload);
                if !frame.more {
                    return Ok(Envelope::from_frames(std::mem::take(&mut self.pending)));
                }
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(EnvelopeError::Io(err)),
            };

            if read == 0 {
                return Err(EnvelopeError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
