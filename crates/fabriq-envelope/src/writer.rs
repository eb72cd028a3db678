use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, FrameConfig};
use crate::envelope::Envelope;
use crate::error::{EnvelopeError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete envelopes to any `Write` stream.
///
/// Unlike a non-blocking writer, `WouldBlock` and `TimedOut` propagate as
/// errors: fabriq sockets carry send timeouts so a stalled peer surfaces
/// as a failed write instead of a blocked loop.
pub struct EnvelopeWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> EnvelopeWriter<T> {
    /// Create a new envelope writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new envelope writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a complete envelope (blocking).
    pub fn write_envelope(&mut self, envelope: &Envelope) -> Result<()> {
        let frames: Vec<&[u8]> = envelope.frames().iter().map(|b| b.as_ref()).collect();
        self.send_parts(&frames)
    }

    /// Encode and send an envelope from raw frame slices.
    pub fn send_parts(&mut self, parts: &[&[u8]]) -> Result<()> {
        if parts.is_empty() {
            return Err(EnvelopeError::EmptyEnvelope);
        }
        if parts.len() > self.config.max_frames {
            return Err(EnvelopeError::TooManyFrames {
                max: self.config.max_frames,
            });
        }
        for part in parts {
            if part.len() > self.config.max_payload_size {
                return Err(EnvelopeError::PayloadTooLarge {
                    size: part.len(),
                    max: self.config.max_payload_size,
                });
            }
        }

        self.buf.clear();
        for (i, part) in parts.iter().enumerate() {
            encode_frame(part, i + 1 < parts.len(), &mut self.buf)?;
        }

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(EnvelopeError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(EnvelopeError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(EnvelopeError::Io(err)),
            }
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

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
