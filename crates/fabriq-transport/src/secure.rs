use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use snow::{Builder, HandshakeState, StatelessTransportState};

use crate::error::{Result, TransportError};
use crate::identity::{Identity, KEY_LEN};

/// Noise protocol configuration for fabriq transport channels.
pub const NOISE_PATTERN: &str = "Noise_XX_25519_ChaChaPoly_SHA256";

/// Maximum Noise message size, fixed by the protocol.
const MAX_RECORD: usize = 65535;

/// AEAD tag appended to every transport record.
const TAG_LEN: usize = 16;

/// Maximum plaintext carried by one record; longer writes are chunked.
pub const MAX_RECORD_PLAINTEXT: usize = MAX_RECORD - TAG_LEN;

/// Maximum hello payload carried in the handshake.
const MAX_HELLO: usize = 256;

/// Client-identity policy applied by the responder once the peer's
/// static key is known.
///
/// `Any` is the permissive mode: every identity from an allowed address
/// is admitted. `Keys` restricts the endpoint to a pinned set of client
/// public keys. Rejection is silent above the transport layer.
#[derive(Debug, Clone, Default)]
pub enum AuthMode {
    /// Admit any client identity.
    #[default]
    Any,
    /// Admit only the listed client public keys.
    Keys(HashSet<[u8; KEY_LEN]>),
}

impl AuthMode {
    /// Build a pinned-keys mode from an iterator of public keys.
    pub fn keys(keys: impl IntoIterator<Item = [u8; KEY_LEN]>) -> Self {
        Self::Keys(keys.into_iter().collect())
    }

    /// Whether a peer presenting `key` may proceed.
    pub fn permits(&self, key: &[u8; KEY_LEN]) -> bool {
        match self {
            Self::Any => true,
            Self::Keys(keys) => keys.contains(key),
        }
    }
}

/// An established encrypted channel, split into halves.
///
/// The halves share one Noise session but own independent nonce
/// counters, so the reader may live on a connection thread while the
/// writer stays with the loop thread — no lock between them.
pub struct SecureChannel {
    /// Decrypting read half.
    pub reader: SecureReader,
    /// Encrypting write half.
    pub writer: SecureWriter,
    /// The peer's static public key, proven during the handshake.
    pub remote_static: [u8; KEY_LEN],
    /// Application hello payload received during the handshake
    /// (the responder's display name, in fabriq's usage).
    pub hello: Vec<u8>,
}

/// Run the responder side of the handshake on a freshly accepted stream.
///
/// `hello` travels to the initiator inside handshake message 2. Socket
/// timeouts cover the whole exchange and are cleared afterwards; the
/// caller re-applies whatever steady-state timeouts it wants.
pub fn secure_responder(
    stream: TcpStream,
    identity: &Identity,
    auth: &AuthMode,
    hello: &[u8],
    timeout: Duration,
) -> Result<SecureChannel> {
    if hello.len() > MAX_HELLO {
        return Err(TransportError::HandshakeFailed(format!(
            "hello payload too large: {} (max {MAX_HELLO})",
            hello.len()
        )));
    }

    apply_timeouts(&stream, Some(timeout))?;
    let mut hs = build_state(identity, false)?;

    // XX: <- e
    let msg1 = read_record(&stream)?;
    let mut scratch = [0u8; MAX_RECORD];
    hs.read_message(&msg1, &mut scratch)?;

    // XX: -> e, ee, s, es  (carries our hello)
    let len = hs.write_message(hello, &mut scratch)?;
    write_record(&stream, &scratch[..len])?;

    // XX: <- s, se
    let msg3 = read_record(&stream)?;
    hs.read_message(&msg3, &mut scratch)?;

    let remote_static = remote_static_key(&hs)?;
    if !auth.permits(&remote_static) {
        return Err(TransportError::Unauthorized);
    }

    apply_timeouts(&stream, None)?;
    into_channel(stream, hs, remote_static, Vec::new())
}

/// Run the initiator side of the handshake on a connected stream.
///
/// When `expected_peer` is set, the responder's static key must match it
/// or the handshake aborts before our own identity is revealed.
pub fn secure_initiator(
    stream: TcpStream,
    identity: &Identity,
    expected_peer: Option<&[u8; KEY_LEN]>,
    timeout: Duration,
) -> Result<SecureChannel> {
    apply_timeouts(&stream, Some(timeout))?;
    let mut hs = build_state(identity, true)?;
    let mut scratch = [0u8; MAX_RECORD];

    // XX: -> e
    let len = hs.write_message(&[], &mut scratch)?;
    write_record(&stream, &scratch[..len])?;

    // XX: <- e, ee, s, es  (carries the responder's hello)
    let msg2 = read_record(&stream)?;
    let hello_len = hs.read_message(&msg2, &mut scratch)?;
    if hello_len > MAX_HELLO {
        return Err(TransportError::HandshakeFailed(format!(
            "hello payload too large: {hello_len} (max {MAX_HELLO})"
        )));
    }
    let hello = scratch[..hello_len].to_vec();

    let remote_static = remote_static_key(&hs)?;
    if let Some(expected) = expected_peer {
        if &remote_static != expected {
            return Err(TransportError::Unauthorized);
        }
    }

    // XX: -> s, se
    let len = hs.write_message(&[], &mut scratch)?;
    write_record(&stream, &scratch[..len])?;

    apply_timeouts(&stream, None)?;
    into_channel(stream, hs, remote_static, hello)
}

fn build_state(identity: &Identity, initiator: bool) -> Result<HandshakeState> {
    let builder = Builder::new(NOISE_PATTERN.parse()?).local_private_key(identity.secret_key());
    let state = if initiator {
        builder.build_initiator()?
    } else {
        builder.build_responder()?
    };
    Ok(state)
}

fn remote_static_key(hs: &HandshakeState) -> Result<[u8; KEY_LEN]> {
    let key = hs.get_remote_static().ok_or_else(|| {
        TransportError::HandshakeFailed("peer sent no static key".to_string())
    })?;
    key.try_into().map_err(|_| {
        TransportError::HandshakeFailed(format!("peer static key has invalid length {}", key.len()))
    })
}

fn into_channel(
    stream: TcpStream,
    hs: HandshakeState,
    remote_static: [u8; KEY_LEN],
    hello: Vec<u8>,
) -> Result<SecureChannel> {
    if !hs.is_handshake_finished() {
        return Err(TransportError::HandshakeFailed(
            "handshake incomplete".to_string(),
        ));
    }
    let transport = Arc::new(hs.into_stateless_transport_mode()?);
    let read_stream = stream.try_clone().map_err(TransportError::Io)?;

    Ok(SecureChannel {
        reader: SecureReader {
            stream: read_stream,
            transport: Arc::clone(&transport),
            nonce: 0,
            plain: BytesMut::new(),
        },
        writer: SecureWriter {
            stream,
            transport,
            nonce: 0,
        },
        remote_static,
        hello,
    })
}

fn apply_timeouts(stream: &TcpStream, timeout: Option<Duration>) -> Result<()> {
    stream.set_read_timeout(timeout).map_err(TransportError::Io)?;
    stream.set_write_timeout(timeout).map_err(TransportError::Io)?;
    Ok(())
}

/// Write one length-prefixed record (u16 BE length + body).
fn write_record(mut stream: &TcpStream, body: &[u8]) -> Result<()> {
    debug_assert!(body.len() <= MAX_RECORD);
    let len = (body.len() as u16).to_be_bytes();
    stream.write_all(&len).map_err(TransportError::Io)?;
    stream.write_all(body).map_err(TransportError::Io)?;
    stream.flush().map_err(TransportError::Io)?;
    Ok(())
}

/// Read one length-prefixed record.
fn read_record(mut stream: &TcpStream) -> Result<Vec<u8>> {
    let mut len = [0u8; 2];
    stream.read_exact(&mut len).map_err(TransportError::Io)?;
    let len = u16::from_be_bytes(len) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).map_err(TransportError::Io)?;
    Ok(body)
}

/// Decrypting read half of a [`SecureChannel`].
///
/// Implements `io::Read` over the plaintext byte stream; records are
/// read and decrypted on demand. Owns the receive-direction nonce.
pub struct SecureReader {
    stream: TcpStream,
    transport: Arc<StatelessTransportState>,
    nonce: u64,
    plain: BytesMut,
}

impl SecureReader {
    /// Borrow the underlying stream (e.g. to set a read timeout).
    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }
}

impl Read for SecureReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.plain.is_empty() {
            // Read the length prefix byte-by-byte so a clean EOF at a
            // record boundary maps to Ok(0) instead of UnexpectedEof.
            let mut first = [0u8; 1];
            let n = loop {
                match self.stream.read(&mut first) {
                    Ok(n) => break n,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err),
                }
            };
            if n == 0 {
                return Ok(0);
            }
            let mut second = [0u8; 1];
            self.stream.read_exact(&mut second)?;
            let len = u16::from_be_bytes([first[0], second[0]]) as usize;

            if len < TAG_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "record shorter than AEAD tag",
                ));
            }

            let mut record = vec![0u8; len];
            self.stream.read_exact(&mut record)?;

            let mut plaintext = vec![0u8; len];
            let n = self
                .transport
                .read_message(self.nonce, &record, &mut plaintext)
                .map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidData, "record decryption failed")
                })?;
            self.nonce += 1;
            self.plain.extend_from_slice(&plaintext[..n]);
        }

        let n = buf.len().min(self.plain.len());
        buf[..n].copy_from_slice(&self.plain[..n]);
        self.plain.advance(n);
        Ok(n)
    }
}

/// Encrypting write half of a [`SecureChannel`].
///
/// Implements `io::Write`; each call encrypts at most one record, so
/// callers using `write_all` (or a framed writer's internal loop) get
/// transparent chunking for payloads beyond one Noise message. Owns the
/// send-direction nonce.
pub struct SecureWriter {
    stream: TcpStream,
    transport: Arc<StatelessTransportState>,
    nonce: u64,
}

impl SecureWriter {
    /// Borrow the underlying stream (e.g. to set a write timeout).
    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }
}

impl Write for SecureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let chunk = &buf[..buf.len().min(MAX_RECORD_PLAINTEXT)];

        let mut record = vec![0u8; chunk.len() + TAG_LEN];
        let n = self
            .transport
            .write_message(self.nonce, chunk, &mut record)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record encryption failed"))?;
        self.nonce += 1;

        let len = (n as u16).to_be_bytes();
        self.stream.write_all(&len)?;
        self.stream.write_all(&record[..n])?;
        Ok(chunk.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}
