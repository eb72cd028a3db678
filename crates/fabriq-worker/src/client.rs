use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use fabriq_envelope::{Envelope, EnvelopeReader, EnvelopeWriter};
use fabriq_transport::identity::KEY_LEN;
use fabriq_transport::{secure_initiator, tcp, Identity, SecureReader, SecureWriter};

use crate::error::Result;
use crate::request::LIVENESS_PROBE;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client side of a worker's service endpoint.
///
/// Used by tests, demos and the CLI; a production requester would speak
/// the same wire protocol. Requests are `[command][payload...]`
/// envelopes; replies arrive as whatever envelope the handler built.
pub struct ServiceClient {
    reader: EnvelopeReader<SecureReader>,
    writer: EnvelopeWriter<SecureWriter>,
    control: TcpStream,
    server_name: String,
    server_key: [u8; KEY_LEN],
}

impl ServiceClient {
    /// Connect with a fresh throwaway identity and no server pinning.
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        let identity = Identity::generate()?;
        Self::connect_with(addr, &identity, None, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Connect with an explicit identity, optionally pinning the
    /// worker's public key.
    pub fn connect_with(
        addr: SocketAddr,
        identity: &Identity,
        expected_server_key: Option<[u8; KEY_LEN]>,
        timeout: Duration,
    ) -> Result<Self> {
        let stream = tcp::connect(addr, Some(timeout))?;
        let control = stream.try_clone()?;
        let channel = secure_initiator(stream, identity, expected_server_key.as_ref(), timeout)?;
        let server_name = String::from_utf8_lossy(&channel.hello).into_owned();

        Ok(Self {
            reader: EnvelopeReader::new(channel.reader),
            writer: EnvelopeWriter::new(channel.writer),
            control,
            server_name,
            server_key: channel.remote_static,
        })
    }

    /// Send one request: the command name followed by payload frames.
    pub fn request(&mut self, command: &str, payload: &[&[u8]]) -> Result<()> {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(payload.len() + 1);
        parts.push(command.as_bytes());
        parts.extend_from_slice(payload);
        self.writer.send_parts(&parts)?;
        Ok(())
    }

    /// Send a raw envelope.
    pub fn send(&mut self, envelope: &Envelope) -> Result<()> {
        self.writer.write_envelope(envelope)?;
        Ok(())
    }

    /// Receive the next reply envelope (blocking, honoring any timeout
    /// set via [`ServiceClient::set_recv_timeout`]).
    pub fn recv(&mut self) -> Result<Envelope> {
        Ok(self.reader.read_envelope()?)
    }

    /// Send the reserved liveness sentinel. The worker treats it as a
    /// protocol-level no-op: no dispatch, no reply.
    pub fn probe(&mut self) -> Result<()> {
        self.writer.send_parts(&[LIVENESS_PROBE.as_bytes()])?;
        Ok(())
    }

    /// Bound how long [`ServiceClient::recv`] may block.
    pub fn set_recv_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.control.set_read_timeout(timeout)?;
        Ok(())
    }

    /// The worker's display name, announced during the handshake.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// The worker's static public key, proven during the handshake.
    pub fn server_key(&self) -> [u8; KEY_LEN] {
        self.server_key
    }
}
