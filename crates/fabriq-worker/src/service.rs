use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use fabriq_envelope::{Envelope, EnvelopeError, EnvelopeReader, EnvelopeWriter};
use fabriq_transport::{
    secure_responder, Allowlist, AuthMode, Identity, SecureWriter, TcpEndpoint,
};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::request::{ConnectionId, Origin, Reply};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

type PeerWriter = EnvelopeWriter<SecureWriter>;
type Registry = Arc<Mutex<HashMap<ConnectionId, TcpStream>>>;

/// Internal event stream from accept/connection threads to the loop.
pub(crate) enum ServiceEvent {
    Connected {
        id: ConnectionId,
        addr: SocketAddr,
        writer: Box<PeerWriter>,
    },
    Envelope {
        id: ConnectionId,
        addr: SocketAddr,
        envelope: Envelope,
    },
    Disconnected {
        id: ConnectionId,
    },
}

/// The worker's listening endpoint.
///
/// Accepts allowlisted, identity-checked connections, assigns each a
/// routing id, and feeds decoded envelopes into a single event channel.
/// The writer half of every connection is owned here — and this struct
/// is owned by the loop thread, so only the loop thread ever writes to
/// service sockets. Reader threads touch nothing but their own stream
/// and the event sender.
pub struct ServiceEndpoint {
    events: Receiver<ServiceEvent>,
    writers: HashMap<ConnectionId, (PeerWriter, SocketAddr)>,
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    registry: Registry,
    accept_handle: Option<JoinHandle<()>>,
}

impl ServiceEndpoint {
    /// Apply the security bootstrap and bind the listening endpoint.
    ///
    /// The allowlist and identity are in force before the first accept;
    /// a failed bind is fatal to startup.
    pub fn bind(config: &Config, identity: Identity) -> Result<Self> {
        let allowlist = Allowlist::from_addrs(config.allowlist.iter().copied());
        let endpoint = TcpEndpoint::bind_with_allowlist(config.service, allowlist)?;
        let local_addr = endpoint.local_addr();

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let registry: Registry = Arc::new(Mutex::new(HashMap::new()));

        let acceptor = Acceptor {
            endpoint,
            identity,
            auth: config.auth.clone(),
            hello: config.name.clone().into_bytes(),
            handshake_timeout: config.handshake_timeout,
            send_timeout: config.send_timeout,
            events: events_tx,
            shutdown: Arc::clone(&shutdown),
            registry: Arc::clone(&registry),
        };
        let accept_handle = std::thread::spawn(move || acceptor.run());

        info!(%local_addr, "service endpoint ready");

        Ok(Self {
            events: events_rx,
            writers: HashMap::new(),
            local_addr,
            shutdown,
            registry,
            accept_handle: Some(accept_handle),
        })
    }

    /// The address the endpoint is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Event channel, for registering with the loop's bounded wait.
    pub(crate) fn events(&self) -> &Receiver<ServiceEvent> {
        &self.events
    }

    /// Take at most one pending envelope, folding connection
    /// bookkeeping (writer registration/removal) along the way.
    pub(crate) fn recv_ready(&mut self) -> Option<(Origin, Envelope)> {
        loop {
            match self.events.try_recv() {
                Ok(ServiceEvent::Connected { id, addr, writer }) => {
                    debug!(%id, peer = %addr, "peer connected");
                    self.writers.insert(id, (*writer, addr));
                }
                Ok(ServiceEvent::Disconnected { id }) => {
                    debug!(%id, "peer disconnected");
                    self.writers.remove(&id);
                }
                Ok(ServiceEvent::Envelope { id, addr, envelope }) => {
                    return Some((Origin::new(id, addr), envelope));
                }
                Err(_) => return None,
            }
        }
    }

    /// Forward a reply envelope to the connection named by its routing
    /// prefix. Delivery failures are silent at this layer: the peer is
    /// gone or stalled, and the requester has no channel to be told.
    pub(crate) fn send(&mut self, reply: Reply) {
        let id = reply.origin().id();
        if reply.envelope().is_empty() {
            debug!(origin = %reply.origin(), "discarding empty reply envelope");
            return;
        }
        let Some((writer, _addr)) = self.writers.get_mut(&id) else {
            debug!(origin = %reply.origin(), "peer gone; dropping reply");
            return;
        };
        if let Err(err) = writer.write_envelope(reply.envelope()) {
            debug!(origin = %reply.origin(), error = %err, "send failed; dropping connection");
            self.writers.remove(&id);
        }
    }
}

impl Drop for ServiceEndpoint {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Unblock reader threads parked on socket reads.
        if let Ok(mut registry) = self.registry.lock() {
            for (_, stream) in registry.drain() {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
        }
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
    }
}

/// State shared by the accept loop and handed to connection threads.
struct Acceptor {
    endpoint: TcpEndpoint,
    identity: Identity,
    auth: AuthMode,
    hello: Vec<u8>,
    handshake_timeout: Duration,
    send_timeout: Duration,
    events: Sender<ServiceEvent>,
    shutdown: Arc<AtomicBool>,
    registry: Registry,
}

impl Acceptor {
    fn run(self) {
        let mut next_id = 1u64;
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.endpoint.try_accept() {
                Ok(Some((stream, addr))) => {
                    let id = ConnectionId::new(next_id);
                    next_id += 1;
                    self.spawn_connection(id, stream, addr);
                }
                Ok(None) => std::thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }
    }

    fn spawn_connection(&self, id: ConnectionId, stream: TcpStream, addr: SocketAddr) {
        let identity = self.identity.clone();
        let auth = self.auth.clone();
        let hello = self.hello.clone();
        let handshake_timeout = self.handshake_timeout;
        let send_timeout = self.send_timeout;
        let events = self.events.clone();
        let registry = Arc::clone(&self.registry);

        std::thread::spawn(move || {
            run_connection(
                id,
                stream,
                addr,
                &identity,
                &auth,
                &hello,
                handshake_timeout,
                send_timeout,
                events,
                registry,
            );
        });
    }
}

#[allow(clippy::too_many_arguments)]
fn run_connection(
    id: ConnectionId,
    stream: TcpStream,
    addr: SocketAddr,
    identity: &Identity,
    auth: &AuthMode,
    hello: &[u8],
    handshake_timeout: Duration,
    send_timeout: Duration,
    events: Sender<ServiceEvent>,
    registry: Registry,
) {
    // Register before the handshake so endpoint teardown can unblock
    // this thread at any point in the connection's life.
    match stream.try_clone() {
        Ok(guard) => {
            if let Ok(mut reg) = registry.lock() {
                reg.insert(id, guard);
            }
        }
        Err(err) => {
            debug!(peer = %addr, error = %err, "connection setup failed");
            return;
        }
    }

    let channel = match secure_responder(stream, identity, auth, hello, handshake_timeout) {
        Ok(channel) => channel,
        Err(err) => {
            // Allowlist/identity rejections are silent above the
            // transport layer.
            debug!(peer = %addr, error = %err, "handshake failed");
            remove_from_registry(&registry, id);
            return;
        }
    };

    // Steady state: reads block until traffic or teardown; writes (done
    // by the loop thread) are bounded so a stalled peer cannot stall
    // the loop.
    if let Err(err) = channel
        .writer
        .get_ref()
        .set_write_timeout(Some(send_timeout))
    {
        debug!(peer = %addr, error = %err, "connection setup failed");
        remove_from_registry(&registry, id);
        return;
    }

    let writer = EnvelopeWriter::new(channel.writer);
    if events
        .send(ServiceEvent::Connected {
            id,
            addr,
            writer: Box::new(writer),
        })
        .is_err()
    {
        remove_from_registry(&registry, id);
        return;
    }

    let mut reader = EnvelopeReader::new(channel.reader);
    loop {
        match reader.read_envelope() {
            Ok(envelope) => {
                if events
                    .send(ServiceEvent::Envelope { id, addr, envelope })
                    .is_err()
                {
                    break;
                }
            }
            Err(EnvelopeError::ConnectionClosed) => {
                let _ = events.send(ServiceEvent::Disconnected { id });
                break;
            }
            Err(err) => {
                warn!(peer = %addr, error = %err, "dropping connection");
                let _ = events.send(ServiceEvent::Disconnected { id });
                break;
            }
        }
    }
    remove_from_registry(&registry, id);
}

fn remove_from_registry(registry: &Registry, id: ConnectionId) {
    if let Ok(mut reg) = registry.lock() {
        reg.remove(&id);
    }
}
