use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use tracing::{debug, info};

use crate::allowlist::Allowlist;
use crate::error::{Result, TransportError};

/// TCP listening endpoint with allowlist filtering in the accept path.
///
/// The listener is placed in non-blocking mode: accept loops poll
/// [`TcpEndpoint::try_accept`] and can observe a shutdown flag between
/// polls instead of parking in the kernel forever.
pub struct TcpEndpoint {
    listener: TcpListener,
    local_addr: SocketAddr,
    allowlist: Allowlist,
}

impl TcpEndpoint {
    /// Bind and listen on a TCP address, admitting any peer.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        Self::bind_with_allowlist(addr, Allowlist::allow_any())
    }

    /// Bind and listen on a TCP address with an allowlist applied.
    pub fn bind_with_allowlist(addr: SocketAddr, allowlist: Allowlist) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
            addr,
            source: e,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|e| TransportError::Bind { addr, source: e })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::Bind { addr, source: e })?;

        info!(%local_addr, "listening on tcp endpoint");

        Ok(Self {
            listener,
            local_addr,
            allowlist,
        })
    }

    /// Accept the next permitted connection, if one is pending.
    ///
    /// Returns `Ok(None)` when no connection is ready. Connections from
    /// addresses outside the allowlist are dropped here, logged at debug
    /// only, and never surface to the caller.
    pub fn try_accept(&self) -> Result<Option<(TcpStream, SocketAddr)>> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if !self.allowlist.permits(peer.ip()) {
                        debug!(%peer, "connection rejected by allowlist");
                        continue; // drop the stream, keep draining
                    }
                    // The accepted socket inherits non-blocking from the
                    // listener on some platforms; connection streams are
                    // used blocking.
                    stream.set_nonblocking(false).map_err(TransportError::Accept)?;
                    stream.set_nodelay(true).map_err(TransportError::Accept)?;
                    debug!(%peer, "accepted connection");
                    return Ok(Some((stream, peer)));
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Accept(err)),
            }
        }
    }

    /// The address this endpoint is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The allowlist applied to incoming connections.
    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }
}

/// Connect to a listening endpoint (blocking, with optional timeout).
pub fn connect(addr: SocketAddr, timeout: Option<Duration>) -> Result<TcpStream> {
    let stream = match timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
        None => TcpStream::connect(addr),
    }
    .map_err(|e| TransportError::Connect { addr, source: e })?;
    stream
        .set_nodelay(true)
        .map_err(|e| TransportError::Connect { addr, source: e })?;
    debug!(%addr, "connected to tcp endpoint");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::time::Instant;

    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn accept_one(endpoint: &TcpEndpoint, within: Duration) -> Option<(TcpStream, SocketAddr)> {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if let Some(pair) = endpoint.try_accept().unwrap() {
                return Some(pair);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn bind_accept_connect() {
        let endpoint = TcpEndpoint::bind(loopback()).unwrap();
        let addr = endpoint.local_addr();

        let handle = std::thread::spawn(move || {
            let mut client = connect(addr, Some(Duration::from_secs(2))).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let (mut server, peer) = accept_one(&endpoint, Duration::from_secs(2)).expect("accept");
        assert!(peer.ip().is_loopback());

        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();
    }

    #[test]
    fn try_accept_returns_none_when_idle() {
        let endpoint = TcpEndpoint::bind(loopback()).unwrap();
        assert!(endpoint.try_accept().unwrap().is_none());
    }

    #[test]
    fn allowlist_denies_unlisted_peer() {
        let allowlist = Allowlist::from_addrs(["10.0.0.5".parse().unwrap()]);
        let endpoint = TcpEndpoint::bind_with_allowlist(loopback(), allowlist).unwrap();
        let addr = endpoint.local_addr();

        // Loopback is not on the list; the connection must be silently
        // dropped rather than surfaced.
        let _client = connect(addr, Some(Duration::from_secs(2))).unwrap();
        assert!(accept_one(&endpoint, Duration::from_millis(300)).is_none());
    }

    #[test]
    fn allowlist_admits_listed_peer() {
        let allowlist = Allowlist::from_addrs(["127.0.0.1".parse().unwrap()]);
        let endpoint = TcpEndpoint::bind_with_allowlist(loopback(), allowlist).unwrap();
        let addr = endpoint.local_addr();

        let _client = connect(addr, Some(Duration::from_secs(2))).unwrap();
        assert!(accept_one(&endpoint, Duration::from_secs(2)).is_some());
    }

    #[test]
    fn connect_refused_maps_to_connect_error() {
        let endpoint = TcpEndpoint::bind(loopback()).unwrap();
        let addr = endpoint.local_addr();
        drop(endpoint);

        let result = connect(addr, Some(Duration::from_millis(500)));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}
