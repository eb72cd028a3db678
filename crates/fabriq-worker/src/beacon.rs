use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Receiver;
use fabriq_envelope::{EnvelopeReader, EnvelopeWriter};
use fabriq_transport::{tcp, TcpEndpoint};
use tracing::{debug, info, warn};

use crate::error::{Result, WorkerError};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Bound on how long one beacon write may stall on a slow subscriber.
const SUBSCRIBER_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Broadcast-only heartbeat endpoint.
///
/// Subscribers connect over plain TCP and receive one single-frame
/// envelope per beacon carrying a 4-byte little-endian counter. No
/// acknowledgement exists; a beacon with no subscribers is not an
/// error. The counter itself is owned by the loop and passed in per
/// publish, so several workers in one process never share state.
pub struct BeaconPublisher {
    incoming: Receiver<TcpStream>,
    subscribers: Vec<EnvelopeWriter<TcpStream>>,
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    accept_handle: Option<JoinHandle<()>>,
}

impl BeaconPublisher {
    /// Bind the heartbeat endpoint.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let endpoint = TcpEndpoint::bind(addr)?;
        let local_addr = endpoint.local_addr();

        let (tx, rx) = crossbeam_channel::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));

        let shutdown_flag = Arc::clone(&shutdown);
        let accept_handle = std::thread::spawn(move || {
            while !shutdown_flag.load(Ordering::Relaxed) {
                match endpoint.try_accept() {
                    Ok(Some((stream, peer))) => {
                        if let Err(err) = stream.set_write_timeout(Some(SUBSCRIBER_SEND_TIMEOUT)) {
                            debug!(%peer, error = %err, "beacon subscriber setup failed");
                            continue;
                        }
                        debug!(%peer, "beacon subscriber connected");
                        if tx.send(stream).is_err() {
                            break;
                        }
                    }
                    Ok(None) => std::thread::sleep(ACCEPT_POLL_INTERVAL),
                    Err(err) => {
                        warn!(error = %err, "beacon accept failed");
                        std::thread::sleep(ACCEPT_POLL_INTERVAL);
                    }
                }
            }
        });

        info!(%local_addr, "heartbeat endpoint ready");

        Ok(Self {
            incoming: rx,
            subscribers: Vec::new(),
            local_addr,
            shutdown,
            accept_handle: Some(accept_handle),
        })
    }

    /// Emit one beacon: serialize the counter, broadcast it, then
    /// increment (wrapping silently on overflow). Subscribers whose
    /// write fails are discarded.
    pub fn publish(&mut self, counter: &mut u32) {
        while let Ok(stream) = self.incoming.try_recv() {
            self.subscribers.push(EnvelopeWriter::new(stream));
        }

        let frame = counter.to_le_bytes();
        self.subscribers.retain_mut(|sub| match sub.send_parts(&[&frame]) {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %err, "dropping beacon subscriber");
                false
            }
        });

        *counter = counter.wrapping_add(1);
    }

    /// The address the endpoint is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Subscribers adopted so far (newly connected peers are counted
    /// from the first publish after they connect).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Drop for BeaconPublisher {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Client side of the heartbeat endpoint.
pub struct BeaconSubscriber {
    reader: EnvelopeReader<TcpStream>,
    control: TcpStream,
}

impl BeaconSubscriber {
    /// Connect to a worker's heartbeat endpoint.
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = tcp::connect(addr, Some(Duration::from_secs(5)))?;
        let control = stream.try_clone()?;
        Ok(Self {
            reader: EnvelopeReader::new(stream),
            control,
        })
    }

    /// Receive the next beacon counter (blocking, honoring any timeout
    /// set via [`BeaconSubscriber::set_recv_timeout`]).
    pub fn recv(&mut self) -> Result<u32> {
        let envelope = self.reader.read_envelope()?;
        let [frame] = envelope.frames() else {
            return Err(WorkerError::Malformed(format!(
                "beacon envelope has {} frames, expected 1",
                envelope.len()
            )));
        };
        let bytes: [u8; 4] = frame.as_ref().try_into().map_err(|_| {
            WorkerError::Malformed(format!(
                "beacon counter has {} bytes, expected 4",
                frame.len()
            ))
        })?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Bound how long [`BeaconSubscriber::recv`] may block.
    pub fn set_recv_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.control.set_read_timeout(timeout)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn bind_publisher() -> BeaconPublisher {
        BeaconPublisher::bind("127.0.0.1:0".parse().unwrap()).unwrap()
    }

    #[test]
    fn publish_without_subscribers_increments() {
        let mut publisher = bind_publisher();
        let mut counter = 0u32;

        publisher.publish(&mut counter);
        publisher.publish(&mut counter);

        assert_eq!(counter, 2);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[test]
    fn counter_wraps_silently() {
        let mut publisher = bind_publisher();
        let mut counter = u32::MAX;

        publisher.publish(&mut counter);

        assert_eq!(counter, 0);
    }

    #[test]
    fn subscriber_receives_consecutive_counters() {
        let mut publisher = bind_publisher();
        let mut subscriber = BeaconSubscriber::connect(publisher.local_addr()).unwrap();
        subscriber.set_recv_timeout(Some(Duration::from_secs(2))).unwrap();

        // Give the accept thread time to adopt the subscriber.
        std::thread::sleep(Duration::from_millis(200));

        let mut counter = 0u32;
        publisher.publish(&mut counter);
        publisher.publish(&mut counter);
        publisher.publish(&mut counter);

        assert_eq!(subscriber.recv().unwrap(), 0);
        assert_eq!(subscriber.recv().unwrap(), 1);
        assert_eq!(subscriber.recv().unwrap(), 2);
    }

    #[test]
    fn late_subscriber_sees_current_counter() {
        let mut publisher = bind_publisher();
        let mut counter = 0u32;
        publisher.publish(&mut counter);
        publisher.publish(&mut counter);

        let mut subscriber = BeaconSubscriber::connect(publisher.local_addr()).unwrap();
        subscriber.set_recv_timeout(Some(Duration::from_secs(2))).unwrap();
        std::thread::sleep(Duration::from_millis(200));

        publisher.publish(&mut counter);
        assert_eq!(subscriber.recv().unwrap(), 2);
    }

    #[test]
    fn dead_subscriber_is_discarded() {
        let mut publisher = bind_publisher();
        let subscriber = BeaconSubscriber::connect(publisher.local_addr()).unwrap();
        std::thread::sleep(Duration::from_millis(200));

        let mut counter = 0u32;
        publisher.publish(&mut counter);
        assert_eq!(publisher.subscriber_count(), 1);

        drop(subscriber);

        // Writes to a closed peer may succeed until the OS reports the
        // reset; keep publishing until the subscriber is discarded.
        let deadline = Instant::now() + Duration::from_secs(2);
        while publisher.subscriber_count() > 0 && Instant::now() < deadline {
            publisher.publish(&mut counter);
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(publisher.subscriber_count(), 0);
    }
}
