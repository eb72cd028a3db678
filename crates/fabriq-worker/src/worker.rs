use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Select};
use fabriq_envelope::Envelope;
use fabriq_transport::Identity;
use tracing::{debug, info, trace, warn};

use crate::beacon::BeaconPublisher;
use crate::config::Config;
use crate::dispatch::DispatchTable;
use crate::error::Result;
use crate::relay::{relay_channel, ReplyQueue};
use crate::request::{Origin, Reply, Request};
use crate::service::ServiceEndpoint;

/// Cloneable handle that asks a running worker loop to stop.
///
/// The flag is checked once per iteration, so stop latency is bounded
/// by the loop's poll timeout. Replies already in the relay when the
/// flag is raised are still forwarded by the remaining iteration.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Request the loop to stop after its current iteration.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The request-routing core of one worker node.
///
/// One thread owns this value and with it the service endpoint's send
/// path, the heartbeat deadline and the beacon counter. Handlers may
/// run wherever they like; anything they need to send travels back
/// through the [`ReplyQueue`].
///
/// ```no_run
/// use fabriq_worker::{Config, RequestWorker};
///
/// # fn main() -> fabriq_worker::Result<()> {
/// let config = Config::new(
///     "0.0.0.0:9091".parse().unwrap(),
///     "0.0.0.0:9092".parse().unwrap(),
///     "/etc/fabriq/identity.json",
/// );
/// let mut worker = RequestWorker::start(config)?;
/// worker.attach("echo", |request, replies| {
///     let _ = replies.enqueue(request.reply(request.payload().to_vec()));
/// });
/// worker.run();
/// # Ok(())
/// # }
/// ```
pub struct RequestWorker {
    endpoint: ServiceEndpoint,
    beacon: BeaconPublisher,
    dispatch: DispatchTable,
    relay_tx: ReplyQueue,
    relay_rx: Receiver<Reply>,
    heartbeat_counter: u32,
    heartbeat_at: Instant,
    heartbeat_interval: Duration,
    poll_timeout: Duration,
    log_requests: bool,
    stop: Arc<AtomicBool>,
}

impl RequestWorker {
    /// Perform the security bootstrap and bind both endpoints.
    ///
    /// Identity and bind failures are fatal: the worker must not start
    /// listening without its keys, and a dead address is unrecoverable.
    pub fn start(config: Config) -> Result<Self> {
        let identity = Identity::load(&config.identity)?;
        let endpoint = ServiceEndpoint::bind(&config, identity)?;
        let beacon = BeaconPublisher::bind(config.heartbeat)?;
        let (relay_tx, relay_rx) = relay_channel();

        info!(
            name = %config.name,
            service = %endpoint.local_addr(),
            heartbeat = %beacon.local_addr(),
            "worker ready"
        );

        Ok(Self {
            endpoint,
            beacon,
            dispatch: DispatchTable::new(),
            relay_tx,
            relay_rx,
            heartbeat_counter: 0,
            heartbeat_at: Instant::now() + config.heartbeat_interval,
            heartbeat_interval: config.heartbeat_interval,
            poll_timeout: config.poll_timeout,
            log_requests: config.log_requests,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Register a handler for a command name. Must be called before the
    /// loop starts; the last registration for a name wins.
    pub fn attach<F>(&mut self, command: impl Into<String>, handler: F)
    where
        F: Fn(&Request, &ReplyQueue) + Send + 'static,
    {
        self.dispatch.register(command, Box::new(handler));
    }

    /// A fresh enqueue capability for the reply relay.
    pub fn reply_queue(&self) -> ReplyQueue {
        self.relay_tx.clone()
    }

    /// Handle for stopping [`RequestWorker::run`] from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stop))
    }

    /// The bound service address.
    pub fn service_addr(&self) -> std::net::SocketAddr {
        self.endpoint.local_addr()
    }

    /// The bound heartbeat address.
    pub fn heartbeat_addr(&self) -> std::net::SocketAddr {
        self.beacon.local_addr()
    }

    /// Run one bounded loop iteration.
    ///
    /// This is the embedding seam: an application that wants the worker
    /// inside its own run loop calls this repeatedly instead of
    /// [`RequestWorker::run`]. Each iteration waits at most the poll
    /// timeout, services at most one message across both sources
    /// (inbound requests take priority over queued replies), and always
    /// checks the heartbeat deadline — which is how beacons keep
    /// flowing when traffic is idle and cannot be starved when it
    /// isn't.
    pub fn update(&mut self) {
        {
            let mut select = Select::new();
            select.recv(self.endpoint.events());
            select.recv(&self.relay_rx);
            let _ = select.ready_timeout(self.poll_timeout);
        }

        if let Some((origin, envelope)) = self.endpoint.recv_ready() {
            self.dispatch_envelope(origin, envelope);
        } else if let Ok(reply) = self.relay_rx.try_recv() {
            self.endpoint.send(reply);
        }

        let now = Instant::now();
        if now >= self.heartbeat_at {
            // Fixed-interval scheduling: no catch-up beacons when the
            // loop is delayed.
            self.heartbeat_at = now + self.heartbeat_interval;
            debug!(counter = self.heartbeat_counter, "publishing beacon");
            self.beacon.publish(&mut self.heartbeat_counter);
        }
    }

    /// Run the loop until the stop handle fires.
    pub fn run(&mut self) {
        while !self.stop.load(Ordering::SeqCst) {
            self.update();
        }
        info!("worker stopped");
    }

    fn dispatch_envelope(&mut self, origin: Origin, envelope: Envelope) {
        let request = match Request::from_envelope(origin, envelope) {
            Ok(request) => request,
            Err(err) => {
                warn!(origin = %origin, "malformed request: {err}");
                return;
            }
        };

        if request.is_liveness_probe() {
            trace!(origin = %origin, "liveness probe");
            return;
        }

        match self.dispatch.lookup(request.command()) {
            Some(handler) => {
                if self.log_requests {
                    debug!(command = %request.command(), origin = %request.origin(), "request");
                }
                handler(&request, &self.relay_tx);
            }
            None => {
                warn!(
                    command = %request.command(),
                    origin = %request.origin(),
                    "unhandled request"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use bytes::Bytes;

    use super::*;
    use crate::beacon::BeaconSubscriber;
    use crate::client::ServiceClient;

    struct WorkerHarness {
        stop: StopHandle,
        thread: Option<thread::JoinHandle<()>>,
        service_addr: std::net::SocketAddr,
        heartbeat_addr: std::net::SocketAddr,
        dir: PathBuf,
    }

    impl WorkerHarness {
        fn spawn(configure: impl FnOnce(&mut Config), register: impl FnOnce(&mut RequestWorker)) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "fabriq-worker-{}-{}",
                std::process::id(),
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .expect("time should be after epoch")
                    .as_nanos()
            ));
            std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
            let identity_path = dir.join("identity.json");
            Identity::generate()
                .expect("keygen should succeed")
                .save(&identity_path)
                .expect("identity should save");

            let mut config = Config::new(
                "127.0.0.1:0".parse().unwrap(),
                "127.0.0.1:0".parse().unwrap(),
                &identity_path,
            );
            config.heartbeat_interval = Duration::from_millis(100);
            config.poll_timeout = Duration::from_millis(20);
            configure(&mut config);

            let mut worker = RequestWorker::start(config).expect("worker should start");
            register(&mut worker);

            let stop = worker.stop_handle();
            let service_addr = worker.service_addr();
            let heartbeat_addr = worker.heartbeat_addr();
            let thread = thread::spawn(move || worker.run());

            Self {
                stop,
                thread: Some(thread),
                service_addr,
                heartbeat_addr,
                dir,
            }
        }
    }

    impl Drop for WorkerHarness {
        fn drop(&mut self) {
            self.stop.stop();
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn attach_echo(worker: &mut RequestWorker) {
        worker.attach("echo", |request, replies| {
            let mut frames = vec![Bytes::copy_from_slice(request.command().as_bytes())];
            frames.extend_from_slice(request.payload());
            let _ = replies.enqueue(request.reply(frames));
        });
    }

    #[test]
    fn echo_roundtrip() {
        let harness = WorkerHarness::spawn(|_| {}, attach_echo);

        let mut client = ServiceClient::connect(harness.service_addr).unwrap();
        client.request("echo", &[b"alpha", b"beta"]).unwrap();

        let reply = client.recv().unwrap();
        assert_eq!(reply.frame(0).unwrap().as_ref(), b"echo");
        assert_eq!(reply.frame(1).unwrap().as_ref(), b"alpha");
        assert_eq!(reply.frame(2).unwrap().as_ref(), b"beta");
    }

    #[test]
    fn missing_identity_is_fatal() {
        let config = Config::new(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:0".parse().unwrap(),
            "/nonexistent/fabriq/identity.json",
        );
        assert!(RequestWorker::start(config).is_err());
    }

    #[test]
    fn unknown_command_gets_no_reply_and_loop_stays_live() {
        let harness = WorkerHarness::spawn(|_| {}, attach_echo);

        let mut client = ServiceClient::connect(harness.service_addr).unwrap();
        client.set_recv_timeout(Some(Duration::from_millis(300))).unwrap();
        client.request("no-such-command", &[b"x"]).unwrap();
        assert!(client.recv().is_err(), "unknown command must not be answered");

        // The loop survived: a valid request still round-trips.
        client.set_recv_timeout(Some(Duration::from_secs(5))).unwrap();
        client.request("echo", &[b"still-alive"]).unwrap();
        let reply = client.recv().unwrap();
        assert_eq!(reply.frame(1).unwrap().as_ref(), b"still-alive");
    }

    #[test]
    fn handler_may_reply_from_another_thread() {
        let harness = WorkerHarness::spawn(
            |_| {},
            |worker| {
                worker.attach("defer", |request, replies| {
                    let reply = request.reply(vec![Bytes::from_static(b"deferred")]);
                    let replies = replies.clone();
                    thread::spawn(move || {
                        thread::sleep(Duration::from_millis(50));
                        let _ = replies.enqueue(reply);
                    });
                });
            },
        );

        let mut client = ServiceClient::connect(harness.service_addr).unwrap();
        client.request("defer", &[]).unwrap();
        let reply = client.recv().unwrap();
        assert_eq!(reply.frame(0).unwrap().as_ref(), b"deferred");
    }

    #[test]
    fn concurrent_replies_all_arrive_exactly_once() {
        let threads = 8usize;
        let harness = WorkerHarness::spawn(
            |_| {},
            |worker| {
                worker.attach("fanout", move |request, replies| {
                    for i in 0..threads {
                        let reply = request
                            .reply(vec![Bytes::copy_from_slice(format!("part-{i}").as_bytes())]);
                        let replies = replies.clone();
                        thread::spawn(move || {
                            let _ = replies.enqueue(reply);
                        });
                    }
                });
            },
        );

        let mut client = ServiceClient::connect(harness.service_addr).unwrap();
        client.request("fanout", &[]).unwrap();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..threads {
            let reply = client.recv().unwrap();
            let tag = String::from_utf8(reply.frame(0).unwrap().to_vec()).unwrap();
            assert!(seen.insert(tag), "duplicate reply");
        }
        assert_eq!(seen.len(), threads);
    }

    #[test]
    fn beacons_flow_while_idle() {
        let harness = WorkerHarness::spawn(|_| {}, |_| {});

        let mut subscriber = BeaconSubscriber::connect(harness.heartbeat_addr).unwrap();
        subscriber.set_recv_timeout(Some(Duration::from_secs(3))).unwrap();

        let first = subscriber.recv().unwrap();
        let second = subscriber.recv().unwrap();
        let third = subscriber.recv().unwrap();

        assert_eq!(second, first.wrapping_add(1));
        assert_eq!(third, second.wrapping_add(1));
    }

    #[test]
    fn beacons_flow_under_load() {
        let harness = WorkerHarness::spawn(|_| {}, attach_echo);

        let mut subscriber = BeaconSubscriber::connect(harness.heartbeat_addr).unwrap();
        subscriber.set_recv_timeout(Some(Duration::from_secs(3))).unwrap();

        let service_addr = harness.service_addr;
        let running = Arc::new(AtomicBool::new(true));
        let load_flag = Arc::clone(&running);
        let load = thread::spawn(move || {
            let mut client = ServiceClient::connect(service_addr).unwrap();
            while load_flag.load(Ordering::Relaxed) {
                client.request("echo", &[b"load"]).unwrap();
                let _ = client.recv().unwrap();
            }
        });

        let first = subscriber.recv().unwrap();
        let second = subscriber.recv().unwrap();
        assert_eq!(second, first.wrapping_add(1));

        running.store(false, Ordering::Relaxed);
        load.join().unwrap();
    }

    #[test]
    fn liveness_probe_is_not_dispatched() {
        let probed = Arc::new(AtomicUsize::new(0));
        let probed_clone = Arc::clone(&probed);
        let harness = WorkerHarness::spawn(
            |_| {},
            |worker| {
                attach_echo(worker);
                // Even a handler registered under the reserved name must
                // never see the sentinel.
                worker.attach("HEARTBEAT", move |_request, _replies| {
                    probed_clone.fetch_add(1, Ordering::SeqCst);
                });
            },
        );

        let mut client = ServiceClient::connect(harness.service_addr).unwrap();
        client.probe().unwrap();

        // Round-trip an echo as a sync point past the probe.
        client.request("echo", &[b"sync"]).unwrap();
        let _ = client.recv().unwrap();

        assert_eq!(probed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn allowlisted_worker_never_dispatches_for_strangers() {
        let dispatched = Arc::new(AtomicUsize::new(0));
        let dispatched_clone = Arc::clone(&dispatched);
        let harness = WorkerHarness::spawn(
            |config| {
                config.allowlist = vec!["10.0.0.5".parse().unwrap()];
            },
            |worker| {
                worker.attach("echo", move |_request, _replies| {
                    dispatched_clone.fetch_add(1, Ordering::SeqCst);
                });
            },
        );

        // Loopback is off-list; the connection must die before dispatch.
        let result = ServiceClient::connect(harness.service_addr);
        assert!(result.is_err());

        thread::sleep(Duration::from_millis(200));
        assert_eq!(dispatched.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn fire_and_forget_handler_is_valid() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let harness = WorkerHarness::spawn(
            |_| {},
            |worker| {
                attach_echo(worker);
                worker.attach("notify", move |_request, _replies| {
                    seen_clone.fetch_add(1, Ordering::SeqCst);
                });
            },
        );

        let mut client = ServiceClient::connect(harness.service_addr).unwrap();
        client.request("notify", &[b"event"]).unwrap();

        // Sync past the notify.
        client.request("echo", &[b"sync"]).unwrap();
        let _ = client.recv().unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
