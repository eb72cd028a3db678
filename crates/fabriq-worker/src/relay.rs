use crossbeam_channel::{Receiver, Sender};

use crate::request::Reply;

/// The relay is closed: the worker is gone and the reply was dropped.
///
/// Callers should treat this as "no error to surface" — the original
/// requester simply never receives the reply, exactly as during any
/// other shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("relay closed; reply dropped")]
pub struct RelayClosed;

/// Thread-safe hand-off of replies into the loop thread.
///
/// The service endpoint must only ever be written by the loop thread;
/// this queue is the one synchronization point that lets handler code
/// answer from any other thread. Cloning is cheap and every clone feeds
/// the same loop. Enqueueing never blocks on network conditions.
#[derive(Debug, Clone)]
pub struct ReplyQueue {
    tx: Sender<Reply>,
}

impl ReplyQueue {
    /// Hand a reply to the loop thread for delivery.
    ///
    /// Replies from a single sender are forwarded in enqueue order;
    /// interleaving across senders is unspecified.
    pub fn enqueue(&self, reply: Reply) -> Result<(), RelayClosed> {
        self.tx.send(reply).map_err(|_| RelayClosed)
    }
}

/// Create the relay pair: the cloneable enqueue capability and the
/// receiving side owned by the loop.
pub(crate) fn relay_channel() -> (ReplyQueue, Receiver<Reply>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (ReplyQueue { tx }, rx)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use bytes::Bytes;

    use super::*;
    use crate::request::{ConnectionId, Origin, Reply};

    fn reply(tag: &str) -> Reply {
        Reply::new(
            Origin::new(ConnectionId::new(1), "127.0.0.1:4000".parse().unwrap()),
            vec![Bytes::copy_from_slice(tag.as_bytes())],
        )
    }

    #[test]
    fn enqueue_delivers_in_order() {
        let (queue, rx) = relay_channel();

        queue.enqueue(reply("a")).unwrap();
        queue.enqueue(reply("b")).unwrap();

        assert_eq!(rx.recv().unwrap().envelope().frame(0).unwrap().as_ref(), b"a");
        assert_eq!(rx.recv().unwrap().envelope().frame(0).unwrap().as_ref(), b"b");
    }

    #[test]
    fn enqueue_fails_after_receiver_drops() {
        let (queue, rx) = relay_channel();
        drop(rx);

        assert_eq!(queue.enqueue(reply("x")), Err(RelayClosed));
    }

    #[test]
    fn concurrent_senders_lose_nothing() {
        let (queue, rx) = relay_channel();
        let threads = 8;
        let per_thread = 50;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..per_thread {
                        queue.enqueue(reply(&format!("{t}:{i}"))).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        for _ in 0..threads * per_thread {
            let reply = rx.recv().unwrap();
            let tag = String::from_utf8(reply.envelope().frame(0).unwrap().to_vec()).unwrap();
            assert!(seen.insert(tag), "duplicate reply");
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn per_sender_order_is_preserved() {
        let (queue, rx) = relay_channel();
        let writer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    queue.enqueue(reply(&format!("{i}"))).unwrap();
                }
            })
        };
        writer.join().unwrap();

        for i in 0..100 {
            let got = rx.recv().unwrap();
            let tag = String::from_utf8(got.envelope().frame(0).unwrap().to_vec()).unwrap();
            assert_eq!(tag, format!("{i}"));
        }
    }
}
