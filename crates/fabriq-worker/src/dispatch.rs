use std::collections::HashMap;

use crate::relay::ReplyQueue;
use crate::request::Request;

/// A registered command handler.
///
/// Handlers receive the request and the reply-enqueue capability; they
/// return nothing to the loop. Any reply is produced by calling the
/// capability zero or more times — zero replies is a valid outcome
/// (fire-and-forget commands), and the capability may be cloned onto
/// another thread to answer after asynchronous work completes.
pub type CommandHandler = Box<dyn Fn(&Request, &ReplyQueue) + Send>;

/// Mapping from command name to handler.
///
/// Populated before the loop starts, read-only thereafter; registration
/// goes through `&mut`, so the borrow checker enforces the caller
/// contract that no registration races active dispatch.
#[derive(Default)]
pub struct DispatchTable {
    handlers: HashMap<String, CommandHandler>,
}

impl DispatchTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the handler for a command name. The last
    /// registration for a given name wins.
    pub fn register(&mut self, command: impl Into<String>, handler: CommandHandler) {
        self.handlers.insert(command.into(), handler);
    }

    /// Look up the handler for a command name.
    pub fn lookup(&self, command: &str) -> Option<&CommandHandler> {
        self.handlers.get(command)
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable")
            .field("commands", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn register_and_lookup() {
        let mut table = DispatchTable::new();
        assert!(table.is_empty());

        table.register("fetch", Box::new(|_req, _reply| {}));

        assert_eq!(table.len(), 1);
        assert!(table.lookup("fetch").is_some());
        assert!(table.lookup("missing").is_none());
    }

    #[test]
    fn last_registration_wins() {
        let counter = Arc::new(AtomicUsize::new(0));

        let mut table = DispatchTable::new();
        table.register("cmd", Box::new(|_req, _reply| {}));

        let counter_clone = Arc::clone(&counter);
        table.register(
            "cmd",
            Box::new(move |_req, _reply| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(table.len(), 1);

        let (queue, _rx) = crate::relay::relay_channel();
        let request = crate::request::test_request("cmd");
        table.lookup("cmd").unwrap()(&request, &queue);

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
