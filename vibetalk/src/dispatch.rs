//! Observer registry for inbound events.
//!
//! Handlers are registered per [`EventName`] and run to completion, one
//! inbound event at a time, in registration order. The session invokes
//! them after the event's state transition has been applied.

use std::collections::HashMap;

use vibetalk_proto::event::{EventName, InboundEvent};

type Handler = Box<dyn FnMut(&InboundEvent) + Send>;

/// Token returned by [`Dispatcher::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Maps event names to their handlers.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<EventName, Vec<(HandlerId, Handler)>>,
    next_id: u64,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("events", &self.handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events named `event`.
    pub fn on<F>(&mut self, event: EventName, handler: F) -> HandlerId
    where
        F: FnMut(&InboundEvent) + Send + 'static,
    {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.handlers
            .entry(event)
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Remove a handler. Returns `true` if it was registered.
    pub fn off(&mut self, id: HandlerId) -> bool {
        let mut removed = false;
        for handlers in self.handlers.values_mut() {
            let before = handlers.len();
            handlers.retain(|(hid, _)| *hid != id);
            removed |= handlers.len() != before;
        }
        removed
    }

    /// Run every handler registered for this event's name.
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch(&mut self, event: &InboundEvent) -> usize {
        let Some(handlers) = self.handlers.get_mut(&event.name()) else {
            return 0;
        };
        for (_, handler) in handlers.iter_mut() {
            handler(event);
        }
        handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use vibetalk_proto::message::PeerId;

    use super::*;

    fn cleared(peer: &str) -> InboundEvent {
        InboundEvent::UnreadCleared {
            peer_id: PeerId::new(peer),
        }
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        for tag in ["first", "second"] {
            let log = Arc::clone(&log);
            dispatcher.on(EventName::UnreadCleared, move |_| log.lock().push(tag));
        }
        assert_eq!(dispatcher.dispatch(&cleared("x")), 2);
        assert_eq!(*log.lock(), ["first", "second"]);
    }

    #[test]
    fn only_matching_event_names_fire() {
        let hits = Arc::new(Mutex::new(0));
        let mut dispatcher = Dispatcher::new();
        let counter = Arc::clone(&hits);
        dispatcher.on(EventName::PresenceSnapshot, move |_| *counter.lock() += 1);
        assert_eq!(dispatcher.dispatch(&cleared("x")), 0);
        assert_eq!(*hits.lock(), 0);
    }

    #[test]
    fn off_unregisters() {
        let mut dispatcher = Dispatcher::new();
        let id = dispatcher.on(EventName::UnreadCleared, |_| {});
        assert!(dispatcher.off(id));
        assert!(!dispatcher.off(id));
        assert_eq!(dispatcher.dispatch(&cleared("x")), 0);
    }
}
