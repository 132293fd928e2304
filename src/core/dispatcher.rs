//! Event delivery to session consumers
//!
//! Every notification is queued and delivered from one dedicated thread.
//! Consumer code therefore never runs on the hardware notification thread or
//! on a timer thread, and may call back into the session (including `stop()`).

use super::error::LineErrorKind;
use super::pins::ControlPins;
use super::session::SessionState;
use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::{error, trace};

/// Notification delivered to session consumers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialEvent {
    /// Session state changed
    IoChanged {
        /// New state
        state: SessionState,
    },
    /// Control lines changed or were re-read; `None` when the line is not open
    IoControlChanged {
        /// Fresh snapshot
        pins: Option<ControlPins>,
    },
    /// The line reported an error
    IoError {
        /// Classified cause
        kind: LineErrorKind,
        /// Human-readable detail
        message: String,
    },
    /// New bytes are waiting for `Session::receive`
    DataReceived {
        /// Bytes buffered at the time of the notification
        buffered: usize,
    },
    /// A `send` completed
    DataSent {
        /// Bytes written
        data: Bytes,
    },
}

/// Consumer callback
pub type EventHandler = Arc<dyn Fn(&SerialEvent) + Send + Sync>;

/// Handle returned by [`EventDispatcher::add_handler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
struct Listeners {
    next_id: u64,
    handlers: Vec<(HandlerId, EventHandler)>,
    subscribers: Vec<Sender<SerialEvent>>,
}

/// Item on the delivery queue.
///
/// Subscriptions travel on the same queue as events, so a subscriber sees
/// exactly the events queued after it.
pub(crate) enum Dispatch {
    Event(SerialEvent),
    Subscribe(Sender<SerialEvent>),
}

/// Queue plus delivery thread
pub struct EventDispatcher {
    tx: Sender<Dispatch>,
    listeners: Arc<RwLock<Listeners>>,
}

impl EventDispatcher {
    /// Spawn the delivery thread
    pub fn spawn(name: String) -> io::Result<Self> {
        let (tx, rx) = unbounded::<Dispatch>();
        let listeners = Arc::new(RwLock::new(Listeners::default()));

        let thread_listeners = listeners.clone();
        thread::Builder::new()
            .name(name)
            .spawn(move || deliver(&rx, &thread_listeners))?;

        Ok(Self { tx, listeners })
    }

    /// Queue an event; never blocks
    pub fn emit(&self, event: SerialEvent) {
        if self.tx.send(Dispatch::Event(event)).is_err() {
            trace!("Event dispatcher gone, dropping event");
        }
    }

    /// Sender for producers living outside the session (notification sinks)
    pub(crate) fn sender(&self) -> Sender<Dispatch> {
        self.tx.clone()
    }

    /// Register a callback
    pub fn add_handler(&self, handler: EventHandler) -> HandlerId {
        let mut listeners = self.listeners.write();
        let id = HandlerId(listeners.next_id);
        listeners.next_id += 1;
        listeners.handlers.push((id, handler));
        id
    }

    /// Unregister a callback; returns whether it was registered
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.handlers.len();
        listeners.handlers.retain(|(handler_id, _)| *handler_id != id);
        listeners.handlers.len() != before
    }

    /// Receive every event from now on through a channel
    pub fn subscribe(&self) -> Receiver<SerialEvent> {
        let (tx, rx) = unbounded();
        if self.tx.send(Dispatch::Subscribe(tx)).is_err() {
            trace!("Event dispatcher gone, subscription stays empty");
        }
        rx
    }
}

fn deliver(rx: &Receiver<Dispatch>, listeners: &RwLock<Listeners>) {
    for item in rx {
        let event = match item {
            Dispatch::Event(event) => event,
            Dispatch::Subscribe(subscriber) => {
                listeners.write().subscribers.push(subscriber);
                continue;
            }
        };

        // Snapshot so handlers can register/unregister without deadlocking.
        let handlers: Vec<EventHandler> = listeners
            .read()
            .handlers
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                error!(?event, "Event handler panicked");
            }
        }

        listeners
            .write()
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
    trace!("Event dispatcher stopped");
}
