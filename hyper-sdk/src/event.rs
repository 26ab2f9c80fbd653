//! Peer events.
//!
//! The SDK reports every peer connection the network establishes, and its end. Events can be
//! consumed with callbacks registered per [`EventKind`], or as a stream from
//! [`Sdk::events`](crate::Sdk::events).

use std::{
    fmt,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::broadcast;
use tracing::trace;

use crate::net::PeerInfo;

/// Capacity of the event stream. Slow receivers lag and lose events.
const EVENT_CAPACITY: usize = 64;

/// Something that happened on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A peer connected.
    PeerAdd(PeerInfo),
    /// The connection to a peer closed.
    PeerRemove(PeerInfo),
}

impl Event {
    /// Returns the kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PeerAdd(_) => EventKind::PeerAdd,
            Self::PeerRemove(_) => EventKind::PeerRemove,
        }
    }

    /// Returns the peer this event is about.
    pub fn peer(&self) -> &PeerInfo {
        match self {
            Self::PeerAdd(info) | Self::PeerRemove(info) => info,
        }
    }
}

/// The kinds of [`Event`]s.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum EventKind {
    /// See [`Event::PeerAdd`].
    PeerAdd,
    /// See [`Event::PeerRemove`].
    PeerRemove,
}

/// Identifies a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

struct Subscriber {
    id: SubscriptionId,
    kind: EventKind,
    callback: Callback,
}

/// Delivers events to callbacks and stream receivers.
pub(crate) struct EventDispatcher {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<Subscriber>>,
    sender: broadcast::Sender<Event>,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field(
                "subscribers",
                &self.subscribers.read().expect("poisoned").len(),
            )
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            next_id: AtomicU64::new(0),
            subscribers: Default::default(),
            sender,
        }
    }
}

impl EventDispatcher {
    pub(crate) fn subscribe(
        &self,
        kind: EventKind,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .expect("poisoned")
            .push(Subscriber {
                id,
                kind,
                callback: Arc::new(callback),
            });
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().expect("poisoned");
        let len = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != len
    }

    pub(crate) fn receiver(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Calls the callbacks registered for the kind of `event`, in registration order, and
    /// sends it to all receivers.
    pub(crate) fn emit(&self, event: Event) {
        let kind = event.kind();
        // callbacks may subscribe or unsubscribe, so they run without the lock
        let callbacks: Vec<Callback> = self
            .subscribers
            .read()
            .expect("poisoned")
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.callback.clone())
            .collect();
        trace!(%kind, callbacks = callbacks.len(), "emit");
        for callback in callbacks {
            callback(&event);
        }
        // no receivers is fine
        self.sender.send(event).ok();
    }
}
