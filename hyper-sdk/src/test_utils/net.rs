use std::{
    collections::BTreeSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use hyper_sdk_base::{Key, TopicId};
use n0_future::boxed::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::net::{
    Connection, DiscoverySession, JoinOptions, Network, NetworkError, PeerConnection, PeerInfo,
};

/// A simulated peer connection.
#[derive(Debug)]
pub struct MemConnection {
    remote: Key,
    closed: CancellationToken,
}

impl MemConnection {
    fn new(remote: Key) -> Self {
        Self {
            remote,
            closed: CancellationToken::new(),
        }
    }

    /// Closes the connection.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl PeerConnection for MemConnection {
    fn remote_public_key(&self) -> Key {
        self.remote
    }

    fn closed(&self) -> BoxFuture<()> {
        let token = self.closed.clone();
        Box::pin(async move { token.cancelled().await })
    }
}

/// A simulated discovery session.
///
/// Flushes once a peer on its topic connects.
#[derive(Debug)]
pub struct MemSession {
    topic: TopicId,
    flushed: CancellationToken,
    destroyed: AtomicUsize,
}

impl MemSession {
    fn new(topic: TopicId) -> Self {
        Self {
            topic,
            flushed: CancellationToken::new(),
            destroyed: AtomicUsize::new(0),
        }
    }

    /// Completes the first flush.
    pub fn flush(&self) {
        self.flushed.cancel();
    }

    /// Whether the first flush completed.
    pub fn is_flushed(&self) -> bool {
        self.flushed.is_cancelled()
    }

    /// How often [`DiscoverySession::destroy`] was called.
    pub fn destroy_count(&self) -> usize {
        self.destroyed.load(Ordering::Relaxed)
    }
}

impl DiscoverySession for MemSession {
    fn topic(&self) -> TopicId {
        self.topic
    }

    fn flushed(&self) -> BoxFuture<Result<(), NetworkError>> {
        let token = self.flushed.clone();
        Box::pin(async move {
            token.cancelled().await;
            Ok(())
        })
    }

    fn destroy(&self) -> BoxFuture<Result<(), NetworkError>> {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        Box::pin(async { Ok(()) })
    }
}

type Incoming = (Connection, PeerInfo);

/// A simulated [`Network`].
#[derive(Debug, Clone)]
pub struct MemNetwork {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    public_key: Key,
    state: Mutex<State>,
    incoming_tx: mpsc::UnboundedSender<Incoming>,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Incoming>>,
    listening: AtomicBool,
    destroyed: CancellationToken,
}

#[derive(Debug, Default)]
struct State {
    joins: Vec<(TopicId, JoinOptions)>,
    left: Vec<TopicId>,
    peers: BTreeSet<Key>,
    sessions: Vec<Arc<MemSession>>,
    connections: Vec<(Arc<MemConnection>, PeerInfo)>,
}

impl MemNetwork {
    /// Creates a network with our public key.
    pub fn new(public_key: Key) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                public_key,
                state: Default::default(),
                incoming_tx,
                incoming_rx: tokio::sync::Mutex::new(incoming_rx),
                listening: AtomicBool::new(false),
                destroyed: CancellationToken::new(),
            }),
        }
    }

    /// Simulates a peer found on `topics` connecting.
    ///
    /// Flushes every session on one of the topics.
    pub fn connect(&self, peer: Key, topics: Vec<TopicId>) -> Arc<MemConnection> {
        let connection = Arc::new(MemConnection::new(peer));
        let info = PeerInfo {
            public_key: peer,
            client: !topics.is_empty(),
            topics,
        };
        let mut state = self.inner.state.lock().expect("poisoned");
        state.connections.push((connection.clone(), info.clone()));
        self.inner
            .incoming_tx
            .send((connection.clone(), info.clone()))
            .ok();
        for session in &state.sessions {
            if info.topics.contains(&session.topic) {
                session.flush();
            }
        }
        connection
    }

    /// The topics joined so far, in order, including repeated joins.
    pub fn joined_topics(&self) -> Vec<TopicId> {
        let state = self.inner.state.lock().expect("poisoned");
        state.joins.iter().map(|(topic, _)| *topic).collect()
    }

    /// The options of the last join of `topic`.
    pub fn join_options(&self, topic: TopicId) -> Option<JoinOptions> {
        let state = self.inner.state.lock().expect("poisoned");
        state
            .joins
            .iter()
            .rev()
            .find(|(t, _)| *t == topic)
            .map(|(_, options)| options.clone())
    }

    /// The topics left so far, in order.
    pub fn left_topics(&self) -> Vec<TopicId> {
        self.inner.state.lock().expect("poisoned").left.clone()
    }

    /// The peers joined with [`Network::join_peer`].
    pub fn joined_peers(&self) -> BTreeSet<Key> {
        self.inner.state.lock().expect("poisoned").peers.clone()
    }

    /// The sessions created for `topic`.
    pub fn sessions(&self, topic: TopicId) -> Vec<Arc<MemSession>> {
        let state = self.inner.state.lock().expect("poisoned");
        state
            .sessions
            .iter()
            .filter(|session| session.topic == topic)
            .cloned()
            .collect()
    }

    /// Whether [`Network::listen`] was called.
    pub fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::Relaxed)
    }

    /// Whether [`Network::destroy`] was called.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.is_cancelled()
    }
}

impl Network for MemNetwork {
    fn public_key(&self) -> Key {
        self.inner.public_key
    }

    fn join(
        &self,
        topic: TopicId,
        options: JoinOptions,
    ) -> Result<Arc<dyn DiscoverySession>, NetworkError> {
        if self.is_destroyed() {
            return Err(NetworkError::closed());
        }
        let mut state = self.inner.state.lock().expect("poisoned");
        let session = Arc::new(MemSession::new(topic));
        let known_peer = state
            .connections
            .iter()
            .any(|(conn, info)| !conn.is_closed() && info.topics.contains(&topic));
        if known_peer {
            session.flush();
        }
        state.joins.push((topic, options));
        state.sessions.push(session.clone());
        Ok(session)
    }

    fn leave(&self, topic: TopicId) -> BoxFuture<Result<(), NetworkError>> {
        let res = if self.is_destroyed() {
            Err(NetworkError::closed())
        } else {
            self.inner.state.lock().expect("poisoned").left.push(topic);
            Ok(())
        };
        Box::pin(async move { res })
    }

    fn join_peer(&self, peer: Key) {
        self.inner.state.lock().expect("poisoned").peers.insert(peer);
    }

    fn leave_peer(&self, peer: Key) {
        self.inner.state.lock().expect("poisoned").peers.remove(&peer);
    }

    fn listen(&self) -> BoxFuture<Result<(), NetworkError>> {
        self.inner.listening.store(true, Ordering::Relaxed);
        Box::pin(async { Ok(()) })
    }

    fn accept(&self) -> BoxFuture<Option<(Connection, PeerInfo)>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut incoming = inner.incoming_rx.lock().await;
            tokio::select! {
                _ = inner.destroyed.cancelled() => None,
                next = incoming.recv() => next,
            }
        })
    }

    fn connections(&self) -> Vec<Connection> {
        let state = self.inner.state.lock().expect("poisoned");
        state
            .connections
            .iter()
            .filter(|(conn, _)| !conn.is_closed())
            .map(|(conn, _)| conn.clone() as Connection)
            .collect()
    }

    fn peers(&self) -> Vec<PeerInfo> {
        let state = self.inner.state.lock().expect("poisoned");
        state
            .connections
            .iter()
            .filter(|(conn, _)| !conn.is_closed())
            .map(|(_, info)| info.clone())
            .collect()
    }

    fn destroy(&self) -> BoxFuture<Result<(), NetworkError>> {
        self.inner.destroyed.cancel();
        for (conn, _) in &self.inner.state.lock().expect("poisoned").connections {
            conn.close();
        }
        Box::pin(async { Ok(()) })
    }
}
