//! Joining and leaving discovery topics.
//!
//! [`Discovery`] sits between callers and the [`Network`]: it turns names into topics,
//! fills in default join options and attaches discovery sessions to data handles.
//!
//! # Auto-join
//!
//! When a handle is opened, its discovery key is joined as a topic and the resulting session
//! is stored in the handle's [`DiscoverySlot`]. The session is destroyed exactly once, when
//! the handle closes. If the handle is read-only and still empty, opening waits for the first
//! flush of the session, so that a caller asking for remote data gets a handle that had a
//! chance to find a peer.

use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use hyper_sdk_base::{Key, TopicId};
use n0_future::{task::JoinSet, time};
use tracing::{Instrument, debug, error_span, trace, warn};

use crate::{
    metrics::Metrics,
    net::{DiscoverySession, JoinOptions, Network, NetworkError},
    sdk::{FlushTimeoutSnafu, SdkError},
    storage::Handle,
};

/// How long [`Discovery::shutdown`] waits for each pending teardown.
const TEARDOWN_GRACE: Duration = Duration::from_millis(500);

/// A topic, or a name to derive the topic from.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::From)]
pub enum TopicOrName {
    /// A topic, used as is.
    Topic(TopicId),
    /// A name, derived into a topic with [`TopicId::from_name`].
    Name(String),
}

impl From<&str> for TopicOrName {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<Key> for TopicOrName {
    fn from(key: Key) -> Self {
        Self::Topic(key.into())
    }
}

impl TopicOrName {
    /// Returns the topic.
    pub fn to_topic(&self) -> TopicId {
        match self {
            Self::Topic(topic) => *topic,
            Self::Name(name) => TopicId::from_name(name),
        }
    }
}

/// Holds the discovery session of a handle.
///
/// At most one session is attached at a time.
#[derive(Default)]
pub struct DiscoverySlot {
    session: Mutex<Option<Arc<dyn DiscoverySession>>>,
}

impl fmt::Debug for DiscoverySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topic = self.get().map(|session| session.topic());
        f.debug_struct("DiscoverySlot")
            .field("topic", &topic)
            .finish()
    }
}

impl DiscoverySlot {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the attached session.
    pub fn get(&self) -> Option<Arc<dyn DiscoverySession>> {
        self.session.lock().expect("poisoned").clone()
    }

    /// Whether a session is attached.
    pub fn is_attached(&self) -> bool {
        self.session.lock().expect("poisoned").is_some()
    }

    /// Attaches the session created by `create`, unless one is attached already.
    ///
    /// Returns `None` if a session was attached already, in which case `create` is not
    /// called.
    pub(crate) fn try_attach_with<E>(
        &self,
        create: impl FnOnce() -> Result<Arc<dyn DiscoverySession>, E>,
    ) -> Result<Option<Arc<dyn DiscoverySession>>, E> {
        let mut slot = self.session.lock().expect("poisoned");
        if slot.is_some() {
            return Ok(None);
        }
        let session = create()?;
        *slot = Some(session.clone());
        Ok(Some(session))
    }

    /// Detaches the session.
    pub(crate) fn take(&self) -> Option<Arc<dyn DiscoverySession>> {
        self.session.lock().expect("poisoned").take()
    }
}

/// Joins and leaves topics on a [`Network`].
#[derive(Debug, Clone)]
pub struct Discovery {
    network: Arc<dyn Network>,
    defaults: JoinOptions,
    metrics: Arc<Metrics>,
    teardowns: Arc<Mutex<JoinSet<()>>>,
}

impl Discovery {
    /// Creates a new orchestrator for `network`.
    pub fn new(network: Arc<dyn Network>) -> Self {
        Self {
            network,
            defaults: JoinOptions::default(),
            metrics: Default::default(),
            teardowns: Default::default(),
        }
    }

    /// Sets the join options used when a call passes no overrides.
    pub fn with_defaults(mut self, defaults: JoinOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub(crate) fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Joins a topic.
    ///
    /// A name is joined as the topic derived from it.
    pub fn join(
        &self,
        target: impl Into<TopicOrName>,
        overrides: Option<&JoinOptions>,
    ) -> Result<Arc<dyn DiscoverySession>, NetworkError> {
        match target.into() {
            TopicOrName::Name(name) => self.join(TopicId::from_name(&name), overrides),
            TopicOrName::Topic(topic) => {
                let options = match overrides {
                    Some(overrides) => self.defaults.merge(overrides),
                    None => self.defaults.clone(),
                };
                debug!(topic = %topic.fmt_short(), ?options, "join");
                let session = self.network.join(topic, options.resolved())?;
                self.metrics.topics_joined.inc();
                Ok(session)
            }
        }
    }

    /// Leaves a topic.
    ///
    /// A name leaves the topic derived from it.
    pub async fn leave(&self, target: impl Into<TopicOrName>) -> Result<(), NetworkError> {
        let topic = target.into().to_topic();
        debug!(topic = %topic.fmt_short(), "leave");
        self.network.leave(topic).await?;
        self.metrics.topics_left.inc();
        Ok(())
    }

    /// Keeps a connection to a peer.
    pub fn join_peer(&self, peer: Key) {
        debug!(peer = %peer.fmt_short(), "join peer");
        self.network.join_peer(peer)
    }

    /// Stops keeping a connection to a peer.
    pub fn leave_peer(&self, peer: Key) {
        debug!(peer = %peer.fmt_short(), "leave peer");
        self.network.leave_peer(peer)
    }

    /// Joins the discovery key of a freshly opened handle.
    ///
    /// Does nothing if the handle has a session already. Waits for the first flush if the
    /// handle is read-only and empty, for at most `flush_timeout` if set.
    pub(crate) async fn auto_join(
        &self,
        handle: &Arc<dyn Handle>,
        overrides: Option<&JoinOptions>,
        flush_timeout: Option<Duration>,
    ) -> Result<(), SdkError> {
        let topic = TopicId::from(handle.discovery_key());
        let Some(session) = handle
            .discovery()
            .try_attach_with(|| self.join(topic, overrides))?
        else {
            trace!(topic = %topic.fmt_short(), "discovery session already attached");
            return Ok(());
        };
        self.metrics.auto_joins.inc();
        self.spawn_teardown(handle.clone(), topic);

        if !handle.writable() && handle.is_empty() {
            self.metrics.flush_waits.inc();
            debug!(topic = %topic.fmt_short(), "waiting for first flush");
            let flushed = session.flushed();
            match flush_timeout {
                Some(timeout) => time::timeout(timeout, flushed)
                    .await
                    .map_err(|_| FlushTimeoutSnafu { topic }.build())??,
                None => flushed.await?,
            }
            debug!(topic = %topic.fmt_short(), "flushed");
        }
        Ok(())
    }

    /// Destroys the session of `handle` once it closes.
    fn spawn_teardown(&self, handle: Arc<dyn Handle>, topic: TopicId) {
        let closed = handle.closed();
        let fut = async move {
            closed.await;
            if let Some(session) = handle.discovery().take() {
                debug!("handle closed, destroying discovery session");
                if let Err(err) = session.destroy().await {
                    warn!("failed to destroy discovery session: {err:#}");
                }
            }
        };
        let mut teardowns = self.teardowns.lock().expect("poisoned");
        // reap finished teardowns
        while teardowns.try_join_next().is_some() {}
        teardowns.spawn(fut.instrument(error_span!("teardown", topic = %topic.fmt_short())));
    }

    /// Lets teardowns of closed handles finish, then aborts the rest.
    pub(crate) async fn shutdown(&self) {
        let mut teardowns = std::mem::take(&mut *self.teardowns.lock().expect("poisoned"));
        while let Ok(Some(_)) = time::timeout(TEARDOWN_GRACE, teardowns.join_next()).await {}
        if !teardowns.is_empty() {
            debug!(pending = teardowns.len(), "aborting discovery teardowns");
        }
        teardowns.shutdown().await;
    }
}
