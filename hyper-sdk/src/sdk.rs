//! The [`Sdk`] facade.
//!
//! ```no_run
//! # use hyper_sdk::{Sdk, SdkConfig, GetOptions};
//! # async fn wrapper(storage: impl hyper_sdk::Storage, network: impl hyper_sdk::Network) -> n0_snafu::Result {
//! let sdk = Sdk::builder(SdkConfig::default())
//!     .storage(storage)
//!     .network(network)
//!     .spawn()
//!     .await?;
//! sdk.ready().await?;
//! let handle = sdk.get("hyper://example.com/", GetOptions::default()).await?;
//! println!("{} has {} entries", hyper_sdk::to_url(&handle.key()), handle.len());
//! sdk.close().await?;
//! # Ok(())
//! # }
//! ```

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use hyper_sdk_base::{Key, TopicId};
use n0_future::{
    task::{self, AbortOnDropHandle, JoinSet},
    time,
};
use nested_enum_utils::common_fields;
use snafu::{Backtrace, Snafu};
use tokio::sync::{OnceCell, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, error_span, info, info_span, trace, warn};

use crate::{
    config::{ConfigError, SdkConfig},
    discovery::{Discovery, TopicOrName},
    dns::{DnsLinkResolver, DnsOptions, DnsTransport, HickoryTransport},
    event::{Event, EventDispatcher, EventKind, SubscriptionId},
    metrics::Metrics,
    net::{Connection, DiscoverySession, JoinOptions, Network, NetworkError, PeerInfo},
    resolve::{Identifier, IdentifierResolver, ResolveError, ResolvedTarget},
    storage::{CoreOptions, CoreRequest, Handle, KeyPair, Storage, StorageError, StorageProvider},
};

/// How long the connection bridge waits for each pending removal on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// SDK errors
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum SdkError {
    #[snafu(display("missing parameter: {name}"))]
    InvalidParameter { name: &'static str },
    #[snafu(display("sdk is not ready, call `ready` first"))]
    NotReady {},
    #[snafu(display("sdk is closed"))]
    Closed {},
    #[snafu(display("no peer found for topic {} in time", topic.fmt_short()))]
    FlushTimeout { topic: TopicId },
    #[snafu(transparent)]
    Resolve { source: ResolveError },
    #[snafu(transparent)]
    Storage { source: StorageError },
    #[snafu(transparent)]
    Network { source: NetworkError },
    #[snafu(transparent)]
    Config { source: ConfigError },
}

/// The lifecycle of an [`Sdk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum State {
    /// Created, [`Sdk::ready`] was not called yet.
    Uninitialized,
    /// Ready to use.
    Ready,
    /// Closed. This is final.
    Closed,
}

/// Per-call options for [`Sdk::get`].
///
/// Every option set here wins over the [`SdkConfig`].
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Options for opening the data structure.
    pub core: Option<CoreOptions>,
    /// Options for joining its discovery key.
    pub join: Option<JoinOptions>,
    /// Options for DNS-link lookups.
    pub dns: Option<DnsOptions>,
    /// Whether to join the discovery key of the handle.
    pub auto_join: Option<bool>,
    /// How long to wait for peers of a remote handle.
    pub flush_timeout: Option<Duration>,
}

impl GetOptions {
    /// Sets the core options.
    pub fn core(mut self, core: CoreOptions) -> Self {
        self.core = Some(core);
        self
    }

    /// Sets the join options.
    pub fn join(mut self, join: JoinOptions) -> Self {
        self.join = Some(join);
        self
    }

    /// Sets the DNS options.
    pub fn dns(mut self, dns: DnsOptions) -> Self {
        self.dns = Some(dns);
        self
    }

    /// Enables or disables auto-join.
    pub fn auto_join(mut self, auto_join: bool) -> Self {
        self.auto_join = Some(auto_join);
        self
    }

    /// Sets the flush timeout.
    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = Some(timeout);
        self
    }
}

/// Resolves identifiers to data handles and finds peers for them.
///
/// Cloning is cheap, all clones share the same state.
#[derive(Debug, Clone)]
pub struct Sdk {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: SdkConfig,
    storage: Arc<dyn Storage>,
    network: Arc<dyn Network>,
    resolver: IdentifierResolver,
    discovery: Discovery,
    events: Arc<EventDispatcher>,
    metrics: Arc<Metrics>,
    state: Mutex<State>,
    ready: OnceCell<()>,
    cancel_token: CancellationToken,
    // `Sdk` needs to be `Clone + Send`, and we need to `task.await` in its `close()` impl.
    task: tokio::sync::Mutex<Option<AbortOnDropHandle<()>>>,
}

/// Builder for [`Sdk`].
#[derive(Debug)]
pub struct Builder {
    config: SdkConfig,
    storage: Option<Arc<dyn Storage>>,
    storage_provider: Option<Arc<dyn StorageProvider>>,
    network: Option<Arc<dyn Network>>,
    dns: Option<Arc<dyn DnsTransport>>,
}

impl Builder {
    /// Creates a builder from a config.
    pub fn new(config: SdkConfig) -> Self {
        Self {
            config,
            storage: None,
            storage_provider: None,
            network: None,
            dns: None,
        }
    }

    /// Uses an explicit storage backend.
    ///
    /// Takes precedence over [`Self::storage_provider`] and the `storage` config.
    pub fn storage(mut self, storage: impl Storage) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// Opens the storage configured in [`SdkConfig::storage`] with `provider`.
    pub fn storage_provider(mut self, provider: impl StorageProvider) -> Self {
        self.storage_provider = Some(Arc::new(provider));
        self
    }

    /// Sets the network.
    pub fn network(mut self, network: impl Network) -> Self {
        self.network = Some(Arc::new(network));
        self
    }

    /// Sets the DNS transport used for DNS-link lookups.
    ///
    /// Defaults to a [`HickoryTransport`].
    pub fn dns_transport(mut self, dns: impl DnsTransport) -> Self {
        self.dns = Some(Arc::new(dns));
        self
    }

    /// Enables or disables auto-join.
    pub fn auto_join(mut self, auto_join: bool) -> Self {
        self.config.auto_join = auto_join;
        self
    }

    /// Enables or disables replication over peer connections.
    pub fn do_replicate(mut self, do_replicate: bool) -> Self {
        self.config.do_replicate = do_replicate;
        self
    }

    /// Sets the DNS-link prefix.
    pub fn dns_link_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.dns_link_prefix = prefix.into();
        self
    }

    /// Creates the [`Sdk`] and starts bridging peer connections to the storage.
    ///
    /// Fails with [`SdkError::InvalidParameter`] if no network or no storage was given.
    pub async fn spawn(self) -> Result<Sdk, SdkError> {
        let network = self
            .network
            .ok_or_else(|| InvalidParameterSnafu { name: "network" }.build())?;
        let storage = match (self.storage, self.storage_provider) {
            (Some(storage), _) => storage,
            (None, Some(provider)) => {
                let location = self.config.storage.location()?;
                debug!(?location, "opening storage");
                provider.open(location).await?
            }
            (None, None) => return Err(InvalidParameterSnafu { name: "storage" }.build()),
        };
        let config = self.config;
        let metrics = Arc::new(Metrics::default());
        let dns = self
            .dns
            .unwrap_or_else(|| Arc::new(HickoryTransport::new()));
        let dnslink = DnsLinkResolver::new(dns)
            .with_prefix(config.dns_link_prefix.clone())
            .with_defaults(config.dns_opts.clone())
            .with_metrics(metrics.clone());
        let resolver = IdentifierResolver::new(dnslink).with_metrics(metrics.clone());
        let discovery = Discovery::new(network.clone())
            .with_defaults(config.join_opts.clone())
            .with_metrics(metrics.clone());
        let events = Arc::new(EventDispatcher::default());

        let cancel = CancellationToken::new();
        let me = network.public_key();
        let bridge = Bridge {
            network: network.clone(),
            storage: storage.clone(),
            events: events.clone(),
            metrics: metrics.clone(),
            do_replicate: config.do_replicate,
        };
        let task = task::spawn(
            bridge
                .run(cancel.clone())
                .instrument(error_span!("sdk", me = %me.fmt_short())),
        );

        Ok(Sdk {
            inner: Arc::new(Inner {
                config,
                storage,
                network,
                resolver,
                discovery,
                events,
                metrics,
                state: Mutex::new(State::Uninitialized),
                ready: OnceCell::new(),
                cancel_token: cancel,
                task: tokio::sync::Mutex::new(Some(AbortOnDropHandle::new(task))),
            }),
        })
    }
}

/// Creates an [`Sdk`] whose storage is opened by `provider`, and waits until it is ready.
pub async fn create(
    config: SdkConfig,
    provider: impl StorageProvider,
    network: impl Network,
) -> Result<Sdk, SdkError> {
    let sdk = Builder::new(config)
        .storage_provider(provider)
        .network(network)
        .spawn()
        .await?;
    sdk.ready().await?;
    Ok(sdk)
}

impl Sdk {
    /// Returns a new builder for an [`Sdk`].
    pub fn builder(config: SdkConfig) -> Builder {
        Builder::new(config)
    }

    /// Initializes the storage and starts listening for connections.
    ///
    /// Calling this more than once is fine.
    pub async fn ready(&self) -> Result<(), SdkError> {
        if self.state() == State::Closed {
            return Err(ClosedSnafu.build());
        }
        let inner = &self.inner;
        inner
            .ready
            .get_or_try_init(|| async {
                inner.storage.ready().await?;
                inner.network.listen().await?;
                Ok::<_, SdkError>(())
            })
            .await?;
        let mut state = inner.state.lock().expect("poisoned");
        match *state {
            State::Closed => Err(ClosedSnafu.build()),
            State::Ready => Ok(()),
            State::Uninitialized => {
                *state = State::Ready;
                info!(me = %self.id().fmt_short(), "ready");
                Ok(())
            }
        }
    }

    /// Closes the storage and the network.
    ///
    /// Closing a closed [`Sdk`] does nothing.
    pub async fn close(&self) -> Result<(), SdkError> {
        {
            let mut state = self.inner.state.lock().expect("poisoned");
            if *state == State::Closed {
                return Ok(());
            }
            *state = State::Closed;
        }
        debug!("closing");

        // Destroying the network closes the connections, the bridge reports their removal.
        let (storage, network) = tokio::join!(
            self.inner.storage.close(),
            self.inner.network.destroy(),
        );

        // Stop bridging connections.
        self.inner.cancel_token.cancel();
        if let Some(task) = self.inner.task.lock().await.take() {
            if let Err(err) = task.await {
                warn!("connection bridge failed: {err:?}");
            }
        }
        self.inner.discovery.shutdown().await;
        storage?;
        network?;
        info!("closed");
        Ok(())
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> State {
        *self.inner.state.lock().expect("poisoned")
    }

    /// Returns `true` once [`Self::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }

    fn ensure_ready(&self) -> Result<(), SdkError> {
        match self.state() {
            State::Ready => Ok(()),
            State::Uninitialized => Err(NotReadySnafu.build()),
            State::Closed => Err(ClosedSnafu.build()),
        }
    }

    fn ensure_open(&self) -> Result<(), SdkError> {
        match self.state() {
            State::Closed => Err(ClosedSnafu.build()),
            _ => Ok(()),
        }
    }

    /// Opens the data structure an identifier resolves to.
    ///
    /// Resolves the identifier, opens the handle and waits until it is loaded. Unless
    /// disabled, the discovery key of the handle is joined. If the handle is read-only and
    /// empty this waits until the network found peers for it, see [`GetOptions::flush_timeout`].
    pub async fn get(
        &self,
        identifier: impl Into<Identifier>,
        options: GetOptions,
    ) -> Result<Arc<dyn Handle>, SdkError> {
        self.ensure_ready()?;
        let config = &self.inner.config;
        let core = match &options.core {
            Some(core) => config.core_opts.merge(core),
            None => config.core_opts.clone(),
        };
        let target = self
            .inner
            .resolver
            .resolve(identifier, options.dns.as_ref())
            .await?;
        trace!(?target, "resolved");

        let handle = self
            .inner
            .storage
            .get(CoreRequest {
                target,
                options: core,
            })
            .await?;
        handle.ready().await?;

        let auto_join = options.auto_join.unwrap_or(config.auto_join);
        if auto_join && !handle.discovery().is_attached() {
            let flush_timeout = options.flush_timeout.or(config.flush_timeout);
            self.inner
                .discovery
                .auto_join(&handle, options.join.as_ref(), flush_timeout)
                .await?;
        }
        Ok(handle)
    }

    /// Resolves an identifier without opening anything.
    pub async fn resolve(
        &self,
        identifier: impl Into<Identifier>,
        dns: Option<&DnsOptions>,
    ) -> Result<ResolvedTarget, SdkError> {
        self.ensure_open()?;
        Ok(self.inner.resolver.resolve(identifier, dns).await?)
    }

    /// Resolves a domain to the key its DNS-link record points to.
    pub async fn resolve_dns_to_key(
        &self,
        domain: &str,
        dns: Option<&DnsOptions>,
    ) -> Result<Key, SdkError> {
        self.ensure_open()?;
        Ok(self.inner.resolver.resolve_domain(domain, dns).await?)
    }

    /// Returns the topic a name is joined as.
    pub fn topic_for(name: &str) -> TopicId {
        TopicId::from_name(name)
    }

    /// Joins a topic, or the topic derived from a name.
    pub fn join(
        &self,
        target: impl Into<TopicOrName>,
        options: Option<&JoinOptions>,
    ) -> Result<Arc<dyn DiscoverySession>, SdkError> {
        self.ensure_ready()?;
        Ok(self.inner.discovery.join(target, options)?)
    }

    /// Leaves a topic, or the topic derived from a name.
    pub async fn leave(&self, target: impl Into<TopicOrName>) -> Result<(), SdkError> {
        self.ensure_ready()?;
        Ok(self.inner.discovery.leave(target).await?)
    }

    /// Keeps a connection to a peer.
    pub fn join_peer(&self, peer: Key) -> Result<(), SdkError> {
        self.ensure_ready()?;
        self.inner.discovery.join_peer(peer);
        Ok(())
    }

    /// Stops keeping a connection to a peer.
    pub fn leave_peer(&self, peer: Key) -> Result<(), SdkError> {
        self.ensure_ready()?;
        self.inner.discovery.leave_peer(peer);
        Ok(())
    }

    /// Returns a view of the storage in which names are scoped to `name`.
    pub fn namespace(&self, name: &str) -> Result<Arc<dyn Storage>, SdkError> {
        self.ensure_open()?;
        Ok(self.inner.storage.namespace(name))
    }

    /// Creates the key pair a name maps to.
    pub async fn create_key_pair(&self, name: &str) -> Result<KeyPair, SdkError> {
        self.ensure_ready()?;
        Ok(self.inner.storage.create_key_pair(name).await?)
    }

    /// Replicates over a connection established outside the network.
    pub fn replicate(&self, connection: Connection) -> Result<(), SdkError> {
        self.ensure_ready()?;
        Ok(self.inner.storage.replicate(connection)?)
    }

    /// Our public key on the network.
    pub fn id(&self) -> Key {
        self.inner.network.public_key()
    }

    /// The open peer connections.
    pub fn connections(&self) -> Vec<Connection> {
        self.inner.network.connections()
    }

    /// The connected peers.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.inner.network.peers()
    }

    /// The open data structures.
    pub fn cores(&self) -> Vec<Arc<dyn Handle>> {
        self.inner.storage.cores()
    }

    /// Calls `callback` for every event of `kind`, until unsubscribed.
    ///
    /// Callbacks run on the task bridging connections and must not block.
    pub fn subscribe(
        &self,
        kind: EventKind,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.events.subscribe(kind, callback)
    }

    /// Removes a callback. Returns `false` if it was removed already.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Returns a stream of all events from now on.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.inner.events.receiver()
    }

    /// Returns the metrics of this [`Sdk`].
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// Returns the config this [`Sdk`] was built with.
    pub fn config(&self) -> &SdkConfig {
        &self.inner.config
    }
}

/// Hands every connection the network reports to the storage.
#[derive(Debug)]
struct Bridge {
    network: Arc<dyn Network>,
    storage: Arc<dyn Storage>,
    events: Arc<EventDispatcher>,
    metrics: Arc<Metrics>,
    do_replicate: bool,
}

impl Bridge {
    async fn run(self, cancel_token: CancellationToken) {
        // Make sure to cancel the token, if this future ever exits.
        let _cancel_guard = cancel_token.clone().drop_guard();
        let mut join_set = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    break;
                },
                // handle task terminations and quit on panics.
                Some(res) = join_set.join_next() => {
                    match res {
                        Err(outer) => {
                            if outer.is_panic() {
                                error!("Task panicked: {outer:?}");
                                break;
                            } else if outer.is_cancelled() {
                                trace!("Task cancelled: {outer:?}");
                            } else {
                                error!("Task failed: {outer:?}");
                                break;
                            }
                        }
                        Ok(()) => {
                            trace!("Task finished");
                        }
                    }
                },
                incoming = self.network.accept() => {
                    let Some((connection, info)) = incoming else {
                        break; // Network is destroyed.
                    };
                    let peer = info.public_key;
                    let closed = self.handle_connection(connection, info);
                    join_set.spawn(closed.instrument(info_span!("peer", peer = %peer.fmt_short())));
                },
            }
        }

        // Let hooks of connections closed by now report their removal.
        while let Ok(Some(_)) = time::timeout(SHUTDOWN_GRACE, join_set.join_next()).await {}
        trace!("Shutting down remaining tasks");
        join_set.shutdown().await;
    }

    /// Reports a new connection and returns a future reporting its end.
    fn handle_connection(
        &self,
        connection: Connection,
        info: PeerInfo,
    ) -> impl Future<Output = ()> + Send + 'static {
        debug!(peer = %info.public_key.fmt_short(), client = info.client, "peer connected");
        self.metrics.peers_added.inc();
        self.events.emit(Event::PeerAdd(info.clone()));
        if self.do_replicate {
            if let Err(err) = self.storage.replicate(connection.clone()) {
                warn!("failed to replicate to {}: {err:#}", info.public_key.fmt_short());
            }
        }
        let closed = connection.closed();
        let events = self.events.clone();
        let metrics = self.metrics.clone();
        async move {
            closed.await;
            debug!("peer disconnected");
            metrics.peers_removed.inc();
            events.emit(Event::PeerRemove(info));
        }
    }
}
