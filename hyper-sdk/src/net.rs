//! The network collaborator.
//!
//! The network announces and looks up topics, dials the peers it finds and reports every
//! established connection. Transport, hole punching and encryption are its business.

use std::{fmt::Debug, sync::Arc};

use hyper_sdk_base::{Key, TopicId};
use n0_future::boxed::BoxFuture;
use nested_enum_utils::common_fields;
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, IntoError, Snafu};

/// How to take part in a topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JoinOptions {
    /// Announce ourselves so that peers can connect to us. Defaults to `true`.
    pub server: Option<bool>,
    /// Look up and connect to peers announcing the topic. Defaults to `true`.
    pub client: Option<bool>,
}

impl JoinOptions {
    /// Returns a copy of `self` with every field set in `overrides` replaced.
    pub fn merge(&self, overrides: &JoinOptions) -> JoinOptions {
        JoinOptions {
            server: overrides.server.or(self.server),
            client: overrides.client.or(self.client),
        }
    }

    /// Whether to announce.
    pub fn server(&self) -> bool {
        self.server.unwrap_or(true)
    }

    /// Whether to look up peers.
    pub fn client(&self) -> bool {
        self.client.unwrap_or(true)
    }

    /// Returns the options with all defaults filled in.
    pub fn resolved(&self) -> JoinOptions {
        JoinOptions {
            server: Some(self.server()),
            client: Some(self.client()),
        }
    }
}

/// Network errors
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(module)]
pub enum NetworkError {
    #[snafu(display("network is closed"))]
    Closed {},
    #[snafu(display("network '{provenance}' error"))]
    User {
        provenance: &'static str,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl NetworkError {
    /// Creates a new user error from an arbitrary error type.
    pub fn from_err<T: std::error::Error + Send + Sync + 'static>(
        provenance: &'static str,
        source: T,
    ) -> Self {
        network_error::UserSnafu { provenance }.into_error(Box::new(source))
    }

    /// Creates a new user error from an arbitrary boxed error type.
    pub fn from_err_box(
        provenance: &'static str,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    ) -> Self {
        network_error::UserSnafu { provenance }.into_error(source)
    }

    /// Creates the error returned when using a destroyed network.
    pub fn closed() -> Self {
        network_error::ClosedSnafu.build()
    }
}

/// A joined topic.
pub trait DiscoverySession: Debug + Send + Sync + 'static {
    /// The topic of this session.
    fn topic(&self) -> TopicId;

    /// Resolves once the first round of announcing and looking up is done, and every peer
    /// found in it has been connected to or given up on.
    fn flushed(&self) -> BoxFuture<Result<(), NetworkError>>;

    /// Stops announcing and looking up the topic.
    fn destroy(&self) -> BoxFuture<Result<(), NetworkError>>;
}

/// An established connection to a peer.
pub trait PeerConnection: Debug + Send + Sync + 'static {
    /// The public key of the remote peer.
    fn remote_public_key(&self) -> Key;

    /// Resolves when the connection is closed.
    fn closed(&self) -> BoxFuture<()>;
}

/// A shared [`PeerConnection`].
pub type Connection = Arc<dyn PeerConnection>;

/// What the network knows about a connected peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// The public key of the peer.
    pub public_key: Key,
    /// The topics we found the peer on. Empty for incoming connections.
    pub topics: Vec<TopicId>,
    /// Whether we dialed the peer.
    pub client: bool,
}

/// A peer discovery network.
pub trait Network: Debug + Send + Sync + 'static {
    /// Our public key.
    fn public_key(&self) -> Key;

    /// Starts announcing and looking up a topic.
    fn join(
        &self,
        topic: TopicId,
        options: JoinOptions,
    ) -> Result<Arc<dyn DiscoverySession>, NetworkError>;

    /// Stops announcing and looking up a topic.
    fn leave(&self, topic: TopicId) -> BoxFuture<Result<(), NetworkError>>;

    /// Keeps a connection to a peer, whatever topics it is on.
    fn join_peer(&self, peer: Key);

    /// Stops keeping a connection to a peer.
    fn leave_peer(&self, peer: Key);

    /// Starts accepting incoming connections.
    fn listen(&self) -> BoxFuture<Result<(), NetworkError>>;

    /// Waits for the next established connection.
    ///
    /// Returns `None` once the network is destroyed.
    fn accept(&self) -> BoxFuture<Option<(Connection, PeerInfo)>>;

    /// Lists the open connections.
    fn connections(&self) -> Vec<Connection>;

    /// Lists the connected peers.
    fn peers(&self) -> Vec<PeerInfo>;

    /// Closes all connections and leaves all topics.
    fn destroy(&self) -> BoxFuture<Result<(), NetworkError>>;
}

impl<T: Network> Network for Arc<T> {
    fn public_key(&self) -> Key {
        self.as_ref().public_key()
    }

    fn join(
        &self,
        topic: TopicId,
        options: JoinOptions,
    ) -> Result<Arc<dyn DiscoverySession>, NetworkError> {
        self.as_ref().join(topic, options)
    }

    fn leave(&self, topic: TopicId) -> BoxFuture<Result<(), NetworkError>> {
        self.as_ref().leave(topic)
    }

    fn join_peer(&self, peer: Key) {
        self.as_ref().join_peer(peer)
    }

    fn leave_peer(&self, peer: Key) {
        self.as_ref().leave_peer(peer)
    }

    fn listen(&self) -> BoxFuture<Result<(), NetworkError>> {
        self.as_ref().listen()
    }

    fn accept(&self) -> BoxFuture<Option<(Connection, PeerInfo)>> {
        self.as_ref().accept()
    }

    fn connections(&self) -> Vec<Connection> {
        self.as_ref().connections()
    }

    fn peers(&self) -> Vec<PeerInfo> {
        self.as_ref().peers()
    }

    fn destroy(&self) -> BoxFuture<Result<(), NetworkError>> {
        self.as_ref().destroy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_options() {
        let defaults = JoinOptions::default();
        assert!(defaults.server());
        assert!(defaults.client());

        let client_only = defaults.merge(&JoinOptions {
            server: Some(false),
            client: None,
        });
        assert_eq!(
            client_only.resolved(),
            JoinOptions {
                server: Some(false),
                client: Some(true),
            }
        );

        let options: JoinOptions = toml::from_str("client = false").unwrap();
        assert!(options.server());
        assert!(!options.client());
    }
}
