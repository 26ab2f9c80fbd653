//! The storage collaborator.
//!
//! Storage owns the replicated data structures. The SDK asks it for [`Handle`]s by key or by
//! name and hands it peer connections to replicate over. How data is stored, verified and
//! exchanged is entirely up to the implementation.

use std::{fmt::Debug, path::PathBuf, sync::Arc, time::Duration};

use bytes::Bytes;
use hyper_sdk_base::Key;
use n0_future::boxed::BoxFuture;
use nested_enum_utils::common_fields;
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, IntoError, Snafu};

use crate::{discovery::DiscoverySlot, net::Connection, resolve::ResolvedTarget};

/// Options for opening a data structure.
///
/// Unset fields are left to the storage implementation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreOptions {
    /// Only download data when it is read.
    pub sparse: Option<bool>,
    /// Create the data structure if it does not exist yet.
    pub create_if_missing: Option<bool>,
    /// Drop existing local data.
    pub overwrite: Option<bool>,
    /// How values are encoded, for example `"binary"` or `"json"`.
    pub value_encoding: Option<String>,
    /// Wait for data that is not available locally.
    pub wait: Option<bool>,
    /// How long a read may wait for data.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl CoreOptions {
    /// Returns a copy of `self` with every field set in `overrides` replaced.
    pub fn merge(&self, overrides: &CoreOptions) -> CoreOptions {
        CoreOptions {
            sparse: overrides.sparse.or(self.sparse),
            create_if_missing: overrides.create_if_missing.or(self.create_if_missing),
            overwrite: overrides.overwrite.or(self.overwrite),
            value_encoding: overrides
                .value_encoding
                .clone()
                .or_else(|| self.value_encoding.clone()),
            wait: overrides.wait.or(self.wait),
            timeout: overrides.timeout.or(self.timeout),
        }
    }
}

/// A request to open a data structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreRequest {
    /// What to open.
    pub target: ResolvedTarget,
    /// How to open it.
    pub options: CoreOptions,
}

/// A key pair created by the storage.
#[derive(Clone, derive_more::Debug)]
pub struct KeyPair {
    /// The public half.
    pub public_key: Key,
    /// The secret half, in whatever format the storage uses.
    #[debug("..")]
    pub secret_key: Bytes,
}

/// Where a storage keeps its data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StorageLocation {
    /// Nothing is persisted.
    Memory,
    /// A directory on disk.
    Dir(PathBuf),
}

/// Storage errors
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(module)]
pub enum StorageError {
    #[snafu(display("storage is closed"))]
    Closed {},
    #[snafu(display("storage '{provenance}' error"))]
    User {
        provenance: &'static str,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl StorageError {
    /// Creates a new user error from an arbitrary error type.
    pub fn from_err<T: std::error::Error + Send + Sync + 'static>(
        provenance: &'static str,
        source: T,
    ) -> Self {
        storage_error::UserSnafu { provenance }.into_error(Box::new(source))
    }

    /// Creates a new user error from an arbitrary boxed error type.
    pub fn from_err_box(
        provenance: &'static str,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    ) -> Self {
        storage_error::UserSnafu { provenance }.into_error(source)
    }

    /// Creates the error returned when using a closed storage.
    pub fn closed() -> Self {
        storage_error::ClosedSnafu.build()
    }
}

/// An open replicated data structure.
///
/// Handles are shared, the storage may hand out the same handle to several callers.
pub trait Handle: Debug + Send + Sync + 'static {
    /// Resolves once the handle is loaded.
    fn ready(&self) -> BoxFuture<Result<(), StorageError>>;

    /// The key of the data structure.
    fn key(&self) -> Key;

    /// The key announced on the discovery network.
    ///
    /// Derived from [`Self::key`] so that announcing does not reveal the key itself.
    fn discovery_key(&self) -> Key;

    /// Whether this side can append.
    fn writable(&self) -> bool;

    /// The number of entries known locally.
    fn len(&self) -> u64;

    /// Whether no entries are known locally.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The discovery session attached to this handle.
    fn discovery(&self) -> &DiscoverySlot;

    /// Resolves when the handle is closed.
    fn closed(&self) -> BoxFuture<()>;
}

/// A store of replicated data structures.
pub trait Storage: Debug + Send + Sync + 'static {
    /// Resolves once the storage can open data structures.
    fn ready(&self) -> BoxFuture<Result<(), StorageError>>;

    /// Opens a data structure.
    fn get(&self, request: CoreRequest) -> BoxFuture<Result<Arc<dyn Handle>, StorageError>>;

    /// Replicates all open data structures over a peer connection.
    fn replicate(&self, connection: Connection) -> Result<(), StorageError>;

    /// Returns a view of this storage in which names are scoped to `name`.
    fn namespace(&self, name: &str) -> Arc<dyn Storage>;

    /// Creates the key pair a name maps to.
    fn create_key_pair(&self, name: &str) -> BoxFuture<Result<KeyPair, StorageError>>;

    /// Lists the open data structures.
    fn cores(&self) -> Vec<Arc<dyn Handle>>;

    /// Closes the storage and every open handle.
    fn close(&self) -> BoxFuture<Result<(), StorageError>>;
}

impl<T: Storage> Storage for Arc<T> {
    fn ready(&self) -> BoxFuture<Result<(), StorageError>> {
        self.as_ref().ready()
    }

    fn get(&self, request: CoreRequest) -> BoxFuture<Result<Arc<dyn Handle>, StorageError>> {
        self.as_ref().get(request)
    }

    fn replicate(&self, connection: Connection) -> Result<(), StorageError> {
        self.as_ref().replicate(connection)
    }

    fn namespace(&self, name: &str) -> Arc<dyn Storage> {
        self.as_ref().namespace(name)
    }

    fn create_key_pair(&self, name: &str) -> BoxFuture<Result<KeyPair, StorageError>> {
        self.as_ref().create_key_pair(name)
    }

    fn cores(&self) -> Vec<Arc<dyn Handle>> {
        self.as_ref().cores()
    }

    fn close(&self) -> BoxFuture<Result<(), StorageError>> {
        self.as_ref().close()
    }
}

/// Opens storages at a [`StorageLocation`].
pub trait StorageProvider: Debug + Send + Sync + 'static {
    /// Opens the storage at `location`.
    fn open(&self, location: StorageLocation) -> BoxFuture<Result<Arc<dyn Storage>, StorageError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_core_options() {
        let defaults = CoreOptions {
            sparse: Some(true),
            value_encoding: Some("binary".into()),
            ..Default::default()
        };
        let merged = defaults.merge(&CoreOptions {
            sparse: Some(false),
            wait: Some(false),
            ..Default::default()
        });
        assert_eq!(merged.sparse, Some(false));
        assert_eq!(merged.wait, Some(false));
        assert_eq!(merged.value_encoding.as_deref(), Some("binary"));
        assert_eq!(merged.create_if_missing, None);
    }

    #[test]
    fn key_pair_debug_hides_secret() {
        let pair = KeyPair {
            public_key: Key::from_bytes([1; 32]),
            secret_key: Bytes::from_static(b"very secret"),
        };
        let debug = format!("{pair:?}");
        assert!(!debug.contains("very secret"));
    }

    #[test]
    fn user_error() {
        let err = StorageError::from_err("disk", std::io::Error::other("full"));
        assert_eq!(err.to_string(), "storage 'disk' error");
        assert!(matches!(StorageError::closed(), StorageError::Closed { .. }));
    }
}
