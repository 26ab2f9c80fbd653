use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use hyper_sdk_base::{Key, TopicId};
use n0_future::boxed::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::{
    discovery::DiscoverySlot,
    net::Connection,
    resolve::ResolvedTarget,
    storage::{
        CoreRequest, Handle, KeyPair, Storage, StorageError, StorageLocation, StorageProvider,
    },
};

const DISCOVERY_NAMESPACE: &str = "hyper-sdk/test-utils/discovery";
const NAME_NAMESPACE: &str = "hyper-sdk/test-utils/name";
const SECRET_NAMESPACE: &str = "hyper-sdk/test-utils/secret";

/// An in-memory data handle.
#[derive(Debug)]
pub struct MemHandle {
    key: Key,
    discovery_key: Key,
    writable: bool,
    len: AtomicU64,
    discovery: DiscoverySlot,
    closed: CancellationToken,
}

impl MemHandle {
    /// Creates an empty handle.
    pub fn new(key: Key, writable: bool) -> Self {
        Self {
            key,
            discovery_key: Self::discovery_key_for(&key),
            writable,
            len: AtomicU64::new(0),
            discovery: DiscoverySlot::new(),
            closed: CancellationToken::new(),
        }
    }

    /// The discovery key of a handle for `key`.
    pub fn discovery_key_for(key: &Key) -> Key {
        Key::from_bytes(*TopicId::derive_in(DISCOVERY_NAMESPACE, &key.to_z32()).as_bytes())
    }

    /// Appends `entries` entries.
    pub fn append(&self, entries: u64) {
        self.len.fetch_add(entries, Ordering::Relaxed);
    }

    /// Closes the handle.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether the handle is closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl Handle for MemHandle {
    fn ready(&self) -> BoxFuture<Result<(), StorageError>> {
        let closed = self.is_closed();
        Box::pin(async move {
            if closed {
                return Err(StorageError::closed());
            }
            Ok(())
        })
    }

    fn key(&self) -> Key {
        self.key
    }

    fn discovery_key(&self) -> Key {
        self.discovery_key
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn len(&self) -> u64 {
        self.len.load(Ordering::Relaxed)
    }

    fn discovery(&self) -> &DiscoverySlot {
        &self.discovery
    }

    fn closed(&self) -> BoxFuture<()> {
        let token = self.closed.clone();
        Box::pin(async move { token.cancelled().await })
    }
}

/// An in-memory [`Storage`].
///
/// Names map to writable handles, keys to read-only ones. Clones and namespaces share all
/// handles.
#[derive(Debug, Clone, Default)]
pub struct MemStorage {
    namespace: String,
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    cores: Mutex<BTreeMap<Key, Arc<MemHandle>>>,
    preloaded: Mutex<BTreeMap<Key, u64>>,
    requests: Mutex<Vec<CoreRequest>>,
    replicated: Mutex<Vec<Key>>,
    ready: AtomicBool,
    closed: AtomicBool,
}

impl MemStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `len` entries of `key` available locally, as if replicated earlier.
    pub fn preload(&self, key: Key, len: u64) {
        self.shared
            .preloaded
            .lock()
            .expect("poisoned")
            .insert(key, len);
    }

    /// The key a name maps to in this namespace.
    pub fn key_for_name(&self, name: &str) -> Key {
        let scoped = format!("{}/{name}", self.namespace);
        Key::from_bytes(*TopicId::derive_in(NAME_NAMESPACE, &scoped).as_bytes())
    }

    /// Returns the open handle for `key`.
    pub fn handle(&self, key: &Key) -> Option<Arc<MemHandle>> {
        self.shared.cores.lock().expect("poisoned").get(key).cloned()
    }

    /// Returns the requests passed to [`Storage::get`] so far.
    pub fn requests(&self) -> Vec<CoreRequest> {
        self.shared.requests.lock().expect("poisoned").clone()
    }

    /// Returns the remote keys of the connections replicated over so far.
    pub fn replicated(&self) -> Vec<Key> {
        self.shared.replicated.lock().expect("poisoned").clone()
    }

    /// Whether [`Storage::ready`] was called.
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Relaxed)
    }

    /// Whether [`Storage::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Relaxed)
    }

    fn open(&self, request: CoreRequest) -> Result<Arc<MemHandle>, StorageError> {
        if self.is_closed() {
            return Err(StorageError::closed());
        }
        let (key, writable) = match &request.target {
            ResolvedTarget::Key(key) => (*key, false),
            ResolvedTarget::Name(name) => (self.key_for_name(name), true),
        };
        self.shared
            .requests
            .lock()
            .expect("poisoned")
            .push(request);
        let preloaded = self
            .shared
            .preloaded
            .lock()
            .expect("poisoned")
            .get(&key)
            .copied();
        let mut cores = self.shared.cores.lock().expect("poisoned");
        let handle = cores.entry(key).or_insert_with(|| {
            let handle = MemHandle::new(key, writable);
            handle.append(preloaded.unwrap_or_default());
            Arc::new(handle)
        });
        Ok(handle.clone())
    }
}

impl Storage for MemStorage {
    fn ready(&self) -> BoxFuture<Result<(), StorageError>> {
        self.shared.ready.store(true, Ordering::Relaxed);
        Box::pin(async { Ok(()) })
    }

    fn get(&self, request: CoreRequest) -> BoxFuture<Result<Arc<dyn Handle>, StorageError>> {
        let res = self
            .open(request)
            .map(|handle| handle as Arc<dyn Handle>);
        Box::pin(async move { res })
    }

    fn replicate(&self, connection: Connection) -> Result<(), StorageError> {
        if self.is_closed() {
            return Err(StorageError::closed());
        }
        self.shared
            .replicated
            .lock()
            .expect("poisoned")
            .push(connection.remote_public_key());
        Ok(())
    }

    fn namespace(&self, name: &str) -> Arc<dyn Storage> {
        Arc::new(MemStorage {
            namespace: format!("{}/{name}", self.namespace),
            shared: self.shared.clone(),
        })
    }

    fn create_key_pair(&self, name: &str) -> BoxFuture<Result<KeyPair, StorageError>> {
        let public_key = self.key_for_name(name);
        let secret = TopicId::derive_in(SECRET_NAMESPACE, &public_key.to_z32());
        let pair = KeyPair {
            public_key,
            secret_key: Bytes::copy_from_slice(secret.as_bytes()),
        };
        Box::pin(async move { Ok(pair) })
    }

    fn cores(&self) -> Vec<Arc<dyn Handle>> {
        self.shared
            .cores
            .lock()
            .expect("poisoned")
            .values()
            .filter(|handle| !handle.is_closed())
            .map(|handle| handle.clone() as Arc<dyn Handle>)
            .collect()
    }

    fn close(&self) -> BoxFuture<Result<(), StorageError>> {
        self.shared.closed.store(true, Ordering::Relaxed);
        for handle in self.shared.cores.lock().expect("poisoned").values() {
            handle.close();
        }
        Box::pin(async { Ok(()) })
    }
}

/// A [`StorageProvider`] handing out one shared [`MemStorage`].
#[derive(Debug, Clone, Default)]
pub struct MemStorageProvider {
    storage: MemStorage,
    opened: Arc<Mutex<Vec<StorageLocation>>>,
}

impl MemStorageProvider {
    /// Creates a provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// The storage handed out.
    pub fn storage(&self) -> &MemStorage {
        &self.storage
    }

    /// The locations opened so far.
    pub fn locations(&self) -> Vec<StorageLocation> {
        self.opened.lock().expect("poisoned").clone()
    }
}

impl StorageProvider for MemStorageProvider {
    fn open(&self, location: StorageLocation) -> BoxFuture<Result<Arc<dyn Storage>, StorageError>> {
        self.opened.lock().expect("poisoned").push(location);
        let storage: Arc<dyn Storage> = Arc::new(self.storage.clone());
        Box::pin(async move { Ok(storage) })
    }
}
