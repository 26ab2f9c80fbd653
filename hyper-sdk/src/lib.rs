//! Resolve keys, names and `hyper://` URLs to replicated data structures, and find peers for
//! them.
//!
//! The [`Sdk`] is a thin layer between an application and two collaborators it is given: a
//! [`Storage`], which owns the replicated data structures, and a [`Network`], which finds
//! peers and connects to them. What the SDK adds is deciding what an identifier refers to and
//! keeping data structures present on the discovery network.
//!
//! # Identifiers
//!
//! [`Sdk::get`] accepts any [`Identifier`]:
//!
//! - 32 bytes of binary data are a [`Key`].
//! - A 52 character z-base-32 or 64 character hex string is a [`Key`].
//! - `hyper://<key>/` is a [`Key`].
//! - `hyper://example.com/` is the [`Key`] published in a DNS TXT record at
//!   `_dnslink.example.com` with the value `dnslink=/hyper/<key>`.
//! - Anything else is a name. The storage maps names to keys of its own.
//!
//! # Discovery
//!
//! By default every handle opened with [`Sdk::get`] is announced on the network under its
//! discovery key. Topics can also be joined by name with [`Sdk::join`], which derives a
//! [`TopicId`] with [`TopicId::from_name`].
//!
//! Opening a handle that is read-only and empty waits until the network finished its first
//! lookup for it. Without that a first-time reader would usually get an empty handle back.
//!
//! # Events
//!
//! Every connection the network reports is handed to the storage for replication and
//! reported as an [`Event::PeerAdd`], followed by an [`Event::PeerRemove`] once it closes.
#![recursion_limit = "256"]
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]
#![cfg_attr(hyper_sdk_docsrs, feature(doc_cfg))]

pub mod config;
pub mod defaults;
pub mod discovery;
pub mod dns;
pub mod event;
pub mod metrics;
pub mod net;
pub mod resolve;
mod sdk;
pub mod storage;

#[cfg(any(test, feature = "test-utils"))]
#[cfg_attr(hyper_sdk_docsrs, doc(cfg(any(test, feature = "test-utils"))))]
pub mod test_utils;

pub use hyper_sdk_base::{HyperUrl, Key, KeyParsingError, TopicId, to_url};

pub use self::{
    config::{SdkConfig, StorageConfig},
    discovery::{DiscoverySlot, TopicOrName},
    event::{Event, EventKind, SubscriptionId},
    net::{Connection, DiscoverySession, JoinOptions, Network, PeerConnection, PeerInfo},
    resolve::{Identifier, ResolvedTarget},
    sdk::{Builder, GetOptions, Sdk, SdkError, State, create},
    storage::{CoreOptions, CoreRequest, Handle, KeyPair, Storage, StorageLocation, StorageProvider},
};
