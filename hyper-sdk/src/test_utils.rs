//! In-memory collaborators for tests.
//!
//! [`MemStorage`] and [`MemNetwork`] implement just enough of [`Storage`](crate::Storage)
//! and [`Network`](crate::Network) to drive an [`Sdk`](crate::Sdk) without disk or sockets.
//! Peers are simulated with [`MemNetwork::connect`]. [`StaticDns`] answers TXT queries from a
//! fixed table.

mod dns;
mod net;
mod storage;

pub use self::{
    dns::StaticDns,
    net::{MemConnection, MemNetwork, MemSession},
    storage::{MemHandle, MemStorage, MemStorageProvider},
};
