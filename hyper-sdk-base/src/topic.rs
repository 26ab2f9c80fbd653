//! Discovery topics.

use std::{
    fmt::{self, Debug, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{
    encoding::{self, KeyParsingError},
    key::Key,
};

/// The derivation namespace for topics derived from names.
pub const TOPIC_NAMESPACE: &str = "hyperswarm/topic";

/// A 32 byte topic announced and looked up on the discovery network.
///
/// A topic is either the discovery key of a data handle, taken as is, or derived from a
/// human-readable name with [`TopicId::from_name`]. Derived topics go through a keyed hash
/// under [`TOPIC_NAMESPACE`], so they never collide with raw discovery keys or with topics
/// derived in another namespace.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TopicId([u8; 32]);

impl TopicId {
    /// Creates a topic from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derives the topic for a name in the default [`TOPIC_NAMESPACE`].
    ///
    /// The same name always yields the same topic.
    pub fn from_name(name: &str) -> Self {
        Self::derive_in(TOPIC_NAMESPACE, name)
    }

    /// Derives the topic for a name in a custom derivation namespace.
    pub fn derive_in(namespace: &str, name: &str) -> Self {
        Self(blake3::derive_key(namespace, name.as_bytes()))
    }

    /// Returns the bytes of this topic.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Converts to a z-base-32 string limited to the first 5 bytes.
    pub fn fmt_short(&self) -> String {
        encoding::fmt_short(self.0)
    }
}

impl From<Key> for TopicId {
    fn from(key: Key) -> Self {
        Self(*key.as_bytes())
    }
}

impl From<[u8; 32]> for TopicId {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for TopicId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", encoding::fmt_z32(self.0))
    }
}

impl Debug for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TopicId({})", self.fmt_short())
    }
}

impl FromStr for TopicId {
    type Err = KeyParsingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        encoding::parse_array_z32_or_hex(s).map(Self)
    }
}
