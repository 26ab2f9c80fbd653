//! The 32 byte key identifying a replicated data structure.

use std::{
    borrow::Borrow,
    fmt::{self, Debug, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::encoding::{self, HEX_LEN, KeyParsingError, Z32_LEN};

/// A key of a replicated data structure.
///
/// This is the public key of a writer, or any other 32 byte value the storage layer uses to
/// address a data structure. The core never interprets the bytes, so unlike a signing key
/// there is no validation beyond the length.
///
/// The canonical text form is [z-base-32] (52 characters). Keys can also be written as 64
/// hex characters. [`Key::decode`] accepts both.
///
/// [z-base-32]: https://philzimmermann.com/docs/human-oriented-base-32-encoding.txt
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Key([u8; 32]);

impl Key {
    /// The length of a key, in bytes.
    pub const LENGTH: usize = 32;

    /// Creates a key from its bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the bytes of this key.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Decodes a key from one of its two text encodings.
    ///
    /// The encoding is chosen purely on the input length: 52 characters are decoded as
    /// z-base-32, 64 characters as hex. Any other length, and any decode failure, yields
    /// `None`. This never fails loudly because arbitrary names may happen to have one of
    /// these lengths and callers fall back to treating the input as a name.
    pub fn decode(text: &str) -> Option<Self> {
        match text.len() {
            Z32_LEN | HEX_LEN => encoding::parse_array_z32_or_hex(text).ok().map(Self),
            _ => None,
        }
    }

    /// Encodes this key in z-base-32.
    pub fn to_z32(&self) -> String {
        encoding::fmt_z32(self.0)
    }

    /// Encodes this key as lowercase hex.
    pub fn to_hex(&self) -> String {
        encoding::fmt_hex(self.0)
    }

    /// Converts to a z-base-32 string limited to the first 5 bytes for a friendly string
    /// representation of the key.
    pub fn fmt_short(&self) -> String {
        encoding::fmt_short(self.0)
    }
}

impl Borrow<[u8; 32]> for Key {
    fn borrow(&self) -> &[u8; 32] {
        self.as_bytes()
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Key {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl From<Key> for [u8; 32] {
    fn from(value: Key) -> Self {
        value.0
    }
}

impl TryFrom<&[u8]> for Key {
    type Error = KeyParsingError;

    #[inline]
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            encoding::InvalidLengthSnafu { len: bytes.len() }.build()
        })?;
        Ok(Self(bytes))
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_z32())
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.to_z32())
    }
}

/// Parses a [`Key`] from z-base-32 or hex.
///
/// Unlike [`Key::decode`] this reports why the input was rejected.
impl FromStr for Key {
    type Err = KeyParsingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        encoding::parse_array_z32_or_hex(s).map(Self)
    }
}

impl Serialize for Key {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_z32())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Self::from_str(&s).map_err(serde::de::Error::custom)
        } else {
            let data: [u8; 32] = serde::Deserialize::deserialize(deserializer)?;
            Ok(Self(data))
        }
    }
}
