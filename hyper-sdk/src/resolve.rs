//! Turning loosely typed identifiers into keys or names.
//!
//! An [`Identifier`] is resolved in a fixed order:
//!
//! 1. Exactly 32 bytes of binary data are a key.
//! 2. Text starting with `hyper://` is a URL. A host containing a period is a domain and
//!    resolved with DNS-link, any other host must decode as a key.
//! 3. Other text is a key if it decodes as one, and a name otherwise.
//!
//! Only bare text may fall back to a name. A URL always resolves to a key or fails.

use std::{str::FromStr, sync::Arc};

use bytes::Bytes;
use hyper_sdk_base::{HyperUrl, Key, KeyParsingError, URL_PREFIX, UrlError};
use nested_enum_utils::common_fields;
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, ResultExt, Snafu};
use tracing::{debug, trace};

use crate::{
    dns::{DnsLinkError, DnsLinkResolver, DnsOptions},
    metrics::Metrics,
};

/// Something that names a replicated data structure.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::From)]
pub enum Identifier {
    /// Binary data. Only valid if exactly 32 bytes long.
    Bytes(Bytes),
    /// An encoded key, a `hyper://` URL, or a name.
    Text(String),
}

impl From<Key> for Identifier {
    fn from(key: Key) -> Self {
        Self::Bytes(Bytes::copy_from_slice(key.as_bytes()))
    }
}

impl From<&Key> for Identifier {
    fn from(key: &Key) -> Self {
        Self::from(*key)
    }
}

impl From<[u8; 32]> for Identifier {
    fn from(bytes: [u8; 32]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(&bytes))
    }
}

impl From<&[u8]> for Identifier {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(bytes))
    }
}

impl From<Vec<u8>> for Identifier {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }
}

impl From<&str> for Identifier {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<&String> for Identifier {
    fn from(text: &String) -> Self {
        Self::Text(text.clone())
    }
}

impl From<HyperUrl> for Identifier {
    fn from(url: HyperUrl) -> Self {
        Self::Text(url.to_string())
    }
}

/// What an [`Identifier`] resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedTarget {
    /// The key of an existing data structure.
    Key(Key),
    /// A name the storage maps to a key of its own.
    Name(String),
}

impl ResolvedTarget {
    /// Returns the key, if this is a key.
    pub fn key(&self) -> Option<&Key> {
        match self {
            Self::Key(key) => Some(key),
            Self::Name(_) => None,
        }
    }

    /// Returns the name, if this is a name.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Key(_) => None,
            Self::Name(name) => Some(name),
        }
    }
}

/// Errors resolving an [`Identifier`].
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum ResolveError {
    #[snafu(display("invalid URL {url}"))]
    InvalidUrl { url: String, source: UrlError },
    #[snafu(display(
        "{url}: URLs must have either an encoded key or a valid DNSlink domain"
    ))]
    MalformedUrl { url: String },
    #[snafu(display("DNS-link record of {domain} holds a malformed key: {value}"))]
    MalformedKey {
        domain: String,
        value: String,
        source: KeyParsingError,
    },
    #[snafu(display("binary identifiers must be 32 bytes, got {len}"))]
    InvalidIdentifier { len: usize },
    #[snafu(transparent)]
    DnsLink { source: DnsLinkError },
}

/// Resolves [`Identifier`]s.
#[derive(Debug, Clone)]
pub struct IdentifierResolver {
    dnslink: DnsLinkResolver,
    metrics: Arc<Metrics>,
}

impl IdentifierResolver {
    /// Creates a resolver looking up domains with `dnslink`.
    pub fn new(dnslink: DnsLinkResolver) -> Self {
        Self {
            dnslink,
            metrics: Default::default(),
        }
    }

    pub(crate) fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the DNS-link resolver used for domains.
    pub fn dnslink(&self) -> &DnsLinkResolver {
        &self.dnslink
    }

    /// Resolves an identifier to a key or a name.
    ///
    /// `dns` overrides the default DNS options for this call.
    pub async fn resolve(
        &self,
        identifier: impl Into<Identifier>,
        dns: Option<&DnsOptions>,
    ) -> Result<ResolvedTarget, ResolveError> {
        let target = match identifier.into() {
            Identifier::Bytes(bytes) => {
                let key = Key::try_from(bytes.as_ref())
                    .map_err(|_| InvalidIdentifierSnafu { len: bytes.len() }.build())?;
                ResolvedTarget::Key(key)
            }
            Identifier::Text(text) if text.starts_with(URL_PREFIX) => {
                self.metrics.resolve_url.inc();
                ResolvedTarget::Key(self.resolve_url(&text, dns).await?)
            }
            Identifier::Text(text) => match Key::decode(&text) {
                Some(key) => ResolvedTarget::Key(key),
                None => {
                    trace!(name = %text, "not a key, using as name");
                    ResolvedTarget::Name(text)
                }
            },
        };
        match &target {
            ResolvedTarget::Key(_) => self.metrics.resolve_key.inc(),
            ResolvedTarget::Name(_) => self.metrics.resolve_name.inc(),
        };
        Ok(target)
    }

    /// Resolves a domain to the key its DNS-link record points to.
    ///
    /// Fails with [`ResolveError::MalformedKey`] if the record holds something that is not
    /// a key.
    pub async fn resolve_domain(
        &self,
        domain: &str,
        dns: Option<&DnsOptions>,
    ) -> Result<Key, ResolveError> {
        let value = self.dnslink.resolve(domain, dns).await?;
        let key = Key::from_str(&value).context(MalformedKeySnafu { domain, value })?;
        debug!(%domain, key = %key.fmt_short(), "resolved domain");
        Ok(key)
    }

    async fn resolve_url(&self, text: &str, dns: Option<&DnsOptions>) -> Result<Key, ResolveError> {
        let url = HyperUrl::parse(text).context(InvalidUrlSnafu { url: text })?;
        if url.has_domain_host() {
            self.resolve_domain(url.host(), dns).await
        } else {
            Key::decode(url.host()).ok_or_else(|| MalformedUrlSnafu { url: text }.build())
        }
    }
}

#[cfg(test)]
mod tests {
    use hyper_sdk_base::to_url;
    use n0_snafu::Result;
    use tracing_test::traced_test;

    use super::*;
    use crate::{defaults::DNS_LINK_PREFIX, test_utils::StaticDns};

    const KEY: &str = "yry3fho3dxqfg1n8p7mgqx1e3o4u9jmf4kopnqp6rpjhzb37hsky";

    fn resolver(dns: StaticDns) -> IdentifierResolver {
        IdentifierResolver::new(DnsLinkResolver::new(Arc::new(dns)))
    }

    fn key() -> Key {
        KEY.parse().unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn binary_keys() -> Result {
        let resolver = resolver(StaticDns::new());
        let key = key();
        assert_eq!(
            resolver.resolve(*key.as_bytes(), None).await?,
            ResolvedTarget::Key(key)
        );
        assert_eq!(resolver.resolve(key, None).await?, ResolvedTarget::Key(key));

        let err = resolver.resolve(vec![0u8; 31], None).await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidIdentifier { len: 31, .. }));
        let err = resolver.resolve(Vec::<u8>::new(), None).await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidIdentifier { len: 0, .. }));
        Ok(())
    }

    proptest::proptest! {
        #[test]
        fn any_32_bytes_are_a_key(bytes in proptest::prelude::any::<[u8; 32]>()) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let resolver = resolver(StaticDns::new());
            let target = rt.block_on(resolver.resolve(bytes, None)).unwrap();
            proptest::prop_assert_eq!(target, ResolvedTarget::Key(Key::from_bytes(bytes)));
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn text_keys_and_names() -> Result {
        let resolver = resolver(StaticDns::new());
        let key = key();
        assert_eq!(resolver.resolve(KEY, None).await?, ResolvedTarget::Key(key));
        assert_eq!(
            resolver.resolve(key.to_hex(), None).await?,
            ResolvedTarget::Key(key)
        );
        assert_eq!(
            resolver.resolve("my-app-data", None).await?,
            ResolvedTarget::Name("my-app-data".into())
        );
        // key-shaped but not decodable
        let almost = "-".repeat(52);
        assert_eq!(
            resolver.resolve(&almost, None).await?,
            ResolvedTarget::Name(almost.clone())
        );
        assert_eq!(
            resolver.resolve("", None).await?,
            ResolvedTarget::Name(String::new())
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn key_urls() -> Result {
        let dns = StaticDns::new();
        let resolver = resolver(dns.clone());
        let key = key();
        assert_eq!(
            resolver.resolve(to_url(&key), None).await?,
            ResolvedTarget::Key(key)
        );
        assert_eq!(
            resolver.resolve(HyperUrl::from_key(&key), None).await?,
            ResolvedTarget::Key(key)
        );
        assert!(dns.queries().is_empty());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn domain_urls() -> Result {
        let dns = StaticDns::new().with_dnslink("example.com", &format!("{DNS_LINK_PREFIX}{KEY}"));
        let resolver = resolver(dns.clone());
        let direct = resolver.resolve(KEY, None).await?;
        let via_dns = resolver.resolve("hyper://example.com/", None).await?;
        assert_eq!(direct, via_dns);
        assert_eq!(dns.queries(), vec!["_dnslink.example.com".to_string()]);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn urls_never_become_names() {
        let dns = StaticDns::new();
        let resolver = resolver(dns.clone());

        let err = resolver.resolve("hyper://notakey/", None).await.unwrap_err();
        assert!(matches!(err, ResolveError::MalformedUrl { .. }));
        assert!(err.to_string().contains("encoded key or a valid DNSlink domain"));
        assert!(dns.queries().is_empty());

        let err = resolver.resolve("hyper://", None).await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidUrl { .. }));

        let err = resolver
            .resolve("hyper://missing.example/", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::DnsLink { .. }));
        assert!(err.to_string().contains("_dnslink.missing.example"));
    }

    #[tokio::test]
    #[traced_test]
    async fn malformed_dns_value() {
        let dns = StaticDns::new().with_dnslink("bad.example", &format!("{DNS_LINK_PREFIX}nope"));
        let resolver = resolver(dns);
        let err = resolver
            .resolve("hyper://bad.example/", None)
            .await
            .unwrap_err();
        match err {
            ResolveError::MalformedKey { domain, value, .. } => {
                assert_eq!(domain, "bad.example");
                assert_eq!(value, "nope");
            }
            err => panic!("unexpected error {err:?}"),
        }
    }
}
