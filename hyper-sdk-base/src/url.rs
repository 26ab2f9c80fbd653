//! `hyper://` URLs.
//!
//! A hyper URL has the fixed form `hyper://<host>/`, where the host is either an encoded
//! [`Key`] or a domain publishing a DNS-link record. Telling these apart needs DNS, so this
//! module only deals with the syntax.

use std::{fmt, str::FromStr};

use nested_enum_utils::common_fields;
use snafu::{Backtrace, ResultExt, Snafu, ensure};
use ::url::Url;

use crate::key::Key;

/// The URL scheme of hyper URLs.
pub const URL_SCHEME: &str = "hyper";

/// The prefix every hyper URL starts with.
pub const URL_PREFIX: &str = "hyper://";

/// Returns the canonical URL of a key, `hyper://<z32-key>/`.
pub fn to_url(key: &Key) -> String {
    format!("{URL_PREFIX}{}/", key.to_z32())
}

/// Error parsing a [`HyperUrl`].
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum UrlError {
    #[snafu(display("invalid URL"))]
    Parse { source: ::url::ParseError },
    #[snafu(display("expected scheme `{URL_SCHEME}`, got `{scheme}`"))]
    WrongScheme { scheme: String },
    #[snafu(display("URL has no host"))]
    MissingHost {},
}

/// A parsed `hyper://` URL.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HyperUrl(Url);

impl HyperUrl {
    /// Parses a hyper URL.
    pub fn parse(input: &str) -> Result<Self, UrlError> {
        let url = Url::parse(input).context(ParseSnafu)?;
        ensure!(
            url.scheme() == URL_SCHEME,
            WrongSchemeSnafu {
                scheme: url.scheme()
            }
        );
        ensure!(
            url.host_str().is_some_and(|host| !host.is_empty()),
            MissingHostSnafu
        );
        Ok(Self(url))
    }

    /// Creates the canonical URL for a key.
    pub fn from_key(key: &Key) -> Self {
        Self(Url::parse(&to_url(key)).expect("z32 is a valid host"))
    }

    /// Returns the host, either an encoded key or a domain.
    pub fn host(&self) -> &str {
        self.0.host_str().expect("checked on parse")
    }

    /// Returns `true` if the host looks like a domain name, i.e. contains a period.
    pub fn has_domain_host(&self) -> bool {
        self.host().contains('.')
    }

    /// Returns the path of the URL.
    pub fn path(&self) -> &str {
        self.0.path()
    }

    /// Returns the underlying [`Url`].
    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for HyperUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for HyperUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HyperUrl({})", self.0)
    }
}

impl FromStr for HyperUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<HyperUrl> for Url {
    fn from(value: HyperUrl) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_url() {
        let key = Key::from_bytes([1u8; 32]);
        let url = to_url(&key);
        assert_eq!(url, format!("hyper://{}/", key.to_z32()));
        assert_eq!(HyperUrl::from_key(&key).to_string(), url);

        let parsed = HyperUrl::parse(&url).unwrap();
        assert_eq!(parsed.host(), key.to_z32());
        assert!(!parsed.has_domain_host());
        assert_eq!(parsed.path(), "/");
    }

    #[test]
    fn domain_host() {
        let url = HyperUrl::parse("hyper://example.com/").unwrap();
        assert_eq!(url.host(), "example.com");
        assert!(url.has_domain_host());
    }

    #[test]
    fn rejects() {
        assert!(matches!(
            HyperUrl::parse("https://example.com/"),
            Err(UrlError::WrongScheme { .. })
        ));
        assert!(matches!(
            HyperUrl::parse("not a url"),
            Err(UrlError::Parse { .. })
        ));
        assert!(matches!(
            HyperUrl::parse("hyper:///path"),
            Err(UrlError::MissingHost { .. })
        ));
    }
}
