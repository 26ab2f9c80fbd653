//! Binding domains to keys with DNS-link records.
//!
//! A domain points to a key by publishing a TXT record at `_dnslink.<domain>`:
//!
//! ```text
//! _dnslink.example.com.  300  IN  TXT  "dnslink=/hyper/<z32-key>"
//! ```
//!
//! Answers are inspected in the order the transport delivers them and the first one whose
//! first character string starts with the configured prefix wins. Lookups are never cached.

use std::sync::Arc;

use nested_enum_utils::common_fields;
use snafu::{Backtrace, ResultExt, Snafu};
use tracing::{debug, instrument};

use super::{DnsError, DnsOptions, DnsTransport};
use crate::{
    defaults::{DNS_LINK_LABEL, DNS_LINK_PREFIX},
    metrics::Metrics,
};

/// Errors resolving a DNS-link record.
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum DnsLinkError {
    #[snafu(display(
        "DNS-link record not found for TXT {name}\n\
         Please add a TXT record at {name} with the value {prefix}<KEY>"
    ))]
    NotFound { name: String, prefix: String },
    #[snafu(display("DNS-link lookup of {name} failed"))]
    Query { name: String, source: DnsError },
}

/// Returns the name holding the DNS-link record of `domain`.
pub fn dnslink_name(domain: &str) -> String {
    format!("{DNS_LINK_LABEL}.{}", domain.trim_end_matches('.'))
}

/// Resolves domains to encoded keys.
#[derive(Debug, Clone)]
pub struct DnsLinkResolver {
    transport: Arc<dyn DnsTransport>,
    prefix: String,
    defaults: DnsOptions,
    metrics: Arc<Metrics>,
}

impl DnsLinkResolver {
    /// Creates a resolver with the default prefix, `dnslink=/hyper/`.
    pub fn new(transport: Arc<dyn DnsTransport>) -> Self {
        Self {
            transport,
            prefix: DNS_LINK_PREFIX.to_string(),
            defaults: DnsOptions::default(),
            metrics: Default::default(),
        }
    }

    /// Sets the prefix a TXT value must start with.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the query options used when a lookup passes no overrides.
    pub fn with_defaults(mut self, defaults: DnsOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub(crate) fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the prefix a TXT value must start with.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Looks up the encoded key `domain` points to.
    ///
    /// The returned string is whatever follows the prefix. It is not validated.
    #[instrument(skip(self, overrides), err)]
    pub async fn resolve(
        &self,
        domain: &str,
        overrides: Option<&DnsOptions>,
    ) -> Result<String, DnsLinkError> {
        self.metrics.dnslink_lookups.inc();
        let name = dnslink_name(domain);
        let options = match overrides {
            Some(overrides) => self.defaults.merge(overrides),
            None => self.defaults.clone(),
        };
        let answers = self
            .transport
            .query_txt(name.clone(), options)
            .await
            .with_context(|_| QuerySnafu { name: name.clone() })
            .inspect_err(|_| {
                self.metrics.dnslink_failures.inc();
            })?;

        for answer in &answers {
            let Some(segment) = answer.first_segment().filter(|s| !s.is_empty()) else {
                continue;
            };
            let Ok(text) = std::str::from_utf8(segment) else {
                continue;
            };
            if let Some(key) = text.strip_prefix(self.prefix.as_str()) {
                debug!(%name, "found DNS-link record");
                return Ok(key.to_string());
            }
        }

        self.metrics.dnslink_failures.inc();
        Err(NotFoundSnafu {
            name,
            prefix: self.prefix.clone(),
        }
        .build())
    }
}
