//! DNS TXT queries and DNS-link resolution.
//!
//! Queries go through a [`DnsTransport`]. The default transport, [`HickoryTransport`], talks
//! DNS-over-HTTPS to a set of public resolvers, so name lookups are not visible to whoever
//! runs the local network. Resolvers are only built on the first query, creating a transport
//! does no I/O.
//!
//! See the [`dnslink`] module for how TXT answers are turned into keys.

use std::{
    collections::HashMap,
    fmt::Debug,
    net::IpAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use hickory_resolver::{
    Resolver, TokioResolver,
    config::{NameServerConfigGroup, ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
};
use n0_future::{boxed::BoxFuture, time};
use nested_enum_utils::common_fields;
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, IntoError, ResultExt, Snafu};
use tracing::{debug, trace};

use crate::defaults::{DNS_ATTEMPTS, DNS_TIMEOUT};

pub mod dnslink;

pub use self::dnslink::{DnsLinkError, DnsLinkResolver};

/// One TXT record in an answer.
///
/// A TXT record holds one or more character strings, kept here in record order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxtAnswer {
    /// The character strings of the record.
    pub data: Vec<Bytes>,
}

impl TxtAnswer {
    /// Creates an answer from its character strings.
    pub fn new<I, B>(segments: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            data: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the first character string of the record, if any.
    pub fn first_segment(&self) -> Option<&[u8]> {
        self.data.first().map(|segment| segment.as_ref())
    }
}

impl From<&str> for TxtAnswer {
    fn from(value: &str) -> Self {
        Self::new([Bytes::copy_from_slice(value.as_bytes())])
    }
}

impl From<String> for TxtAnswer {
    fn from(value: String) -> Self {
        Self::new([Bytes::from(value)])
    }
}

/// A name server to send queries to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DnsEndpoint {
    /// The name servers configured in the operating system, queried in plain DNS.
    System,
    /// Cloudflare over HTTPS.
    Cloudflare,
    /// Google over HTTPS.
    Google,
    /// Quad9 over HTTPS.
    Quad9,
    /// A custom DNS-over-HTTPS server.
    Https {
        /// Addresses of the server.
        ips: Vec<IpAddr>,
        /// Port of the server, usually 443.
        port: u16,
        /// The TLS server name of the server.
        server_name: String,
    },
}

impl DnsEndpoint {
    /// The endpoints used when none are configured.
    pub fn defaults() -> Vec<Self> {
        vec![Self::Cloudflare, Self::Google]
    }
}

/// Options for DNS queries.
///
/// All fields are optional, unset fields fall back to the defaults in
/// [`defaults`](crate::defaults) or to the options they are [merged](Self::merge) over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DnsOptions {
    /// The name servers to ask.
    pub endpoints: Option<Vec<DnsEndpoint>>,
    /// Timeout for a whole query.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Attempts per name server.
    pub attempts: Option<usize>,
}

impl DnsOptions {
    /// Returns a copy of `self` with every field set in `overrides` replaced.
    pub fn merge(&self, overrides: &DnsOptions) -> DnsOptions {
        DnsOptions {
            endpoints: overrides
                .endpoints
                .clone()
                .or_else(|| self.endpoints.clone()),
            timeout: overrides.timeout.or(self.timeout),
            attempts: overrides.attempts.or(self.attempts),
        }
    }

    /// The endpoints to query.
    pub fn endpoints(&self) -> Vec<DnsEndpoint> {
        self.endpoints.clone().unwrap_or_else(DnsEndpoint::defaults)
    }

    /// The query timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DNS_TIMEOUT)
    }

    /// The attempts per name server.
    pub fn attempts(&self) -> usize {
        self.attempts.unwrap_or(DNS_ATTEMPTS)
    }
}

/// Errors from a DNS query.
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum DnsError {
    #[snafu(display("DNS lookup for {name} failed"))]
    Resolve {
        name: String,
        source: hickory_resolver::ResolveError,
    },
    #[snafu(display("DNS lookup for {name} timed out after {timeout:?}"))]
    Timeout { name: String, timeout: Duration },
    #[snafu(display("DNS transport '{provenance}' error"))]
    User {
        provenance: &'static str,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl DnsError {
    /// Creates a new user error from an arbitrary error type.
    pub fn from_err<T: std::error::Error + Send + Sync + 'static>(
        provenance: &'static str,
        source: T,
    ) -> Self {
        UserSnafu { provenance }.into_error(Box::new(source))
    }
}

/// Sends TXT queries.
///
/// An empty answer is not an error: a name without TXT records, or a name that does not
/// exist, yields an empty list.
pub trait DnsTransport: Debug + Send + Sync + 'static {
    /// Queries the TXT records of `name`.
    fn query_txt(
        &self,
        name: String,
        options: DnsOptions,
    ) -> BoxFuture<Result<Vec<TxtAnswer>, DnsError>>;
}

impl<T: DnsTransport> DnsTransport for Arc<T> {
    fn query_txt(
        &self,
        name: String,
        options: DnsOptions,
    ) -> BoxFuture<Result<Vec<TxtAnswer>, DnsError>> {
        self.as_ref().query_txt(name, options)
    }
}

/// The resolvers we already built, by the settings they were built with.
type ResolverCache = HashMap<(Vec<DnsEndpoint>, usize), TokioResolver>;

/// A [`DnsTransport`] using [`hickory_resolver`].
///
/// Clones share their resolvers.
#[derive(Debug, Clone, Default)]
pub struct HickoryTransport {
    resolvers: Arc<Mutex<ResolverCache>>,
}

impl HickoryTransport {
    /// Creates a new transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn resolver(&self, options: &DnsOptions) -> TokioResolver {
        let key = (options.endpoints(), options.attempts());
        let mut resolvers = self.resolvers.lock().expect("poisoned");
        resolvers
            .entry(key)
            .or_insert_with_key(|(endpoints, attempts)| build_resolver(endpoints, *attempts))
            .clone()
    }
}

impl DnsTransport for HickoryTransport {
    fn query_txt(
        &self,
        name: String,
        options: DnsOptions,
    ) -> BoxFuture<Result<Vec<TxtAnswer>, DnsError>> {
        let resolver = self.resolver(&options);
        let timeout = options.timeout();
        Box::pin(async move {
            // make the name fully qualified so search domains are never appended
            let fqdn = format!("{}.", name.trim_end_matches('.'));
            trace!(%fqdn, "TXT lookup");
            let lookup = time::timeout(timeout, resolver.txt_lookup(fqdn))
                .await
                .map_err(|_| {
                    TimeoutSnafu {
                        name: name.clone(),
                        timeout,
                    }
                    .build()
                })?;
            match lookup {
                Ok(lookup) => Ok(lookup
                    .iter()
                    .map(|txt| {
                        TxtAnswer::new(
                            txt.txt_data()
                                .iter()
                                .map(|segment| Bytes::copy_from_slice(segment)),
                        )
                    })
                    .collect()),
                Err(err) if err.is_no_records_found() || err.is_nx_domain() => {
                    debug!(%name, "no TXT records");
                    Ok(Vec::new())
                }
                Err(err) => Err(err).context(ResolveSnafu { name }),
            }
        })
    }
}

fn build_resolver(endpoints: &[DnsEndpoint], attempts: usize) -> TokioResolver {
    let mut config = ResolverConfig::new();
    let mut options = ResolverOpts::default();
    for endpoint in endpoints {
        let group = match endpoint {
            DnsEndpoint::System => {
                let (system_config, system_options) =
                    hickory_resolver::system_conf::read_system_conf().unwrap_or_default();
                options = system_options;
                system_config.name_servers().to_vec()
            }
            DnsEndpoint::Cloudflare => ResolverConfig::cloudflare_https().name_servers().to_vec(),
            DnsEndpoint::Google => ResolverConfig::google_https().name_servers().to_vec(),
            DnsEndpoint::Quad9 => ResolverConfig::quad9_https().name_servers().to_vec(),
            DnsEndpoint::Https {
                ips,
                port,
                server_name,
            } => NameServerConfigGroup::from_ips_https(ips, *port, server_name.clone(), true)
                .to_vec(),
        };
        for name_server in group {
            config.add_name_server(name_server);
        }
    }
    options.attempts = attempts;
    debug!(?endpoints, "building DNS resolver");
    Resolver::builder_with_config(config, TokioConnectionProvider::default())
        .with_options(options)
        .build()
}
