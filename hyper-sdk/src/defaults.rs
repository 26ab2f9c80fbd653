//! Default values used in hyper-sdk.

use std::time::Duration;

/// The prefix of a DNS-link TXT value pointing to a hyper key.
///
/// A domain publishes `dnslink=/hyper/<key>` in a TXT record at `_dnslink.<domain>`.
pub const DNS_LINK_PREFIX: &str = "dnslink=/hyper/";

/// The label prepended to a domain to find its DNS-link TXT record.
pub const DNS_LINK_LABEL: &str = "_dnslink";

/// The storage name used when none is configured.
pub const DEFAULT_STORAGE_NAME: &str = "hyper-sdk";

/// Environment variable overriding the directory named storages are placed in.
pub const DATA_DIR_ENV: &str = "HYPER_SDK_DATA_DIR";

/// How long a single DNS query may take before it is abandoned.
pub const DNS_TIMEOUT: Duration = Duration::from_secs(5);

/// How many times a DNS query is attempted per name server.
pub const DNS_ATTEMPTS: usize = 2;
