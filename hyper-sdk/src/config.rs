//! Configuration for the SDK
//!
//! The config is usually loaded from a TOML file with [`SdkConfig::load`]:
//!
//! ```toml
//! storage = "my-app"
//! auto_join = true
//! flush_timeout = "30s"
//!
//! [join_opts]
//! server = false
//!
//! [dns_opts]
//! endpoints = ["quad9"]
//! ```

use std::{
    env, fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use nested_enum_utils::common_fields;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};

use crate::{
    defaults::{DATA_DIR_ENV, DEFAULT_STORAGE_NAME, DNS_LINK_PREFIX},
    dns::DnsOptions,
    net::JoinOptions,
    storage::{CoreOptions, StorageLocation},
};

/// Configuration errors
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("failed to read {}", path.display()))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to parse {}", path.display()))]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[snafu(display("operating environment provides no directory for application data"))]
    NoDataDir {},
}

/// Where the SDK keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// A storage of this name, inside [`SdkConfig::data_dir`].
    Named(String),
    /// A storage in this directory.
    Path(PathBuf),
    /// Keep everything in memory. Written as `false`.
    Ephemeral,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Named(DEFAULT_STORAGE_NAME.to_string())
    }
}

impl StorageConfig {
    /// Returns where the storage lives.
    ///
    /// A path starting with `~` is taken relative to the home directory.
    pub fn location(&self) -> Result<StorageLocation, ConfigError> {
        let location = match self {
            Self::Ephemeral => StorageLocation::Memory,
            Self::Path(path) => StorageLocation::Dir(expand_home(path)),
            Self::Named(name) => StorageLocation::Dir(SdkConfig::data_dir()?.join(name)),
        };
        Ok(location)
    }
}

/// Tells paths and storage names apart.
///
/// Anything with a path separator, or starting with `.` or `~`, is a path.
impl FromStr for StorageConfig {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let is_path = s.contains('/')
            || s.contains(std::path::MAIN_SEPARATOR)
            || s.starts_with('.')
            || s.starts_with('~');
        Ok(if is_path {
            Self::Path(PathBuf::from(s))
        } else {
            Self::Named(s.to_string())
        })
    }
}

impl From<&str> for StorageConfig {
    fn from(value: &str) -> Self {
        match value.parse() {
            Ok(config) => config,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Ephemeral => write!(f, "false"),
        }
    }
}

impl Serialize for StorageConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Ephemeral => serializer.serialize_bool(false),
            Self::Named(name) => serializer.serialize_str(name),
            Self::Path(path) => path.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for StorageConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Enabled(bool),
            Location(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Enabled(false) => Ok(Self::Ephemeral),
            Raw::Enabled(true) => Ok(Self::default()),
            Raw::Location(location) => Ok(location.as_str().into()),
        }
    }
}

/// SDK configuration
///
/// Every field has a default, an empty file is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SdkConfig {
    /// Where to keep data.
    pub storage: StorageConfig,
    /// Join the discovery key of every handle opened with [`Sdk::get`](crate::Sdk::get).
    pub auto_join: bool,
    /// Replicate over every peer connection.
    pub do_replicate: bool,
    /// The prefix of DNS-link TXT values.
    pub dns_link_prefix: String,
    /// Defaults for opening data structures.
    pub core_opts: CoreOptions,
    /// Defaults for joining topics.
    pub join_opts: JoinOptions,
    /// Defaults for DNS queries.
    pub dns_opts: DnsOptions,
    /// How long opening a remote handle waits for peers. Unbounded if unset.
    #[serde(with = "humantime_serde")]
    pub flush_timeout: Option<Duration>,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            auto_join: true,
            do_replicate: true,
            dns_link_prefix: DNS_LINK_PREFIX.to_string(),
            core_opts: CoreOptions::default(),
            join_opts: JoinOptions::default(),
            dns_opts: DnsOptions::default(),
            flush_timeout: None,
        }
    }
}

impl SdkConfig {
    /// Creates a config that keeps everything in memory.
    pub fn ephemeral() -> Self {
        Self {
            storage: StorageConfig::Ephemeral,
            ..Default::default()
        }
    }

    /// Loads a config from a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<SdkConfig, ConfigError> {
        let path = path.as_ref();
        let s = tokio::fs::read_to_string(path)
            .await
            .context(ReadSnafu { path })?;
        let config: SdkConfig = toml::from_str(&s).context(ParseSnafu { path })?;
        Ok(config)
    }

    /// Get the data directory.
    ///
    /// Named storages live here. Set `HYPER_SDK_DATA_DIR` to override.
    pub fn data_dir() -> Result<PathBuf, ConfigError> {
        let dir = if let Some(val) = env::var_os(DATA_DIR_ENV) {
            PathBuf::from(val)
        } else {
            let path = dirs_next::data_dir().context(NoDataDirSnafu)?;
            path.join(DEFAULT_STORAGE_NAME)
        };
        Ok(dir)
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs_next::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
