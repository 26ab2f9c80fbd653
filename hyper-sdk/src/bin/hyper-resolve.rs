use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use hyper_sdk::{
    SdkConfig, TopicId,
    dns::{DnsEndpoint, DnsLinkResolver, DnsOptions, HickoryTransport},
    resolve::{IdentifierResolver, ResolvedTarget},
    to_url,
};
use n0_snafu::Result;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Resolve hyper identifiers, URLs and DNS-link domains.
#[derive(Parser, Debug)]
#[clap(version, about)]
struct Cli {
    /// Path to config file
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Query the system name servers instead of DNS-over-HTTPS.
    #[clap(long)]
    system_dns: bool,
    /// DNS query timeout, in seconds.
    #[clap(long)]
    timeout_secs: Option<u64>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a key, a hyper:// URL or a name.
    Key {
        /// The identifier to resolve.
        identifier: String,
    },
    /// Print the discovery topic a name is joined as.
    Topic {
        /// The name.
        name: String,
    },
    /// Print the encoded key a domain's DNS-link record points to.
    Dnslink {
        /// The domain.
        domain: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Cli::parse();

    let config = if let Some(path) = args.config {
        debug!("loading config from {:?}", path);
        SdkConfig::load(path).await?
    } else {
        debug!("using default config");
        SdkConfig::default()
    };
    let overrides = DnsOptions {
        endpoints: args.system_dns.then(|| vec![DnsEndpoint::System]),
        timeout: args.timeout_secs.map(Duration::from_secs),
        attempts: None,
    };
    let dnslink = DnsLinkResolver::new(Arc::new(HickoryTransport::new()))
        .with_prefix(config.dns_link_prefix)
        .with_defaults(config.dns_opts);

    match args.command {
        Command::Key { identifier } => {
            let resolver = IdentifierResolver::new(dnslink);
            match resolver.resolve(identifier, Some(&overrides)).await? {
                ResolvedTarget::Key(key) => {
                    println!("key: {key}");
                    println!("hex: {}", key.to_hex());
                    println!("url: {}", to_url(&key));
                }
                ResolvedTarget::Name(name) => {
                    println!("name: {name}");
                    println!("topic: {}", TopicId::from_name(&name));
                }
            }
        }
        Command::Topic { name } => {
            println!("{}", TopicId::from_name(&name));
        }
        Command::Dnslink { domain } => {
            println!("{}", dnslink.resolve(&domain, Some(&overrides)).await?);
        }
    }
    Ok(())
}
