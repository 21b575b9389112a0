//! Command line launcher for the zingo-lightwalletd proxy.
//!
//! Without `--darkside-very-insecure` the server proxies a zcashd node. With
//! it, the node is replaced by a synthetic chain that tests drive through the
//! `DarksideStreamer` service.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Arg, ArgMatches, Command};

use zingo_lightwalletd::config::{
    DEFAULT_DARKSIDE_TIMEOUT, DEFAULT_GRPC_BIND_ADDR, DEFAULT_NODE_RPC_URI, DEFAULT_POLL_INTERVAL,
    LightwalletdConfig, NodeConfig,
};
use zingo_lightwalletd::server;

/// Command line definition.
pub fn build_clap_app() -> Command {
    Command::new("zingo-lightwalletd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Serves compact blocks to Zcash light wallets")
        .arg(Arg::new("grpc-bind-addr")
            .long("grpc-bind-addr")
            .value_name("ADDR")
            .help("Address the gRPC frontend listens on.")
            .value_parser(clap::value_parser!(SocketAddr))
            .default_value(DEFAULT_GRPC_BIND_ADDR))
        .arg(Arg::new("rpc-uri")
            .long("rpc-uri")
            .value_name("URI")
            .help("zcashd JSON-RPC endpoint.")
            .value_parser(parse_uri)
            .default_value(DEFAULT_NODE_RPC_URI))
        .arg(Arg::new("rpc-user")
            .long("rpc-user")
            .value_name("USER")
            .default_value(""))
        .arg(Arg::new("rpc-password")
            .long("rpc-password")
            .value_name("PASSWORD")
            .default_value(""))
        .arg(Arg::new("darkside-very-insecure")
            .long("darkside-very-insecure")
            .help("Replace the node with a synthetic chain controlled over gRPC. For tests only.")
            .action(clap::ArgAction::SetTrue))
        .arg(Arg::new("darkside-timeout")
            .long("darkside-timeout")
            .value_name("MINUTES")
            .help("Minutes until a darkside server shuts itself down.")
            .value_parser(clap::value_parser!(u64)))
        .arg(Arg::new("poll-interval")
            .long("poll-interval")
            .value_name("MILLISECONDS")
            .help("Idle interval of the block ingestor.")
            .value_parser(clap::value_parser!(u64)))
}

/// Custom function to parse a string into an `http::Uri`
fn parse_uri(s: &str) -> Result<http::Uri, String> {
    s.parse::<http::Uri>().map_err(|e| e.to_string())
}

/// Settings gathered from the command line.
#[derive(Debug)]
pub struct ConfigTemplate {
    grpc_bind_addr: SocketAddr,
    rpc_uri: http::Uri,
    rpc_user: String,
    rpc_password: String,
    darkside: bool,
    darkside_timeout: Duration,
    poll_interval: Duration,
}

impl ConfigTemplate {
    fn fill(matches: &ArgMatches) -> Result<Self, String> {
        let grpc_bind_addr = *matches
            .get_one::<SocketAddr>("grpc-bind-addr")
            .ok_or("missing gRPC bind address")?;
        let rpc_uri = matches
            .get_one::<http::Uri>("rpc-uri")
            .cloned()
            .ok_or("missing node RPC uri")?;
        let darkside = matches.get_flag("darkside-very-insecure");

        let darkside_timeout = matches
            .get_one::<u64>("darkside-timeout")
            .map_or(DEFAULT_DARKSIDE_TIMEOUT, |minutes| {
                Duration::from_secs(minutes * 60)
            });
        if darkside_timeout.is_zero() {
            return Err("darkside timeout must be at least one minute".to_string());
        }
        let poll_interval = matches
            .get_one::<u64>("poll-interval")
            .map_or(DEFAULT_POLL_INTERVAL, |millis| Duration::from_millis(*millis));

        Ok(Self {
            grpc_bind_addr,
            rpc_uri,
            rpc_user: matches.get_one::<String>("rpc-user").cloned().unwrap_or_default(),
            rpc_password: matches
                .get_one::<String>("rpc-password")
                .cloned()
                .unwrap_or_default(),
            darkside,
            darkside_timeout,
            poll_interval,
        })
    }

    fn into_config(self) -> LightwalletdConfig {
        LightwalletdConfig {
            grpc_bind_addr: self.grpc_bind_addr,
            node: NodeConfig {
                rpc_uri: self.rpc_uri,
                rpc_user: self.rpc_user,
                rpc_password: self.rpc_password,
            },
            darkside: self.darkside,
            darkside_timeout: self.darkside_timeout,
            poll_interval: self.poll_interval,
        }
    }
}

/// Parses the command line and serves until shutdown.
pub fn run_cli() -> Result<(), String> {
    let config = ConfigTemplate::fill(&build_clap_app().get_matches())?.into_config();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start runtime. {e}"))?;
    tracing::debug!("starting on {}, darkside {}", config.grpc_bind_addr, config.darkside);
    runtime
        .block_on(server::serve(config))
        .map_err(|e| e.to_string())
}
