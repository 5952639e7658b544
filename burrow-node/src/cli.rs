use clap::{Args, Parser, Subcommand};

use burrow_core::shutdown::Shutdown;

use crate::config::{NodeConfig, Side, DEFAULT_CONFIG_PATH};
use crate::error::NodeError;

#[derive(Parser)]
#[command(
    name = "burrow",
    about = "HTTP(S) and SOCKS5 proxies tunneled over a libp2p overlay",
    version
)]
pub struct Cli {
    /// Path to config file, created with defaults if missing
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,
    /// Log filter directive; overrides the config file, RUST_LOG overrides both
    #[arg(long, global = true)]
    pub log_level: Option<String>,
    /// Do not print the startup banner
    #[arg(long, global = true)]
    pub no_banner: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a default config file with a fresh identity
    Init,
    /// Run locally: accept proxy clients and route them to proxy peers
    Endpoint {
        #[command(flatten)]
        overlay: OverlayArgs,
        /// Local HTTP(S) proxy listen address (e.g. "127.0.0.1:8010")
        #[arg(long)]
        http: Option<String>,
        /// Local SOCKS5 listen address (e.g. "127.0.0.1:8020")
        #[arg(long)]
        socks5: Option<String>,
    },
    /// Run a proxy peer: serve tunneled protocols and advertise them
    Proxy {
        #[command(flatten)]
        overlay: OverlayArgs,
        /// P2P listen multiaddr, replaces the configured ones (repeatable)
        #[arg(long = "listen")]
        listen_addrs: Vec<String>,
    },
}

#[derive(Args)]
pub struct OverlayArgs {
    /// Boot node multiaddr to connect to (can be specified multiple times)
    #[arg(long = "boot-node")]
    pub boot_nodes: Vec<String>,
    /// Discover peers on the local network
    #[arg(long)]
    pub mdns: bool,
}

impl OverlayArgs {
    fn apply(self, config: &mut NodeConfig) {
        config.p2p.boot_nodes.extend(self.boot_nodes);
        if self.mdns {
            config.p2p.enable_mdns = true;
        }
    }
}

pub async fn run(cli: Cli) -> Result<(), NodeError> {
    let Cli {
        config: config_path,
        log_level,
        no_banner,
        command,
    } = cli;

    let (side, mut config) = match command {
        Command::Init => {
            crate::logging::init(log_level.as_deref().unwrap_or("info"));
            NodeConfig::init(&config_path)?;
            tracing::info!("Configuration written to {}", config_path);
            return Ok(());
        }
        Command::Endpoint {
            overlay,
            http,
            socks5,
        } => {
            let mut config = NodeConfig::load_or_init(&config_path)?;
            overlay.apply(&mut config);
            if let Some(addr) = http {
                config.set_endpoint_listen(burrow_protocols::HTTP, addr);
            }
            if let Some(addr) = socks5 {
                config.set_endpoint_listen(burrow_protocols::SOCKS5, addr);
            }
            (Side::Endpoint, config)
        }
        Command::Proxy {
            overlay,
            listen_addrs,
        } => {
            let mut config = NodeConfig::load_or_init(&config_path)?;
            overlay.apply(&mut config);
            if !listen_addrs.is_empty() {
                config.p2p.listen_addrs = listen_addrs;
            }
            (Side::Proxy, config)
        }
    };

    if let Some(level) = log_level {
        config.logging.level = level;
    }
    crate::logging::init(&config.logging.level);
    config.validate(side)?;
    tracing::debug!(path = %config_path, "using config file");

    if !no_banner {
        crate::banner::print_banner();
        crate::banner::print_summary(side, &config);
    }

    let shutdown = Shutdown::new();
    crate::signal::install(shutdown.clone())?;
    match side {
        Side::Endpoint => crate::endpoint::run(config, shutdown).await,
        Side::Proxy => crate::proxy::run(config, shutdown).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint_overrides() {
        let cli = Cli::try_parse_from([
            "burrow",
            "endpoint",
            "--socks5",
            "127.0.0.1:1080",
            "--boot-node",
            "/ip4/10.0.0.1/tcp/8888",
            "--boot-node",
            "/ip4/10.0.0.2/tcp/8888",
            "-c",
            "custom.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, "custom.toml");
        match cli.command {
            Command::Endpoint {
                overlay,
                http,
                socks5,
            } => {
                assert_eq!(overlay.boot_nodes.len(), 2);
                assert!(http.is_none());
                assert_eq!(socks5.as_deref(), Some("127.0.0.1:1080"));
            }
            _ => panic!("expected endpoint command"),
        }
    }

    #[test]
    fn test_parse_proxy_listen() {
        let cli = Cli::try_parse_from([
            "burrow",
            "--no-banner",
            "proxy",
            "--listen",
            "/ip4/0.0.0.0/tcp/9000",
            "--mdns",
        ])
        .unwrap();
        assert!(cli.no_banner);
        assert_eq!(cli.config, DEFAULT_CONFIG_PATH);
        match cli.command {
            Command::Proxy {
                overlay,
                listen_addrs,
            } => {
                assert!(overlay.mdns);
                assert_eq!(listen_addrs, vec!["/ip4/0.0.0.0/tcp/9000"]);
            }
            _ => panic!("expected proxy command"),
        }
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["burrow"]).is_err());
    }

    #[test]
    fn test_overlay_args_apply() {
        let mut config = NodeConfig::default();
        OverlayArgs {
            boot_nodes: vec!["/ip4/10.0.0.1/tcp/8888".to_string()],
            mdns: true,
        }
        .apply(&mut config);
        assert_eq!(config.p2p.boot_nodes.len(), 1);
        assert!(config.p2p.enable_mdns);
    }

    #[tokio::test]
    async fn test_init_command_writes_config() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("burrow.toml");
        let path = path.to_str().unwrap();
        let cli = Cli::try_parse_from(["burrow", "--config", path, "init"]).unwrap();
        run(cli).await.unwrap();
        assert!(NodeConfig::load(path).unwrap().keypair_seed().unwrap().is_some());

        let again = Cli::try_parse_from(["burrow", "--config", path, "init"]).unwrap();
        assert!(run(again).await.is_err());
    }
}
