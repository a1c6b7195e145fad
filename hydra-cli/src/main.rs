//! HydraVPN CLI
//!
//! Thin launcher over the engine: `hydra server` terminates clients,
//! `hydra client` dials a server. Host provisioning (IP forwarding, NAT,
//! firewall) is expected to be in place before the server starts.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hydra_engine::{Client, ClientConfig, Server, ServerConfig};
use hydra_transport::TransportKind;

/// HydraVPN - a point-to-multipoint layer-3 VPN
#[derive(Parser)]
#[command(name = "hydra")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the VPN server
    Server {
        /// Bind address
        #[arg(long, default_value = hydra_engine::DEFAULT_LISTEN_ADDR)]
        listen: String,

        /// Transport: quic, websocket/ws, obfuscated/obfs
        #[arg(long, default_value = "websocket")]
        transport: String,

        /// Tunnel subnet to allocate client addresses from
        #[arg(long, default_value = hydra_engine::DEFAULT_TUNNEL_NETWORK)]
        tunnel_network: String,
    },

    /// Connect to a VPN server
    Client {
        /// Server address
        #[arg(long, default_value = hydra_engine::DEFAULT_SERVER_ADDR)]
        server: String,

        /// Transport: quic, websocket/ws, obfuscated/obfs
        #[arg(long, default_value = "websocket")]
        transport: String,

        /// Route all host traffic through the tunnel
        #[arg(long)]
        route_all: bool,

        /// Use public DNS resolvers while connected
        #[arg(long)]
        override_dns: bool,

        /// Do not redial after a dropped connection
        #[arg(long)]
        no_reconnect: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Server {
            listen,
            transport,
            tunnel_network,
        } => run_server(listen, transport, tunnel_network).await,
        Commands::Client {
            server,
            transport,
            route_all,
            override_dns,
            no_reconnect,
        } => run_client(server, transport, route_all, override_dns, no_reconnect).await,
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn parse_transport(value: &str) -> Result<TransportKind> {
    value
        .parse()
        .with_context(|| format!("invalid transport: {}", value))
}

async fn run_server(listen: String, transport: String, tunnel_network: String) -> Result<()> {
    let config = ServerConfig {
        listen,
        transport: parse_transport(&transport)?,
        tunnel_network,
        ..ServerConfig::default()
    };

    let mut server = Server::new(config).context("failed to create server")?;
    server.start().await.context("failed to start server")?;

    info!("server running, press Ctrl+C to stop");
    wait_for_shutdown().await;

    server.stop().await;
    Ok(())
}

async fn run_client(
    server: String,
    transport: String,
    route_all: bool,
    override_dns: bool,
    no_reconnect: bool,
) -> Result<()> {
    let config = ClientConfig {
        server,
        transport: parse_transport(&transport)?,
        route_all_traffic: route_all,
        override_dns,
        auto_reconnect: !no_reconnect,
        ..ClientConfig::default()
    };

    let mut client = Client::new(config);
    let shutdown = client.shutdown_handle();

    let mut runner = tokio::spawn(async move { client.run().await });

    // Run until the client gives up or the user interrupts
    tokio::select! {
        result = &mut runner => {
            return result.context("client task panicked")?.context("client failed");
        }
        _ = wait_for_shutdown() => {
            let _ = shutdown.send(());
        }
    }

    runner
        .await
        .context("client task panicked")?
        .context("client failed")?;
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .expect("failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C");
    }
}
