//! Murmur CLI
//!
//! Runs one gossip member over UDP until interrupted.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod settings;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use murmur_core::{Health, Member, MemberId, Service};
use murmur_swim::{Server, ServerHandle, SwimConfig, UdpTransport};
use settings::{GroupValue, SeedPeer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "murmur")]
#[command(about = "Murmur - SWIM membership, gossip and leader election", long_about = None)]
struct Cli {
    /// Log filter, e.g. `murmur=debug`; RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "murmur=info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a member until interrupted
    Run(RunArgs),
    /// Print the effective engine configuration as JSON
    Config {
        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Member id; random if unset
    #[arg(long)]
    id: Option<String>,
    /// Address to bind both sockets on
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,
    /// Address other members reach this one at
    #[arg(long, default_value = "127.0.0.1")]
    advertise: String,
    /// Port for probe traffic
    #[arg(long, default_value_t = 9638)]
    swim_port: u16,
    /// Port for rumor traffic
    #[arg(long, default_value_t = 9639)]
    gossip_port: u16,
    /// Count toward election quorum even while unreachable
    #[arg(long)]
    persistent: bool,
    /// Seed peer as ID@HOST:SWIM_PORT:GOSSIP_PORT; repeatable
    #[arg(long = "peer")]
    peers: Vec<SeedPeer>,
    /// Advertise a service as GROUP=PORT; repeatable
    #[arg(long = "service")]
    services: Vec<GroupValue<u16>>,
    /// Stand for election as GROUP=SUITABILITY; repeatable
    #[arg(long = "elect")]
    elections: Vec<GroupValue<u64>>,
    /// Seed for probe ordering, overriding the config file
    #[arg(long)]
    seed: Option<u64>,
}

fn load(path: Option<&Path>) -> Result<SwimConfig> {
    Ok(match path {
        Some(path) => settings::load_config(path)?,
        None => SwimConfig::default(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&cli.log))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Config { config } => {
            let config = load(config.as_deref())?;
            config.validate()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = load(args.config.as_deref())?;
    if let Some(seed) = args.seed {
        config.rng_seed = Some(seed);
    }
    let id = match args.id {
        Some(raw) => MemberId::parse(raw)?,
        None => MemberId::generate(),
    };
    let local = Member::new(id.clone(), args.advertise.clone(), args.swim_port, args.gossip_port)
        .with_persistent(args.persistent);

    let transport = UdpTransport::bind(&args.bind, args.swim_port, args.gossip_port).await?;
    let handle = Server::new(local, config, Arc::new(transport))?.start();
    tokio::spawn(report_health(handle.clone()));

    for SeedPeer(peer) in args.peers {
        info!(peer = %peer.id, address = %peer.address, "Joining through seed peer");
        handle.insert_member(peer, Health::Alive).await;
    }
    for service in args.services {
        let advert = Service::new(id.clone(), service.group, args.advertise.clone(), service.value);
        handle.advertise_service(advert).await?;
    }
    for election in args.elections {
        if handle.start_election(&election.group, election.value).await.is_none() {
            warn!(group = %election.group, "Could not start election");
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, shutting down");
    let stats = handle.stats();
    handle.shutdown().await?;
    info!(
        probe_rounds = stats.probe_rounds,
        datagrams_sent = stats.datagrams_sent,
        datagrams_received = stats.datagrams_received,
        decode_errors = stats.decode_errors,
        "Final stats"
    );
    Ok(())
}

async fn report_health(handle: ServerHandle) {
    let mut events = handle.subscribe();
    loop {
        match events.recv().await {
            Ok(event) => info!(
                member = %event.member.id,
                incarnation = event.member.incarnation,
                previous = ?event.previous,
                health = %event.health,
                "Health changed"
            ),
            Err(RecvError::Lagged(missed)) => warn!(missed, "Health events dropped"),
            Err(RecvError::Closed) => break,
        }
    }
}
