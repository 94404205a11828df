use clap::Parser;
use log::info;
use server::network::HostOptions;
use shared::input::{spawn_console, ConsoleCommand};
use shared::{SimConfig, DEFAULT_TICK_RATE};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the host socket to (overrides the config file)
    #[arg(short = 'b', long)]
    bind: Option<String>,

    /// Port to listen on (overrides the config file)
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Fixed simulation rate in ticks per second
    #[arg(short = 't', long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,

    /// Seed for the population's random source
    #[arg(long)]
    seed: Option<u64>,

    /// TOML file with tuning overrides
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Peers allowed at once (overrides the config file)
    #[arg(short = 'm', long)]
    max_peers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };
    if let Some(max_peers) = args.max_peers {
        config.net.max_remote_peers = max_peers;
    }
    let host = args.bind.as_deref().unwrap_or(config.net.host_bind.as_str());
    let port = args.port.unwrap_or(config.net.port);
    let bind: SocketAddr = format!("{}:{}", host, port).parse()?;

    info!("Starting host on {} at {} Hz", bind, args.tick_rate);
    if let Some(seed) = args.seed {
        info!("Population seed: {}", seed);
    }
    info!("{}", ConsoleCommand::help());

    let options = HostOptions {
        bind,
        tick_rate: args.tick_rate,
        seed: args.seed,
        config,
    };

    if !server::start_as_host(options, spawn_console()).await {
        std::process::exit(1);
    }
    Ok(())
}
