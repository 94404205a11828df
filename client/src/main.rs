use clap::Parser;
use client::network::{resolve_server_address, ClientOptions};
use log::info;
use shared::input::{spawn_console, ConsoleCommand};
use shared::{SimConfig, DEFAULT_TICK_RATE};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host address to connect to; empty uses the default target
    #[arg(short = 's', long)]
    server: Option<String>,

    /// Host port (overrides the config file)
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Fixed simulation rate in ticks per second
    #[arg(short = 't', long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,

    /// TOML file with tuning overrides
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };
    let port = args.port.unwrap_or(config.net.port);
    let entry = args
        .server
        .clone()
        .unwrap_or_else(|| config.net.client_target.clone());
    let server = resolve_server_address(&entry, port)?;

    info!("Starting client...");
    info!("Connecting to: {}", server);
    info!("{}", ConsoleCommand::help());

    let options = ClientOptions {
        server,
        tick_rate: args.tick_rate,
        config,
    };

    if !client::start_as_client(options, spawn_console()).await {
        std::process::exit(1);
    }
    Ok(())
}
