//! # Tileworld Server
//!
//! Dedicated server binary: loads the configuration, opens the world and
//! serves clients until interrupted.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tileworld_common::FormatVersion;
use tileworld_net::{EventBus, MemoryCredentialStore, Server, ServerEvent};
use tileworld_world::{BiomeRegistry, DiskFileStore, World, WorldOptions};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{ServerFileConfig, CONFIG_FILE};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Listen address
    #[arg(long)]
    host: Option<String>,

    /// TCP port
    #[arg(long)]
    port: Option<u16>,

    /// World name
    #[arg(long)]
    world: Option<String>,

    /// Seed for a new world
    #[arg(long)]
    seed: Option<u64>,

    /// Save directory
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    write_config: bool,

    /// Print the biome table as RON and exit
    #[arg(long)]
    dump_biomes: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn apply(&self, config: &mut ServerFileConfig) {
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.tcp_port = port;
        }
        if let Some(world) = &self.world {
            config.world.name.clone_from(world);
        }
        if let Some(seed) = self.seed {
            config.world.seed = Some(seed);
        }
        if let Some(dir) = &self.save_dir {
            config.world.save_dir.clone_from(dir);
        }
    }
}

fn init_tracing(json: bool) -> Result<()> {
    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .with(EnvFilter::from_default_env().add_directive("tileworld=info".parse()?))
        .init();
    Ok(())
}

fn load_biomes(config: &ServerFileConfig) -> Result<BiomeRegistry> {
    match &config.world.biomes {
        Some(path) => BiomeRegistry::load(path)
            .with_context(|| format!("loading biomes from {}", path.display())),
        None => Ok(BiomeRegistry::default()),
    }
}

/// Main entry point.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs)?;

    info!("Tileworld server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("World format: {}", FormatVersion::CURRENT);

    let mut config = ServerFileConfig::load_from(&args.config);
    args.apply(&mut config);
    config.validate();

    if args.write_config {
        config.save_to(&args.config)?;
        return Ok(());
    }

    let biomes = load_biomes(&config)?;
    if args.dump_biomes {
        println!("{}", biomes.to_ron_string()?);
        return Ok(());
    }

    let seed = config.world.seed.unwrap_or_else(|| fastrand::u64(..));
    let store = Arc::new(DiskFileStore::new(config.world.save_dir.clone()));
    let world = World::open_or_create(
        store,
        &config.world.name,
        WorldOptions {
            seed,
            min_spacing: config.world.min_spacing,
            biomes: Arc::new(biomes),
        },
    )
    .with_context(|| format!("opening world '{}'", config.world.name))?;

    let credentials = Arc::new(MemoryCredentialStore::with_users(
        config
            .accounts
            .iter()
            .map(|a| (a.username.clone(), a.password.clone())),
    ));
    info!("{} accounts registered", credentials.len());

    let events = Arc::new(EventBus::default());
    let feed = events.subscribe();
    std::thread::Builder::new()
        .name("server-events".into())
        .spawn(move || {
            for event in feed.iter() {
                match event {
                    ServerEvent::PlayerJoined {
                        username,
                        connection,
                    } => info!("{} joined on {}", username, connection),
                    ServerEvent::PlayerLeft {
                        username,
                        connection,
                    } => info!("{} left {}", username, connection),
                }
            }
        })?;

    let server = Server::bind(config.server.clone(), world, credentials, events).await?;
    info!("Serving on {}", server.local_addr()?);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Tileworld server shutdown complete");
    Ok(())
}
