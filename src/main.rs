//! Bhumi Station daemon
//!
//! Listens for robots, optionally explores autonomously, and offers an
//! operator console on stdin. Stops on `exit` at the console or Ctrl-C.

use bhumi_station::console::run_console;
use bhumi_station::{Result, Station, StationConfig, StationError};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = "bhumi.toml";

#[derive(Parser, Debug)]
#[command(name = "bhumi-station", version, about = "Ground station for grid-exploration robots")]
struct Args {
    /// Configuration file (default: bhumi.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the configuration
    #[arg(short, long)]
    bind: Option<String>,

    /// Explore autonomously as soon as a robot connects
    #[arg(short, long)]
    autonomous: bool,

    /// Run without the stdin console
    #[arg(long)]
    no_console: bool,
}

fn load_config(args: &Args) -> Result<StationConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            StationConfig::load(path)?
        }
        None if Path::new(DEFAULT_CONFIG).exists() => {
            info!("Loading configuration from {}", DEFAULT_CONFIG);
            StationConfig::load(Path::new(DEFAULT_CONFIG))?
        }
        None => {
            info!("Using default configuration");
            StationConfig::default()
        }
    };

    if let Some(bind) = &args.bind {
        config.network.bind_address = bind.clone();
    }
    if args.autonomous {
        config.planner.autonomous_on_connect = true;
    }
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bhumi_station=info".parse().expect("valid directive")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    info!("Bhumi Station v{}", env!("CARGO_PKG_VERSION"));

    let station = match Station::start(config) {
        Ok(station) => station,
        Err(e) => {
            tracing::error!("{}", e);
            return Err(e);
        }
    };

    let station = Arc::new(station);
    let running = station.running_flag();
    let ctrlc_flag = station.running_flag();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        ctrlc_flag.store(false, Ordering::Relaxed);
    })
    .map_err(|e| StationError::Config(format!("signal handler: {}", e)))?;

    // The console blocks on stdin, so it runs on its own thread and the main
    // thread watches the running flag.
    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
    if !args.no_console {
        let console_station = Arc::clone(&station);
        thread::Builder::new()
            .name("console".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                if let Err(e) = run_console(&console_station, stdin.lock(), std::io::stdout()) {
                    warn!("Console stopped: {}", e);
                }
                let _ = done_tx.send(());
            })?;
    }

    while running.load(Ordering::Relaxed) && done_rx.is_empty() {
        thread::sleep(Duration::from_millis(200));
    }

    station.shutdown()?;
    info!("{}", station.exploration_stats());
    Ok(())
}
