//! BitChat CLI entry point

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use bitchat_ble::{Advertisement, BtleRadio, RadioTransport, SimulatedRadio};
use bitchat_cli::{
    app::App, cli::Cli, commands::CommandDispatcher, config::AppConfig, error::Result,
};
use bitchat_core::PeerId;
use bitchat_store::{FileStore, KeyValueStore};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    setup_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("Command execution failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref())?;

    // Override data directory if specified
    if let Some(data_dir) = &cli.data_dir {
        config.store.data_dir = Some(data_dir.clone());
    }

    let data_dir = config.store.resolved_data_dir()?;
    debug!("Using data directory {}", data_dir.display());
    let kv = FileStore::open(data_dir).await?;

    if cli.simulated {
        info!("Using simulated radio");
        execute(&cli, App::new(config, demo_radio(), kv)).await
    } else {
        execute(&cli, App::new(config, BtleRadio::new(), kv)).await
    }
}

async fn execute<R: RadioTransport, S: KeyValueStore>(cli: &Cli, app: App<R, S>) -> Result<()> {
    let result = CommandDispatcher::execute(&cli.command, &app).await;
    if cli.command.uses_radio() {
        app.shutdown().await;
    }
    result
}

/// Radio with two BitChat neighbours in range
fn demo_radio() -> SimulatedRadio {
    let radio = SimulatedRadio::new();
    for (id, name, rssi) in [("SIM-01", "BitChat-alice", -52), ("SIM-02", "BitChat-bob", -71)] {
        radio.add_neighbour(Advertisement {
            id: PeerId::from(id),
            name: Some(name.to_string()),
            rssi: Some(rssi),
        });
    }
    radio
}

/// Setup logging based on verbosity level, `RUST_LOG` wins when set
fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
