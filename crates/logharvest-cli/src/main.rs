use anyhow::Result;
use clap::Parser;
use logharvest_agent::Harvester;
use logharvest_core::{Config, HarvestError};
use logharvest_transport::WsConnector;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

const EXIT_FAILURE: i32 = 1;
/// Exit status when the collector already knows a node with our name
const EXIT_NODE_ALREADY_EXISTS: i32 = 2;

/// logharvest - ship local and remote log files to a central collector
#[derive(Parser, Debug)]
#[command(name = "logharvest")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node name (overrides general.instance_name)
    #[arg(short, long)]
    name: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print a sample configuration and exit
    #[arg(long)]
    print_config: bool,
}

/// Process exit status for a harvester that stopped with `err`
fn exit_code(err: &HarvestError) -> i32 {
    match err {
        HarvestError::NodeAlreadyExists { .. } => EXIT_NODE_ALREADY_EXISTS,
        _ => EXIT_FAILURE,
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        println!("{}", Config::sample().to_toml()?);
        return Ok(());
    }

    let mut config = if let Some(ref config_path) = args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };
    if let Some(name) = args.name {
        config.general.instance_name = name;
    }

    // CLI --verbose overrides the configured level
    let level = if args.verbose {
        Level::DEBUG
    } else {
        parse_level(&config.general.log_level)
    };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let server = config.validate()?;
    let url = server.url();
    info!(node = %config.general.instance_name, collector = %url, "Starting logharvest");

    let mut harvester = Harvester::new(&config, Arc::new(WsConnector::new(url)))?;

    let outcome = tokio::select! {
        result = harvester.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };

    match outcome {
        Ok(()) => {
            info!(messages_sent = harvester.messages_sent(), "Stopped");
            Ok(())
        }
        Err(e) => {
            if let HarvestError::NodeAlreadyExists { ref node } = e {
                error!(node = %node, "A node with this name already exists on the collector");
                error!("Pick a unique instance_name (or --name) for every node");
            } else {
                error!(error = %e, "Harvester stopped");
            }
            std::process::exit(exit_code(&e));
        }
    }
}
