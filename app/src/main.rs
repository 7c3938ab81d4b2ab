#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

mod command;

use clap::{Parser, Subcommand};
use convctx_config::Config;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use command::{
    CommandStrategy, InfoStrategy, InitStrategy, SimulateInput, SimulateStrategy, VersionStrategy,
};

#[derive(Parser)]
#[command(name = "convctx")]
#[command(about = "Conversation context lifecycle manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration
    Init,
    /// Show effective configuration
    Info,
    /// Show version
    Version,
    /// Run concurrent requests against one long-running conversation
    Simulate {
        /// Number of concurrent requests
        #[arg(short = 'n', long, default_value_t = 8)]
        requests: usize,

        /// How long each request holds the conversation, in milliseconds
        #[arg(long, default_value_t = 50)]
        hold_ms: u64,
    },
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_default()?;
    init_tracing(&config.logging.level)?;

    match cli.command {
        Commands::Init => InitStrategy.execute(()).await,
        Commands::Info => InfoStrategy.execute(config).await,
        Commands::Version => VersionStrategy.execute(()).await,
        Commands::Simulate { requests, hold_ms } => {
            SimulateStrategy
                .execute(SimulateInput {
                    settings: config.conversation,
                    requests,
                    hold_ms,
                })
                .await
        }
    }
}
