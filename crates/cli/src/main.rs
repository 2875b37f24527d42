//! SpoolSync CLI: the main entry point.
//!
//! Commands:
//! - `init`: Write a default config file
//! - `status`: Show config and what the backend currently reports
//! - `slots`: List every addressable tray slot
//! - `assign`: Assign the scanned spool to a slot via the backend
//! - `simulate`: Run a full session against an in-memory printer

use clap::{Parser, Subcommand};
use spoolsync_core::SlotAddress;

mod commands;

#[derive(Parser)]
#[command(
    name = "spoolsync",
    about = "SpoolSync — assign scanned filament spools to AMS tray slots",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file to ~/.spoolsync/config.toml
    Init,

    /// Show configuration and backend status
    Status,

    /// List addressable tray slots with their reading-mask bits
    Slots,

    /// Assign the currently scanned spool to a tray slot
    Assign {
        /// Target slot, e.g. A1, D4, HT-A, EXT-L
        #[arg(short, long)]
        slot: SlotAddress,
    },

    /// Run an assignment session against a simulated printer
    Simulate {
        /// Target slot, e.g. A3
        #[arg(short, long, default_value = "A3")]
        slot: SlotAddress,

        /// How the simulated printer answers the assign call
        #[arg(short, long, value_enum, default_value_t = commands::simulate::Outcome::Staged)]
        outcome: commands::simulate::Outcome,

        /// Make the staged assignment fail once the spool is inserted
        #[arg(long)]
        fail: bool,

        /// Milliseconds before the simulated spool is inserted
        #[arg(long, default_value_t = 1500)]
        insert_after_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Init => commands::init::run().await?,
        Commands::Status => commands::status::run().await?,
        Commands::Slots => commands::slots::run().await?,
        Commands::Assign { slot } => commands::assign::run(slot).await?,
        Commands::Simulate {
            slot,
            outcome,
            fail,
            insert_after_ms,
        } => commands::simulate::run(slot, outcome, fail, insert_after_ms).await?,
    }

    Ok(())
}
