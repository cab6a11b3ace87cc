//! Microwork CLI
//!
//! Operator tools for the Microwork platform.
//!
//! # Commands
//!
//! - `id compose` - Build a global ID from a box ID and a local sequence
//! - `id decode` - Split a global ID into its box and local parts
//! - `policy validate` - Check a policy name and its JSON parameters

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Microwork command-line operator tools.
#[derive(Parser)]
#[command(name = "microwork")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Global ID tools
    #[command(subcommand)]
    Id(IdCommands),

    /// Verification policy tools
    #[command(subcommand)]
    Policy(PolicyCommands),

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum IdCommands {
    /// Build a global ID from a box ID and a local sequence number
    Compose {
        /// Minting box ID; 0 is the center's reserved namespace
        #[arg(short, long, default_value = "0")]
        box_id: u16,

        /// Local sequence number (48-bit)
        #[arg(short, long)]
        local_id: u64,
    },

    /// Split a global ID into its box and local parts
    Decode {
        /// The raw 64-bit global ID
        value: u64,
    },
}

#[derive(Subcommand)]
enum PolicyCommands {
    /// Check a policy name and its JSON parameters
    Validate {
        /// Policy name (N_TOTAL, N_UNIQUE, N_MATCHING)
        #[arg(short, long)]
        policy: String,

        /// Policy parameters as JSON, e.g. '{"n": 3}'
        #[arg(long, default_value = "{}")]
        params: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Id(IdCommands::Compose { box_id, local_id }) => {
            commands::id::compose(box_id, local_id)?;
        }
        Commands::Id(IdCommands::Decode { value }) => {
            commands::id::decode(value);
        }
        Commands::Policy(PolicyCommands::Validate { policy, params }) => {
            commands::policy::validate(&policy, &params)?;
        }
        Commands::Version => {
            println!("Microwork CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
