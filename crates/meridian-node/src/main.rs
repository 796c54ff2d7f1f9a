//! Meridian Node -- operator CLI for the dynamics parameter store.
//!
//! Usage:
//!   meridian-node                             # Show active parameters
//!   meridian-node show --epoch 120            # Parameters in force at epoch 120
//!   meridian-node history                     # Every change point, tail to head
//!   meridian-node update maxBytes 12345 200   # Enact maxBytes=12345 from epoch 200
//!   meridian-node epoch 150                   # Advance the cursor to epoch 150

use meridian_node::config;
use meridian_node::{expand_tilde, init_tracing, open_storage, render_history, render_parameters};

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "meridian-node", about = "Meridian epoch-indexed protocol parameters")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.meridian/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the active parameter set (default)
    Show {
        /// Look up this epoch instead of the current one
        #[arg(long)]
        epoch: Option<u32>,
    },
    /// Print every change point from tail to head
    History,
    /// Enact a parameter change from an epoch onward
    Update {
        /// Parameter name, e.g. maxBytes or msgTimeout
        field: String,
        /// New value; durations in nanoseconds, fees in base units
        value: String,
        /// First epoch the change applies to
        epoch: u32,
    },
    /// Print the current epoch, or advance to a new one
    Epoch {
        epoch: Option<u32>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let cfg = config::NodeConfig::load_or_default(&config_path)?;

    init_tracing(cfg.node.log_filter.as_deref());

    let storage = open_storage(&cfg)?;

    match cli.command {
        Some(Commands::Show { epoch: Some(epoch) }) => {
            println!("{}", render_parameters(&storage.parameters_at(epoch)?)?);
        }
        Some(Commands::Show { epoch: None }) | None => {
            println!("{}", render_parameters(&storage.parameters())?);
        }
        Some(Commands::History) => {
            println!("{}", render_history(&storage)?);
        }
        Some(Commands::Update {
            field,
            value,
            epoch,
        }) => {
            storage.update_storage(&field, &value, epoch)?;
            println!("{}", render_parameters(&storage.parameters_at(epoch)?)?);
        }
        Some(Commands::Epoch { epoch: Some(epoch) }) => {
            storage.advance_to(epoch)?;
            println!("{epoch}");
        }
        Some(Commands::Epoch { epoch: None }) => {
            println!("{}", storage.current_epoch()?);
        }
    }

    Ok(())
}
