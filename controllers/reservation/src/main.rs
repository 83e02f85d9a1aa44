//! Reservation Controller
//!
//! Provisions virtual clusters for booking service reservations:
//! - Acknowledges new reservation sites
//! - Writes the cluster descriptor and boots the clusters once a reservation begins
//! - Reports login details once every cluster is up
//! - Shuts the clusters down shortly before the reservation ends, or on cancellation
//!
//! Each invocation performs one pass; schedule it periodically (e.g. from cron).

mod config;
mod controller;
mod error;
mod logging;
mod notify;
mod reconciler;
#[cfg(test)]
mod test_utils;

use crate::config::{Config, DEFAULT_CONFIG_FILE};
use crate::error::ControllerError;
use clap::{Parser, Subcommand};
use controller::Controller;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "reservation-controller", version, about)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Advance every reservation site by one step (default)
    Poll,
    /// Print every reservation and the status of its sites
    List,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ControllerError> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    let _guard = logging::init(&config.logging)?;

    info!("Starting Reservation Controller");
    info!("Configuration:");
    info!("  Booking service: {}", config.server.base_url);
    info!("  Descriptor root: {}", config.server.dag_dir.display());
    info!("  Shutdown lead: {}s", config.stopping.reservation_secs_left);

    let controller = Controller::from_config(&config)?;

    match cli.command.unwrap_or(Command::Poll) {
        Command::Poll => {
            if let Err(e) = controller.run_once(chrono::Utc::now()).await {
                error!("Pass aborted: {}", e);
                return Err(e);
            }
        }
        Command::List => {
            print!("{}", controller.list().await?);
        }
    }

    Ok(())
}
