mod cli;
mod cmd;
mod command;
mod config;
mod error;
mod logger;
mod nest;
mod payload;
mod runtime;
mod server;
mod store;
#[cfg(test)]
mod testing;

use anyhow::Result;
use tracing::{error, info};

fn main() -> Result<()> {
    logger::init()?;
    info!(args = ?std::env::args().collect::<Vec<_>>(), "nestbox start");

    match cli::run() {
        Ok(result) => {
            info!("nestbox finished successfully");
            Ok(result)
        }
        Err(err) => {
            error!(error = ?err, "nestbox failed");
            Err(err)
        }
    }
}
