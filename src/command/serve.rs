use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::nest::Nest;
use crate::server::NestServer;

/// Run the request server in the foreground until interrupted.
///
/// On Ctrl-C new work is refused, then every live environment is saved and
/// removed before exiting.
pub fn run(listen: Option<&str>) -> Result<()> {
    let config = Config::load()?;
    let nest = Arc::new(Nest::from_config(&config)?);
    let server = NestServer::bind(listen.unwrap_or(config.listen()))?;

    let on_interrupt = Arc::clone(&nest);
    ctrlc::set_handler(move || {
        info!("serve:interrupted");
        let discarded = on_interrupt.shutdown();
        eprintln!("Discarded {discarded} environment(s)");
        std::process::exit(0);
    })
    .context("Failed to install Ctrl-C handler")?;

    println!("Listening on {}", server.local_addr());
    server
        .spawn(nest)
        .join()
        .map_err(|_| anyhow!("Server thread panicked"))
}
