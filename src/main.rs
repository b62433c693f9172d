// StreamSight server entrypoint
//
// The heavy lifting (component bootstrap, server wiring, shutdown) lives
// in dedicated modules so this file remains a thin orchestrator.

mod config;
mod lifecycle;
mod logging;

use anyhow::Result;
use config::ServerConfig;
use lifecycle::{bootstrap, run};
use log::info;
use std::env;

#[actix_web::main]
async fn main() -> Result<()> {
    // Optional config path as the first argument; defaults next to the
    // binary's working directory.
    let config_path = env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = match ServerConfig::load_or_default(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load {}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    // Logging before any other side effects
    logging::init_logging(
        &config.logging.level,
        config.logging.file_path.as_deref(),
        config.logging.log_to_console,
    )?;

    info!("StreamSight v{}", env!("CARGO_PKG_VERSION"));

    let components = bootstrap(&config)?;
    run(&config, components).await
}
