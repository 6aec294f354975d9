use anyhow::{bail, Result};
use log::info;
use std::env;
use studio_fingerprint::config::ServiceConfig;
use studio_fingerprint::service;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    // Parse command-line arguments
    let args: Vec<String> = env::args().collect();
    if args.len() > 2 {
        bail!("Usage: server [config.json]");
    }

    let config = match args.get(1) {
        Some(path) => {
            info!("Loading config from '{}'", path);
            ServiceConfig::load(path)?
        }
        None => ServiceConfig::default(),
    };
    info!("Starting watermark service with {:?}", config);

    service::serve(config).await
}
