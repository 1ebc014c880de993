use std::path::PathBuf;

use ::tracing::{error, info_span};
use clap::Parser;
use service::Service;

mod config;
mod http_objects;
mod metrics;
mod routes;
mod service;
mod tracing;
use tracing::setup_tracing;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match config::ServerConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error loading config: {:?}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = setup_tracing(&config) {
        eprintln!("error setting up tracing: {:?}", err);
        std::process::exit(1);
    }

    let root_span = info_span!(
        "plan-pipeline",
        mode = ?config.pipeline.mode,
        listen_addr = config.listen_addr.as_str()
    );
    let _guard = root_span.enter();

    let service = match Service::new(config).await {
        Ok(service) => service,
        Err(err) => {
            error!("Error creating service: {:?}", err);
            return;
        }
    };
    if let Err(err) = service.start().await {
        error!("Error starting service: {:?}", err);
    }
}
