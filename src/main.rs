#[macro_use] extern crate log;

use php_opcache_exporter::config::Config;
use php_opcache_exporter::server::{serve, Exporter};

use clap::Parser;
use tokio::net::TcpListener;

use std::process::exit;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    let default_filter = if config.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let listener = match TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind port {}: {}", config.port, e);
            exit(1);
        }
    };

    let exporter = Arc::new(Exporter::new(config.source()));
    info!("Polling... Serving at port: {}", config.port);

    tokio::select! {
        () = serve(listener, exporter) => (),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        },
    }
}
