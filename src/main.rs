// src/main.rs
use dotenvy::dotenv;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

use polling_service::config::Config;

#[tokio::main]
async fn main() {
    dotenv().ok(); // Load environment variables from .env file

    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = polling_service::start_server(config).await {
        error!("Server stopped with error: {e}");
        std::process::exit(1);
    }
}
