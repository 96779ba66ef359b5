pub mod config;
pub mod datasource;
pub mod db;
pub mod descriptor;
pub mod error;
pub mod params;
pub mod query;
pub mod renderer;
pub mod report;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod views;

use crate::{config::AppConfig, server::Server};

/// Bootstraps the report development console using environment configuration.
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    Server::new(config).await?.run().await
}
