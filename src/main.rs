mod clients;
mod config;
mod error;
mod messaging;
mod models;
mod outbox;
mod pollers;
mod snapshot;
mod sources;
mod supervisor;
mod sweeper;
#[cfg(test)]
mod test_support;

use crate::clients::setup_db_pool;
use crate::config::Config;
use crate::messaging::MqttPublisher;
use crate::outbox::OutboxStore;
use crate::sources::{CameraStatusSource, WeatherSource};
use crate::supervisor::Supervisor;

use std::sync::Arc;
use actix_web::{App, HttpResponse, HttpServer, Responder, get};
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().body("OK")
}

// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;
    let ctrl_c = signal::ctrl_c();
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received. Stopping relay.");
}

/// Loads configuration, opens the stores and hands everything to the supervisor.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Loading configuration...");
    let config = Config::load()?;
    info!(unit = %config.unit_name, "Configuration loaded.");

    info!("Connecting to databases...");
    let outbox = OutboxStore::new(setup_db_pool(config.database_url()).await?);
    outbox.init().await?;
    let weather = WeatherSource::new(setup_db_pool(config.weather_database_url()).await?);
    let cameras = CameraStatusSource::new(setup_db_pool(config.camera_database_url()).await?);
    info!("Database connections established.");

    let publisher = Arc::new(MqttPublisher::new(&config)?);
    let supervisor = Supervisor::new(&config, outbox, weather, cameras, publisher);

    let tasks = match supervisor.start().await {
        Ok(tasks) => tasks,
        Err(e) => {
            error!("Relay startup aborted: {}", e);
            return Err(e.into());
        }
    };

    let health_server = HttpServer::new(|| App::new().service(health_check))
        .bind(("0.0.0.0", config.health_port))?
        .run();
    info!(port = config.health_port, "Health check server running.");

    tokio::select! {
        result = health_server => result?,
        _ = tasks.wait() => error!("All relay tasks stopped."),
        _ = shutdown_signal() => {},
    }
    info!("Relay shutting down.");

    Ok(())
}
