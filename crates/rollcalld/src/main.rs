use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use rollcall_core::OnnxEncoder;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod engine;
mod service;

use config::Config;
use service::RecognitionService;

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = Config::from_env();

    let encoder = OnnxEncoder::load(&config.model_dir)
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))?;
    tracing::info!(dir = %config.model_dir.display(), "face models loaded");
    OnnxEncoder::check_tolerance(config.tolerance);

    let engine = engine::spawn_engine(encoder).context("spawning engine thread")?;
    let service = web::Data::new(RecognitionService::new(
        engine,
        config.gallery_dir.clone(),
        config.tolerance,
    ));

    if let Err(e) = service.reload().await {
        tracing::warn!(error = %e, "initial gallery load failed; serving no known faces");
    }

    let max_body_bytes = config.max_body_bytes;
    tracing::info!(bind = %config.bind, tolerance = config.tolerance, "rollcalld ready");

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(service.clone())
            .app_data(api::json_config(max_body_bytes))
            .configure(api::configure)
    })
    .bind(&config.bind)
    .with_context(|| format!("binding {}", config.bind))?
    .run()
    .await?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}
