use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cee_draft_pipeline::{
    adapter::{select_model, AdapterRegistry, ModelTask},
    config::{Config, LogFormat},
    langbase::{LangbaseClient, LangbaseFactory},
    server::DraftServer,
    validate::{CachedValidator, StructuralValidator},
    Pipeline,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "CEE draft pipeline starting..."
    );

    // Make sure the draft and repair pipes exist before serving
    let draft_model = select_model(ModelTask::Draft, None, &config.models);
    let repair_model = select_model(ModelTask::Repair, None, &config.models);
    let langbase = match LangbaseClient::new(&config.langbase, &config.request, config.pipes.clone()) {
        Ok(c) => {
            info!(base_url = %config.langbase.base_url, "Langbase client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize Langbase client");
            return Err(e.into());
        }
    };
    if let Err(e) = langbase
        .ensure_pipes(&draft_model.model, &repair_model.model)
        .await
    {
        warn!(error = %e, "Failed to ensure Langbase pipes exist, continuing");
    }

    let factory = Arc::new(LangbaseFactory::new(
        config.langbase.clone(),
        config.request.clone(),
        config.pipes.clone(),
    ));
    let registry = Arc::new(AdapterRegistry::with_capacity(
        factory,
        config.cache.adapter_capacity,
        Duration::from_secs(config.cache.adapter_ttl_secs),
    ));
    let validator = Arc::new(CachedValidator::with_capacity(
        StructuralValidator::new(),
        config.cache.validation_capacity,
        Duration::from_secs(config.cache.validation_ttl_secs),
    ));
    let pipeline = Arc::new(Pipeline::from_config(&config, registry).with_validator(validator));

    let server = DraftServer::new(pipeline);
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
