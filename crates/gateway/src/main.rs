use classifier::{Classifier, ClassifierConfig, backend::ort::OrtBackend};
use common::TelemetryGuard;
use gateway::{
    config::get_configuration,
    logging::{SERVICE_NAME, setup_logging},
    routes::router,
    state::AppState,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_configuration()?;

    let _telemetry = config
        .otel_endpoint
        .as_ref()
        .map(|endpoint| TelemetryGuard::init(SERVICE_NAME, endpoint))
        .transpose()?;

    setup_logging(&config);

    let classifier_config = ClassifierConfig::from_env()?;

    tracing::info!(
        config = ?config,
        classifier = ?classifier_config,
        "Loaded configuration"
    );

    // Nothing is served until the model and labels are loaded
    let classifier = Classifier::<OrtBackend>::load(&classifier_config)?;
    let state = AppState::new(Arc::new(classifier), classifier_config.timeout);

    let listener = TcpListener::bind(config.addr()).await?;
    tracing::info!(addr = %listener.local_addr()?, "Gateway listening");

    axum::serve(listener, router(state, config.body_limit_bytes))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down");
}
