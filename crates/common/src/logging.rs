use crate::config::{Environment, LogLevel};
use opentelemetry::global;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber: pretty output for development, JSON for
/// production.
///
/// `RUST_LOG` takes precedence over `log_level` when set. When `otel_service`
/// is given, spans are also bridged to the globally installed tracer provider
/// (see [`crate::TelemetryGuard`]).
pub fn setup_logging(log_level: LogLevel, environment: Environment, otel_service: Option<&str>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.as_str()));

    let otel_layer = otel_service.map(|name| {
        tracing_opentelemetry::layer().with_tracer(global::tracer(name.to_string()))
    });

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer);

    match environment {
        Environment::Production => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_level(true))
                .init();
        }
        Environment::Development => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_ansi(true))
                .init();
        }
    }
}
