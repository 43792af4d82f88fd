use common::{Environment, LogLevel};
use serde::Deserialize;

const DEFAULT_BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: LogLevel,
    pub environment: Environment,
    /// OTLP collector endpoint; telemetry export is off when unset
    pub otel_endpoint: Option<String>,
    pub body_limit_bytes: usize,
}

impl Config {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read `GATEWAY_*` environment variables, e.g. `GATEWAY_PORT=8080`.
pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let config = config::Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", 7860)?
        .set_default("log_level", "info")?
        .set_default("environment", "development")?
        .set_default("body_limit_bytes", DEFAULT_BODY_LIMIT_BYTES as u64)?
        .add_source(
            config::Environment::with_prefix("GATEWAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    Ok(config)
}
