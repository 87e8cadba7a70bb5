use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Settings;

/// Initialize the logging system
pub fn init_logger(settings: &Settings) -> anyhow::Result<()> {
    let log_level = &settings.logging.level;
    let log_format = &settings.logging.format;

    // RUST_LOG wins over the configured level
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format.as_str() {
        "json" => registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .try_init()?,
        _ => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_ansi(true),
            )
            .try_init()?,
    }

    Ok(())
}
