use crate::config::Environment;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    layer::{Layered, SubscriberExt},
    util::{SubscriberInitExt, TryInitError},
};

/// Install the global subscriber: `RUST_LOG` filter (default `info`),
/// pretty output in development and JSON in production.
///
/// Spans are also handed to OpenTelemetry when a global tracer provider
/// exists. A no-op if another subscriber is already installed, e.g. by
/// [`crate::TelemetryGuard::init`].
pub fn setup_logging(environment: Environment) {
    if install_subscriber(environment, tracing_opentelemetry::layer()).is_err() {
        tracing::debug!("Global subscriber already installed, keeping it");
    }
}

pub(crate) fn install_subscriber<L>(environment: Environment, otel_layer: L) -> Result<(), TryInitError>
where
    L: Layer<Layered<EnvFilter, Registry>> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer);

    match environment {
        Environment::Production => registry
            .with(tracing_subscriber::fmt::layer().json().with_level(true))
            .try_init(),
        Environment::Development => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_ansi(true))
            .try_init(),
    }
}
