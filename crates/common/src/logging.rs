use crate::config::Environment;
use opentelemetry::global::BoxedTracer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber with pretty formatting for development
/// and JSON formatting for production.
///
/// Uses RUST_LOG environment variable for filtering (defaults to "info" if not set).
/// Calling this after a subscriber is installed leaves the existing one in place.
pub fn setup_logging(environment: Environment) {
    install_subscriber(environment, None);
}

/// Install the global subscriber, optionally bridging spans to an OpenTelemetry tracer.
pub(crate) fn install_subscriber(environment: Environment, tracer: Option<BoxedTracer>) {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let otel_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer);

    let result = match environment {
        Environment::Production => registry
            .with(tracing_subscriber::fmt::layer().json().with_level(true))
            .try_init(),
        Environment::Development => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_ansi(true))
            .try_init(),
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}
