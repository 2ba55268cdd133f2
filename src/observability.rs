//! Facilities for observing runtime behavior

use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer, Registry};

use crate::{error, Config};

/// Installs the global tracing subscriber from the configured filter.
pub(crate) fn init(config: &Config) -> Result<(), error::Observability> {
    let filter = EnvFilter::try_new(&config.log)?;

    let subscriber = Registry::default().with(
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(filter),
    );

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}
