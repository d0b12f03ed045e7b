use anyhow::Result;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt};

/// Install the global subscriber; `RUST_LOG` overrides `default_level`.
pub fn init_tracing(default_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer();
    let subscriber = Registry::default().with(env_filter).with(fmt_layer);

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
