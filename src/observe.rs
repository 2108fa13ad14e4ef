use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

static INIT: OnceCell<()> = OnceCell::new();

/// Installs the global subscriber once. `RUST_LOG` wins over `filter`.
/// Logs go to stderr so stdout stays a clean JSON report.
pub fn init_tracing(filter: &str, json: bool) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = Registry::default().with(filter);
        let result = if json {
            let layer = fmt::layer().json().with_writer(std::io::stderr).with_target(false);
            tracing::subscriber::set_global_default(registry.with(layer))
        } else {
            let layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(false);
            tracing::subscriber::set_global_default(registry.with(layer))
        };
        let _ = result;
    });
}
