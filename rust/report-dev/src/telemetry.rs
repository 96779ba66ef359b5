use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_FILTER: &str = "info,tower_http=debug";

/// Installs the global fmt subscriber once; `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        if let Err(err) = fmt().with_env_filter(filter).with_target(false).try_init() {
            eprintln!("tracing subscriber already installed: {err}");
        }
    });
}
