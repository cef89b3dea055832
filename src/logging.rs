//! Structured logging initialization.
//!
//! `RUST_LOG` takes precedence when set; otherwise `LOG_LEVEL` picks the
//! default filter. `LOG_FORMAT=json` switches to machine-readable output
//! for log shippers.

use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(level)
    });

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // try_init so tests that pull in the crate can call this repeatedly.
    if json {
        let _ = fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .try_init();
    } else {
        let _ = fmt().with_env_filter(filter).compact().try_init();
    }
}
