//! Logging and metrics initialisation. Call once, at startup.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG` when set, otherwise from the verbosity count.
pub fn env_filter(verbose: u8) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        })
    })
}

pub fn init_tracing(verbose: u8, json: bool) {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(verbose));
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

/// Serve Prometheus metrics on `addr`. Must run inside the tokio runtime.
pub fn install_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}
