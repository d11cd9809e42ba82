use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use tablegate::config::GateConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let config = GateConfig::from_env()?;

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "tablegate",
        "tablegate starting: RUST_LOG='{}', http_addr={}, store={}, matrix={}",
        rust_log,
        config.http_addr,
        if config.database_url.is_some() { "postgres" } else { "memory" },
        config.matrix_file.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "<reference>".to_string())
    );

    tablegate::server::run(config).await
}
