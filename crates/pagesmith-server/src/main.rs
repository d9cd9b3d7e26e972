//! Pagesmith server binary.

use pagesmith_server::{server, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,pagesmith_server=debug,pagesmith_core=debug".into());
    if config.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        host = %config.host,
        port = config.port,
        workers = config.engine.worker_concurrency,
        "starting pagesmith control plane"
    );

    server::run(config).await
}
