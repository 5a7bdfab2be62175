use anyhow::Result;
use tokio::task::JoinSet;

use opgate_server::backend;
use opgate_server::config::Config;
use opgate_server::transport::{Transport, http::HttpTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration from environment variables and CLI arguments
    let config = Config::from_env_and_args()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("opgate={}", config.log_level).parse()?)
                .add_directive(format!("opgate_server={}", config.log_level).parse()?),
        )
        .init();

    // Open the cache and wire the limiter and the store onto it
    let coordinator = backend::create_coordinator(&config).await?;

    // Create a set to manage transport tasks
    let mut transport_tasks = JoinSet::new();

    {
        let coordinator = coordinator.clone();
        let host = config.http.host.clone();
        let port = config.http.port;

        transport_tasks.spawn(async move {
            tracing::info!("Starting HTTP transport on {}:{}", host, port);
            let transport = HttpTransport::new(&host, port);
            transport.start(coordinator).await
        });
    }

    tracing::info!(
        "opgate server started with {} cache backend",
        config.cache.backend
    );
    tracing::info!(
        "Rate limit: {} requests/minute, burst {}, enabled: {}",
        config.rate_limit.requests_per_minute,
        config.rate_limit.bucket_capacity,
        config.rate_limit.enabled
    );

    // Wait for all transport tasks to complete (they run indefinitely)
    while let Some(result) = transport_tasks.join_next().await {
        match result {
            Ok(Ok(())) => {
                tracing::info!("Transport task completed successfully");
            }
            Ok(Err(e)) => {
                tracing::error!("Transport task failed: {}", e);
                return Err(e);
            }
            Err(e) => {
                tracing::error!("Transport task panicked: {}", e);
                return Err(anyhow::anyhow!("Transport task panicked"));
            }
        }
    }

    Ok(())
}
