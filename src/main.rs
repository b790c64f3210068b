use std::net::SocketAddr;
use std::sync::Arc;

use dotenv::dotenv;
use eyre::Result;
use tracing::info;

use reindex_orchestrator::api::{self, AppState};
use reindex_orchestrator::cluster::HttpClusterClient;
use reindex_orchestrator::config::Config;
use reindex_orchestrator::service::ReindexService;
use reindex_orchestrator::store::{PostgresStore, connect_db};
use reindex_orchestrator::worker::ReindexWorker;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("starting reindex orchestrator");

    let config = Config::from_env()?;

    let pool = connect_db(&config.database_url).await?;
    let store = PostgresStore::new(pool);
    store.init_schema().await?;

    let cluster = HttpClusterClient::new(config.cluster_url.clone());
    let service = Arc::new(ReindexService::new(Arc::new(store), Arc::new(cluster)));

    let worker = ReindexWorker::create(Arc::clone(&service), config.poll_interval);
    worker.start();

    let state = Arc::new(AppState::new(
        Arc::clone(&service),
        Arc::clone(&worker),
        config.api_key.clone(),
    ));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    info!(addr = %addr, cluster = %config.cluster_url, "serving reindex API");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let in-flight step bodies finish before exiting.
    worker.stop().await;
    info!("shut down cleanly");

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c");
        }
    }
}
