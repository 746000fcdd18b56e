use std::error::Error;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use clipd::config::Config;
use clipd::handlers::AppState;
use clipd::router::Router;
use clipd::serve::Server;
use clipd::service::PasteService;
use clipd::store::{FsStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(Config::from_env());
    let store = bind_store(&config).await?;
    let service = Arc::new(PasteService::new(store, &config));
    let state = AppState { service, config: config.clone() };

    let server = Server::bind(config.listen);
    server.handle().shutdown_on(shutdown_signal());

    info!("listening on http://{}", config.listen);
    server.serve(Router::new(state)).await?;
    info!("server stopped");

    Ok(())
}

async fn bind_store(config: &Config) -> Result<Arc<dyn Store>, Box<dyn Error>> {
    #[cfg(feature = "storage-s3")]
    if let Some(bucket) = &config.s3_bucket {
        info!("using object-store backend: bucket {bucket}");
        let store =
            clipd::store::s3::S3Store::connect(bucket.clone(), config.s3_prefix.clone()).await;
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "storage-s3"))]
    if config.s3_bucket.is_some() {
        tracing::warn!(
            "CLIPD_S3_BUCKET is set but this build has no storage-s3 support; \
             falling back to the filesystem backend"
        );
    }

    info!("using filesystem backend at {}", config.data_dir.display());
    Ok(Arc::new(FsStore::open(&config.data_dir).await?))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
