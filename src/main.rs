use std::sync::Arc;

use anyhow::{Context, Result};
use memrepro::{
    ActorDirectory, ActorHost, AppState, FanOut, FileStoreProvider, HarnessConfig,
    MemoryStoreProvider, RemoteActorDirectory, StoreProvider, build_router,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = HarnessConfig::from_env().context("failed to load harness configuration")?;

    let stores: Arc<dyn StoreProvider> = match &config.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create data directory {}", dir.display()))?;
            info!(data_dir = %dir.display(), "chunk store: file");
            Arc::new(FileStoreProvider::new(dir))
        }
        None => {
            info!("chunk store: memory");
            Arc::new(MemoryStoreProvider::new())
        }
    };

    let host = Arc::new(ActorHost::new(stores, config.host_config()));

    let directory: Arc<dyn ActorDirectory> = match &config.actor_base_url {
        Some(base_url) => {
            info!(base_url = %base_url, "actor directory: remote");
            Arc::new(RemoteActorDirectory::new(base_url.clone()))
        }
        None => {
            info!(worker_slots = config.worker_slots, "actor directory: local");
            host.clone()
        }
    };
    let fanout = Arc::new(FanOut::new(directory).with_call_timeout(config.call_timeout));

    let app = build_router(AppState::new(host, fanout));

    let addr = config.address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(
        address = %addr,
        page_size = config.page_size,
        fill_cap = config.fill_cap,
        batch_size = config.batch_size,
        "memrepro started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("memrepro=debug,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install Ctrl+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
