mod config;
mod domain;
mod progress;
mod progress_api;
mod storage;
mod streaming_client;

use std::{path::Path, sync::Arc};

use anyhow::Context;
use config::Config;
use poem::{
    EndpointExt, Route, Server,
    listener::TcpListener,
    middleware::{Cors, Tracing as PoemTracing},
};
use poem_openapi::OpenApiService;
use progress::{ProgressStore, SyncDispatcher, reconcile::reconcile_on_load};
use storage::{FileStorage, MemoryStorage, SnapshotStorage};
use streaming_client::StreamingClient;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder, prelude::*};

type WatchProgressResult<T> = anyhow::Result<T>;

#[tokio::main]
async fn main() -> WatchProgressResult<()> {
    // Respect RUST_LOG if set, default to info for our crate and warn for deps.
    let default_filter = format!(
        "{}=info,poem=info,reqwest=warn,h2=warn",
        env!("CARGO_PKG_NAME")
    );
    let env_filter = std::env::var("RUST_LOG").unwrap_or(default_filter);
    SubscriberBuilder::default()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .with_level(true)
        .pretty()
        .finish()
        .with(ErrorLayer::default())
        .init();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting watch progress sync"
    );
    if Path::new(".env.local").exists() {
        dotenvy::from_filename(".env.local")?;
    } else if Path::new(".env").exists() {
        dotenvy::from_filename(".env")?;
    };
    let config = Config::load()?;
    if let Err(e) = config.validate() {
        return Err(anyhow::anyhow!(e));
    }

    let client = Arc::new(StreamingClient::new(
        &config.streaming_api_url,
        config.request_timeout,
    )?);
    tracing::info!(api = %client.base_url(), debounce_ms = config.sync_debounce.as_millis() as u64, "configured streaming client");

    let storage: Arc<dyn SnapshotStorage> = if config.ephemeral_store {
        tracing::warn!("EPHEMERAL_STORE is set; watch history will not survive a restart");
        Arc::new(MemoryStorage::new())
    } else {
        let storage = FileStorage::open(&config.store_dir)
            .with_context(|| "Failed to open progress storage")?;
        tracing::info!(dir = %storage.dir().display(), "using file storage");
        Arc::new(storage)
    };
    let dispatcher = Arc::new(SyncDispatcher::new(client.clone(), config.sync_debounce));
    let store = Arc::new(ProgressStore::load(storage, dispatcher.clone()));

    if config.reconcile_on_start {
        if let Err(e) = reconcile_on_load(&store, client.as_ref()).await {
            tracing::warn!(error = %format!("{:#}", e), "could not reconcile with server; using local history");
        }
    } else if store.is_empty() {
        tracing::info!("starting with empty watch history; reconciliation is disabled");
    }

    let served = run_poem(store.clone(), &config).await;

    // A lane may hold one in-flight write and one queued behind it.
    let grace = config.request_timeout.saturating_mul(2);
    if tokio::time::timeout(grace, dispatcher.flush_pending())
        .await
        .is_err()
    {
        tracing::warn!(?grace, "gave up waiting for progress syncs");
    }
    dispatcher.shutdown();
    store.flush_snapshot().await;
    served
}

pub async fn run_poem(store: Arc<ProgressStore>, config: &Config) -> WatchProgressResult<()> {
    let version = env!("CARGO_PKG_VERSION");
    let api = progress_api::ProgressApi::new(store);
    let api_service = OpenApiService::new(api, "Watch Progress API", version)
        .server(format!("http://{}", config.bind_addr));
    let ui = api_service.rapidoc();
    let spec = api_service.spec();
    let route = Route::new()
        .nest("/", api_service)
        .nest("/ui", ui)
        .nest("/spec", poem::endpoint::make_sync(move |_| spec.clone()))
        .with(Cors::new())
        .with(PoemTracing);

    let bind_addr = config.bind_addr.clone();
    tracing::info!(%bind_addr, "starting HTTP server");
    Server::new(TcpListener::bind(bind_addr))
        .run_with_graceful_shutdown(
            route,
            async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutdown requested");
            },
            None,
        )
        .await?;
    Ok(())
}
