use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use minirag_core::config::MiniragConfig;
use minirag_crypto::{FieldCipher, SessionSigner};
use minirag_hooks::WebhookDispatcher;
use minirag_ingest::{IngestWorker, RefreshScheduler, INGEST_JOB, REFRESH_INTERVAL_SECS, REFRESH_JOB};
use minirag_llm::{embedding_dimension, ProviderRouter};
use minirag_queue::{JobQueue, QueueWorker};
use minirag_rag::RagOrchestrator;
use minirag_store::MetaStore;

use minirag_gateway::{app, stats_cache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "minirag_gateway=info,minirag_ingest=info,tower_http=debug".into()),
        )
        .init();

    // load config: explicit path via MINIRAG_CONFIG > ./minirag.toml
    let config_path = std::env::var("MINIRAG_CONFIG").ok();
    let config = MiniragConfig::load(config_path.as_deref())?;

    let store = MetaStore::open(&config.database.url)?;
    let queue = JobQueue::open(config.queue_url())?;
    let vector = minirag_vector::connect(
        config.vector.url.as_deref(),
        embedding_dimension(&config.models.default_embedding_model),
    )
    .await
    .map_err(|e| anyhow::anyhow!("vector store init failed: {e}"))?;

    let cipher = Arc::new(FieldCipher::from_key_material(&config.security.encryption_key)?);
    let signer = SessionSigner::new(
        &config.security.session_signing_key,
        config.session_ttl_secs(),
    );
    let llm = Arc::new(ProviderRouter::from_config(&config.providers, &config.timeouts));
    let hooks = WebhookDispatcher::new(
        store.clone(),
        Duration::from_secs(config.timeouts.webhook_secs),
    );
    let orchestrator = RagOrchestrator::new(
        store.clone(),
        vector.clone(),
        llm.clone(),
        hooks.clone(),
        cipher.clone(),
        config.models.default_embedding_model.clone(),
        Duration::from_secs(config.timeouts.search_secs),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // The worker can run in-process or in a dedicated consumer deployment.
    let worker_handle = if config.worker.enabled {
        let mut worker = QueueWorker::new(
            queue.clone(),
            Duration::from_millis(config.queue.poll_interval_ms),
        );
        worker.register(
            INGEST_JOB,
            Arc::new(IngestWorker::new(
                store.clone(),
                vector.clone(),
                llm.clone(),
                hooks.clone(),
                cipher.clone(),
                config.models.default_embedding_model.clone(),
                Duration::from_secs(config.timeouts.fetch_secs),
            )),
        );
        worker.register_cron(
            REFRESH_JOB,
            REFRESH_INTERVAL_SECS,
            Arc::new(RefreshScheduler::new(store.clone(), queue.clone())),
        )?;
        Some(tokio::spawn(worker.run(shutdown_rx)))
    } else {
        info!("queue worker disabled by config");
        None
    };

    let bind = config.server.bind.clone();
    let port = config.server.port;
    let state = Arc::new(app::AppState {
        config,
        store,
        vector,
        queue,
        llm,
        hooks,
        cipher,
        signer,
        orchestrator,
        stats: stats_cache::StatsCache::new(),
    });
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("minirag gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Let the worker finish its in-flight job before exit.
    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker_handle {
        let _ = handle.await;
    }

    Ok(())
}
