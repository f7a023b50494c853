use crate::{
    config::{config_path, AppConfig},
    routes::{get_routes, AppState},
};
use caption_engine::{standard_loaders, EngineRegistry, ResidencyManager};
use caption_task::{JobDispatcher, ProgressStore};
use std::{sync::Arc, time::Duration};
use storage::{ImageStore, OpendalImageStore};

const LOG_DIR_ENV: &str = "CAPTION_LOG_DIR";
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

pub async fn start_server() -> anyhow::Result<()> {
    match std::env::var(LOG_DIR_ENV) {
        Ok(log_dir) => caption_tracing::init_tracing_to_file(log_dir.into()),
        Err(_) => caption_tracing::init_tracing_to_stdout(),
    }

    let config = Arc::new(AppConfig::load(&config_path()));
    if config.server.debug_mode {
        tracing::debug!("active config: {:?}", config.redacted());
    }

    let images: Arc<dyn ImageStore> =
        Arc::new(OpendalImageStore::new_fs(&config.paths.upload_dir)?);

    let mut residency = ResidencyManager::new();
    for loader in standard_loaders(&config.models) {
        residency.register(loader);
    }
    let registry = EngineRegistry::standard(residency, config.remote_engine_config());

    let store = ProgressStore::new(config.task_retention());
    if config.task_retention().is_some() {
        let store = store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PURGE_INTERVAL);
            loop {
                interval.tick().await;
                store.purge_expired().await;
            }
        });
    }

    let dispatcher = JobDispatcher::new(registry, store, images.clone());
    let app = get_routes(AppState {
        dispatcher: dispatcher.clone(),
        images,
        config: config.clone(),
    });

    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(dispatcher))
        .await?;

    Ok(())
}

async fn shutdown_signal(dispatcher: JobDispatcher) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl-C received, release models and shut down...");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, release models and shut down...");
        },
    }

    dispatcher.shutdown().await;
}
