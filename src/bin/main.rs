use std::time::Duration;

use actix_web::{middleware::Logger, web, App, HttpServer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chirp::config::Config;
use chirp::core::db::{seed_demo_data, Store};
use chirp::AppState;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Writes the snapshot on the blocking pool.
async fn flush_store(state: &web::Data<AppState>) -> anyhow::Result<()> {
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.flush()).await?
}

fn spawn_snapshot_task(state: web::Data<AppState>) {
    let every = Duration::from_secs(state.config.snapshot_interval_secs.max(1));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;

        loop {
            interval.tick().await;
            if let Err(e) = flush_store(&state).await {
                warn!("Snapshot failed: {e:#}");
            }
            let pruned = state.hub.prune();
            if pruned > 0 {
                info!("Pruned {pruned} idle notification rooms");
            }
        }
    });
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::load();
    let store = Store::open(config.data_file.clone())?;
    if config.seed_demo {
        seed_demo_data(&store)?;
    }

    let bind = config.bind.clone();
    let state = web::Data::new(AppState::new(store, config));
    if state.media.is_none() {
        warn!("CHIRP_MEDIA_PRIVATE_KEY not set, uploads are disabled");
    }
    spawn_snapshot_task(state.clone());

    info!("Server listening on http://{bind}");

    let app_state = state.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(Logger::default())
            .configure(chirp::configure)
    })
    .bind(&bind)?
    .run()
    .await?;

    info!("Shutting down, flushing store");
    flush_store(&state).await?;
    Ok(())
}
