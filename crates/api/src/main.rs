mod error;
mod middleware;
mod observability;
mod routes;
mod state;
mod sweeper;
mod validation;

use journey_infra::{config::AppConfig, logging::init_tracing};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config)?;
    observability::init_metrics()?;

    let state = state::AppState::new(config.clone()).await?;
    if config.refresh_on_startup {
        let snapshot = state.runtime.refresh_configuration().await?;
        observability::register_config_refresh(true, Some(snapshot.group_count()));
        info!(
            journeys = snapshot.journeys.len(),
            groups = snapshot.group_count(),
            "configuration preloaded"
        );
    }

    let sweeper = config
        .session_sweep_interval()
        .map(|period| sweeper::spawn_session_sweeper(state.runtime.clone(), period));

    let app = routes::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "starting api");

    let listener = TcpListener::bind(addr).await?;
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    served.map_err(|err| {
        tracing::error!(error = %err, "server exited");
        err
    })?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
