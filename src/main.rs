use std::env;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use ragline_backend::core::logging;
use ragline_backend::server::router::router;
use ragline_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let state = AppState::initialize().await?;
    logging::init(&state.paths);

    // The feed worker runs from startup; admins can stop/restart it over
    // the admin API.
    state.short_term.run_worker().await;

    let port = env::var("PORT")
        .ok()
        .and_then(|val| val.parse::<u16>().ok())
        .unwrap_or(5000);
    let bind_addr = format!("0.0.0.0:{}", port);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    let app: Router = router(state.clone());
    axum::serve(listener, app).await.context("Server error")?;

    state.short_term.stop_worker().await;
    Ok(())
}
