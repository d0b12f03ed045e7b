use aihelper_gui::config::AppConfig;
use aihelper_gui::routes::build_router;
use aihelper_gui::state::AppState;
use aihelper_gui::telemetry::init_tracing;
use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("info,aihelper_core=info")?;

    let config = AppConfig::from_env()?;
    let state = AppState::try_new(&config).await?;
    let sweeper = state.spawn_session_sweeper();

    let app: Router = build_router(state);

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!(address = %config.listen_addr, "aihelper-gui listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| {
            error!(error = %err, "server shutdown with error");
            err
        })?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            stream.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
