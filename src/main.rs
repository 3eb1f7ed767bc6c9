use home_exporter::{
    api::{create_router, AppState},
    devices::load_devices,
    overview::Overview,
    Scheduler, Settings, Snapshot,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .compact()
        .init();

    info!("Starting home-exporter");

    let settings = Settings::from_env()?;
    info!(
        setup = %settings.setup_dir.display(),
        bind = %settings.bind,
        http_timeout_secs = settings.http_timeout_secs,
        "Settings loaded"
    );

    let client = settings.http_client()?;
    let registry = load_devices(&settings.setup_dir, &client).await?;
    if registry.is_empty() {
        anyhow::bail!(
            "no devices found in {}, nothing to poll",
            settings.setup_dir.display()
        );
    }
    for (_, device) in registry.iter() {
        info!(device = %device.full_name(), "registered device");
    }

    let overview = Overview::load(&settings.setup_dir)?;
    info!(tables = overview.tables.len(), "Overview loaded");

    let snapshot = Snapshot::shared(registry.len());
    let scheduler = Scheduler::new(&registry, Arc::clone(&snapshot));
    let poller = tokio::spawn(scheduler.run());

    let state = AppState::new(snapshot, Arc::new(registry), overview);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind).await?;
    info!("Listening on {}", listener.local_addr()?);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    poller.abort();
    if let Err(e) = &served {
        error!(error = %e, "server error");
    }
    served?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
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
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
