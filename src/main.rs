use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::info;

use checkout_payments as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    let store = api::repositories::connect_store(&cfg)
        .await
        .context("failed to open storage")?;

    let gateways = Arc::new(
        api::gateways::GatewayRegistry::from_config(&cfg)
            .context("failed to configure payment gateways")?,
    );
    info!(gateways = ?gateways.configured(), "Payment gateways configured");
    if cfg.notification_base_url.is_none() {
        info!("APP__NOTIFICATION_BASE_URL not set; gateways will use their dashboard webhook settings");
    }

    let cfg = Arc::new(cfg);
    let app_state = api::AppState::new(cfg.clone(), store, gateways)
        .context("failed to build application state")?;
    let app = api::app_router(app_state);

    let ip: std::net::IpAddr = cfg.host.parse().context("invalid APP__HOST")?;
    let addr = SocketAddr::from((ip, cfg.port));
    info!("checkout-payments listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
