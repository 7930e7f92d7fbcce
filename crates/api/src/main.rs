use std::time::Duration;

use anyhow::Context;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    songsmith_observability::init();

    let settings = songsmith_infra::Settings::from_env().context("invalid configuration")?;
    if settings.uses_default_jwt_secret() {
        tracing::warn!("JWT_SECRET not set; using insecure dev default");
    }

    let (app, services) = songsmith_api::app::build_app(&settings)
        .await
        .context("failed to wire services")?;
    let sweep = services.spawn_stale_sweep();

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(sweep) = sweep {
        sweep.abort();
    }
    if !services.executor().wait_idle(SHUTDOWN_GRACE).await {
        tracing::warn!(
            stats = ?services.executor().stats(),
            "shutting down with generation still in flight"
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
