use std::net::SocketAddr;
use std::sync::Arc;

use media_jobs::api::job_routes;
use media_jobs::config::ServiceConfig;
use media_jobs::logging::init_logging;
use media_jobs::media::MediaProcessor;
use media_jobs::service::JobService;
use media_jobs::sweeper::{Sweeper, spawn_sweeper};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    // Keep the guard alive so the file writer flushes on exit.
    let _log_guard = init_logging(config.log_dir.as_deref())?;

    tokio::fs::create_dir_all(&config.data_dir).await?;

    eprintln!("🎵 Media Jobs v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Output: {}", config.data_dir.display());
    eprintln!("   Workers: {}", config.scheduler.concurrency);
    eprintln!(
        "   Rate limit: {} per {}s",
        config.rate_limit.max_requests,
        config.rate_limit.window.as_secs()
    );
    eprintln!(
        "   Cleanup: files older than {}h, every {}s",
        config.cleanup.ttl.as_secs() / 3600,
        config.cleanup.interval.as_secs()
    );
    eprintln!("   API: http://0.0.0.0:{}/api/health\n", config.port);

    // ── Jobs ─────────────────────────────────────────────────────────────
    let processor = Arc::new(MediaProcessor::new(
        config.tools.clone(),
        config.data_dir.clone(),
        config.retry.clone(),
    ));
    let service = Arc::new(JobService::start(&config, processor));

    // ── Cleanup ──────────────────────────────────────────────────────────
    let sweeper = Arc::new(Sweeper::new(config.data_dir.clone(), config.cleanup.ttl));
    let _sweep_handle = spawn_sweeper(sweeper, config.cleanup.interval);

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = job_routes(service, &config.cors_origins);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "HTTP server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
