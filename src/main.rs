//! Vigil - camera watch service with an on-demand latest-frame endpoint

use std::net::SocketAddr;
use std::time::Duration;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use tokio::net::TcpListener;
use tracing::info;

use vigil::capture;
use vigil::pipeline::capture_loop::LoopOptions;
use vigil::serve::{self, AppState};
use vigil::supervisor::Supervisor;
use vigil::vision::BackgroundSubtractor;
use vigil::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("vigil=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Vigil launching...");

    // Load configuration
    let config = Config::load().wrap_err("invalid configuration")?;
    let capture_config = config.capture.clone();

    // Nothing is exposed until the capture loop has survived its grace
    // period; a startup failure exits here, before any listener exists
    let mut supervisor = Supervisor::new(config.supervisor.grace_period());
    let service = supervisor
        .launch(
            || capture::open_source(&capture_config),
            Box::new(BackgroundSubtractor::new()),
            LoopOptions {
                publish: capture_config.publish,
                max_consecutive_failures: capture_config.max_consecutive_failures,
            },
        )
        .await
        .wrap_err("unable to do video processing")?;

    let state = AppState::new(
        service.slot(),
        service.capture_task(),
        (capture_config.lores_width, capture_config.lores_height),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind {addr}"))?;
    info!("Serving latest frames on http://{addr}");

    axum::serve(listener, serve::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The listener is gone; release the camera before exiting
    service.shutdown(Duration::from_secs(2)).await;
    info!("Vigil shutting down");
    Ok(())
}

/// Resolves when the process is asked to stop
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Interrupt received, stopping");
}
