use std::{process, sync::Arc};

use olian::{
    application::{
        error::AppError,
        render::{RenderCoordinator, RenderPipelineConfig, TracingErrorSink},
    },
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
    presentation::engine::PageEngine,
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Some(config::Command::Serve(_)) | None => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let renderer = RenderCoordinator::new(
        Arc::new(PageEngine),
        RenderPipelineConfig::from(&settings.render),
        Arc::new(TracingErrorSink),
    );
    info!(
        target = "olian::serve",
        addr = %settings.server.addr,
        stream_timeout_ms = renderer.config().stream_timeout.as_millis() as u64,
        deadline_ms = renderer.config().deadline().as_millis() as u64,
        "Starting HTTP server"
    );
    let router = http::build_router(HttpState { renderer });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;

    let graceful = settings.server.graceful_shutdown;
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(async move {
        let _ = stop_rx.await;
    });
    let mut serve = tokio::spawn(async move { server.await });

    tokio::select! {
        joined = &mut serve => return finish_serve(joined),
        () = shutdown_signal() => {}
    }
    let _ = stop_tx.send(());

    // Open streams get `graceful` to drain before the process exits.
    match tokio::time::timeout(graceful, &mut serve).await {
        Ok(joined) => finish_serve(joined),
        Err(_) => {
            warn!(
                target = "olian::serve",
                timeout_secs = graceful.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
            serve.abort();
            Ok(())
        }
    }
}

fn finish_serve(
    joined: Result<Result<(), std::io::Error>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match joined {
        Ok(Ok(())) => {
            info!(target = "olian::serve", "HTTP server stopped");
            Ok(())
        }
        Ok(Err(err)) => Err(AppError::from(InfraError::from(err))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target = "olian::serve", "Shutdown signal received");
}
