// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! plxd — the Parallax reconstruction session server.
//!
//! Two cooperating contexts: the axum HTTP frontend (async) and the
//! reconstruction worker (one OS thread). They share a single
//! [`SessionState`]; the worker signals process shutdown through a
//! cancellation token when the client sends `q`.

use plx_core::{MapperOptions, SessionState};
use plx_daemon::controller::PipelineController;
use plx_daemon::frontend::{self, FrontendCtx};
use plx_daemon::layout::SceneLayout;
use plx_daemon::{env, lifecycle};
use plx_engine::backend::SfmEngine;
use plx_engine::synthetic::SyntheticEngine;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let data_dir = match env::data_dir() {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("plxd: {err}");
            return ExitCode::FAILURE;
        }
    };

    let file_appender = tracing_appender::rolling::daily(data_dir.join("logs"), "plxd.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    info!(version = env::SERVER_VERSION, "plxd starting");

    let _lock = match lifecycle::acquire_lock(&data_dir) {
        Ok(lock) => lock,
        Err(err) => {
            error!(error = %err, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    let layout = SceneLayout::new(&data_dir, env::scene());
    let num_images = match lifecycle::prepare_scene(&layout) {
        Ok(count) => count,
        Err(err) => {
            error!(error = %err, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    let session = Arc::new(SessionState::new(num_images));
    let shutdown = CancellationToken::new();
    let options = MapperOptions {
        extract_colors: env::extract_colors(),
        snapshot_images_freq: env::snapshot_images_freq(),
        snapshot_path: Some(layout.snapshot_dir()),
        ..MapperOptions::default()
    };

    // Until a real engine binding is wired in, the deterministic
    // synthetic engine drives the whole pipeline.
    let engine: Arc<dyn SfmEngine> = Arc::new(SyntheticEngine::new());

    let controller = PipelineController::new(
        Arc::clone(&session),
        engine,
        layout.clone(),
        options,
        shutdown.clone(),
    );
    let worker = std::thread::Builder::new()
        .name("reconstruction".to_string())
        .spawn(move || controller.run());
    let worker = match worker {
        Ok(handle) => handle,
        Err(err) => {
            error!(error = %err, "failed to spawn worker thread");
            return ExitCode::FAILURE;
        }
    };

    let result = serve(session, layout, shutdown);

    if worker.join().is_err() {
        error!("worker thread panicked");
        return ExitCode::FAILURE;
    }
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "server error");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn serve(
    session: Arc<SessionState>,
    layout: SceneLayout,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let ctx = Arc::new(FrontendCtx { session, layout });
    let app = frontend::router(ctx);
    let addr = env::http_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
