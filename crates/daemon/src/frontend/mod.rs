// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP frontend.
//!
//! One endpoint: `POST /process`, multipart/form-data with a JSON
//! `metadata` field and an optional `image` file. The handler saves the
//! upload, posts the task to the session, parks (on the blocking pool)
//! until the worker answers, and streams back a `multipart/mixed`
//! response: a JSON status part plus a ZIP of the latest exported
//! artifacts.
//!
//! The frontend does no image processing and never touches the
//! reconstruction; its only disk writes land in the image directory.

mod response;

use crate::exporter::latest_export_dir;
use crate::layout::SceneLayout;
use axum::extract::{Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use plx_core::{RequestOutcome, SessionState, Submission, Task};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Shared context for request handlers.
pub struct FrontendCtx {
    pub session: Arc<SessionState>,
    pub layout: SceneLayout,
}

/// The JSON `metadata` form field. Unknown fields are ignored; the
/// `let_colmap_choose_order` alias keeps older clients working.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub full_pipeline: bool,
    #[serde(default)]
    pub skip: bool,
    #[serde(default, alias = "let_colmap_choose_order")]
    pub let_engine_choose_order: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// Errors answered directly by the frontend, before the worker is
/// involved.
#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("Metadata not provided")]
    MissingMetadata,

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Invalid image filename: {0:?}")]
    BadImageName(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for FrontendError {
    fn into_response(self) -> Response {
        let status = match &self {
            FrontendError::MissingMetadata
            | FrontendError::InvalidMetadata(_)
            | FrontendError::BadImageName(_)
            | FrontendError::Upload(_) => StatusCode::BAD_REQUEST,
            FrontendError::Zip(_) | FrontendError::Io(_) | FrontendError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Build the HTTP router.
pub fn router(ctx: Arc<FrontendCtx>) -> Router {
    Router::new().route("/process", post(process)).with_state(ctx)
}

async fn process(
    State(ctx): State<Arc<FrontendCtx>>,
    mut multipart: Multipart,
) -> Result<Response, FrontendError> {
    let mut metadata: Option<String> = None;
    let mut upload: Option<(String, axum::body::Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| FrontendError::Upload(err.to_string()))?
    {
        match field.name() {
            Some("metadata") => {
                metadata = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| FrontendError::Upload(err.to_string()))?,
                );
            }
            Some("image") => {
                let name = field.file_name().map(str::to_owned).unwrap_or_default();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| FrontendError::Upload(err.to_string()))?;
                upload = Some((name, bytes));
            }
            other => debug!(field = ?other, "ignoring unknown multipart field"),
        }
    }

    let raw_metadata = metadata.ok_or(FrontendError::MissingMetadata)?;
    let metadata: Metadata = serde_json::from_str(&raw_metadata)
        .map_err(|err| FrontendError::InvalidMetadata(err.to_string()))?;
    debug!(?metadata, "received metadata");

    // Save the upload under its original (sanitized) filename; that name
    // is the stable key for later r/a commands.
    let mut num_images = None;
    if let Some((raw_name, bytes)) = upload {
        let (name, path) = ctx
            .layout
            .image_path(&raw_name)
            .ok_or_else(|| FrontendError::BadImageName(raw_name.clone()))?;
        std::fs::create_dir_all(ctx.layout.image_dir())?;
        tokio::fs::write(&path, &bytes).await?;
        info!(image = %name, bytes = bytes.len(), "image saved");
        num_images = Some(ctx.layout.count_images()?);
    }

    let submission = Submission {
        task: metadata.task.as_deref().map(Task::parse),
        full_pipeline: metadata.full_pipeline,
        skip: metadata.skip,
        let_engine_choose_order: metadata.let_engine_choose_order,
        num_images,
    };

    // The rendezvous blocks until the worker answers; keep it off the
    // async runtime.
    let session = Arc::clone(&ctx.session);
    let outcome = tokio::task::spawn_blocking(move || {
        session.post_request(submission);
        session.wait_outcome()
    })
    .await
    .map_err(|err| FrontendError::Internal(err.to_string()))?;

    let (status, description, user_message, error) = match outcome {
        RequestOutcome::Completed {
            user_message,
            error,
        } => {
            let status = if error.is_some() { "error" } else { "success" };
            (status, "Processing complete", user_message, error)
        }
        RequestOutcome::NeedMoreImages { num_images } => (
            "success",
            "Waiting for more images",
            format!(
                "Please upload at least two images before reconstruction can start \
                 ({num_images} so far)."
            ),
            None,
        ),
        RequestOutcome::WorkerStopped => (
            "error",
            "Worker stopped",
            "The reconstruction worker has stopped. Restart the server to begin a new session."
                .to_string(),
            Some("worker stopped".to_string()),
        ),
    };

    let export_dir = latest_export_dir(&ctx.layout.ply_root());
    let (zip_bytes, files) = response::zip_artifacts(export_dir.as_deref())?;
    let json = serde_json::json!({
        "status": status,
        "description": description,
        "user_message": user_message,
        "error": error,
        "files": files,
    });
    let (content_type, body) = response::multipart_mixed(&json.to_string(), &zip_bytes);
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

#[cfg(test)]
#[path = "../frontend_tests.rs"]
mod tests;
