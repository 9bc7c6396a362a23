// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process startup: directory preparation and single-instance locking.

use crate::layout::SceneLayout;
use fs2::FileExt;
use std::fs::File;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine a data directory (set PLX_DATA_DIR)")]
    NoDataDir,

    #[error("another plxd instance is already running (lock: {0})")]
    AlreadyRunning(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Take the per-data-dir lock file. The lock lives as long as the
/// returned handle.
pub fn acquire_lock(data_dir: &Path) -> Result<File, LifecycleError> {
    std::fs::create_dir_all(data_dir)?;
    let lock_path = data_dir.join("plxd.lock");
    let file = File::create(&lock_path)?;
    file.try_lock_exclusive()
        .map_err(|_| LifecycleError::AlreadyRunning(lock_path.display().to_string()))?;
    Ok(file)
}

/// Prepare the scene for a fresh session: wipe stale outputs, create the
/// directory tree, and count the images already present.
///
/// The server is not durable across restarts; a leftover output
/// directory belongs to a dead session and is discarded.
pub fn prepare_scene(layout: &SceneLayout) -> Result<usize, LifecycleError> {
    let output_dir = layout.output_dir();
    if output_dir.exists() {
        warn!(dir = %output_dir.display(), "removing stale output directory");
        std::fs::remove_dir_all(&output_dir)?;
    }
    layout.ensure_dirs()?;
    let num_images = layout.count_images()?;
    info!(
        scene = layout.scene(),
        num_images, "scene prepared"
    );
    Ok(num_images)
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
