// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::lifecycle::LifecycleError;

/// Server version (from Cargo.toml)
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Resolve data directory: PLX_DATA_DIR > XDG local data dir > ~/.local/share/plx
pub fn data_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("PLX_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Some(base) = dirs::data_local_dir() {
        return Ok(base.join("plx"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoDataDir)?;
    Ok(PathBuf::from(home).join(".local/share/plx"))
}

/// Scene name; one scene is active per process.
pub fn scene() -> String {
    std::env::var("PLX_SCENE").unwrap_or_else(|_| "run".to_string())
}

/// Listen address for the HTTP frontend.
pub fn http_addr() -> SocketAddr {
    std::env::var("PLX_HTTP_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 5000)))
}

/// Snapshot frequency for the mapper: write a timestamped model snapshot
/// every N newly registered images. 0 disables snapshotting.
pub fn snapshot_images_freq() -> usize {
    std::env::var("PLX_SNAPSHOT_FREQ")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Whether to read per-point colors from source images after registration.
pub fn extract_colors() -> bool {
    std::env::var("PLX_EXTRACT_COLORS")
        .map(|s| s != "0" && !s.eq_ignore_ascii_case("false"))
        .unwrap_or(true)
}
