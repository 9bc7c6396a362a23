// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Artifact export.
//!
//! Every export writes `reconstruction.ply` plus the three text files into
//! a directory under `PLY/`. Plain exports land in `iter<N>` and advance
//! the iteration counter; stage snapshots land in `iter<N>-<STAGE>` and
//! checkpoint exports (`e` task) in `iter<N>-Check`, both without touching
//! the counter. The frontend zips whatever [`latest_export_dir`] points
//! at.

use plx_core::Stage;
use plx_engine::reconstruction::{ModelError, Reconstruction};
use std::path::{Path, PathBuf};
use tracing::info;

/// Files the frontend offers back to the client.
pub const RESPONSE_FILES: [&str; 4] =
    ["cameras.txt", "images.txt", "points3D.txt", "reconstruction.ply"];

/// Kind of export, deciding directory suffix and counter behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportTag {
    /// End-of-task export; advances the iteration counter.
    Plain,
    /// Snapshot after a performed pipeline stage.
    Stage(Stage),
    /// Client-requested checkpoint (`e`).
    Check,
}

impl ExportTag {
    fn dir_name(self, iter: u32) -> String {
        match self {
            ExportTag::Plain => format!("iter{iter}"),
            ExportTag::Stage(stage) => format!("iter{iter}-{}", stage.name()),
            ExportTag::Check => format!("iter{iter}-Check"),
        }
    }

    /// Ordering rank among directories of the same iteration. A plain
    /// export supersedes the stage snapshots written during the same
    /// task; a checkpoint shares the counter with the following task's
    /// snapshots and ranks below them.
    fn rank(suffix: &str) -> u8 {
        match suffix {
            "" => 6,
            "GLOBAL_BA" => 5,
            "LOCAL_BA" => 4,
            "TRIANGULATION" => 3,
            "IMAGE_REGISTRATION" => 2,
            "Check" => 1,
            _ => 0,
        }
    }
}

/// Writer for the `PLY/iter*` directories.
#[derive(Debug)]
pub struct ArtifactExporter {
    ply_root: PathBuf,
    iter: u32,
}

impl ArtifactExporter {
    pub fn new(ply_root: impl Into<PathBuf>) -> Self {
        Self {
            ply_root: ply_root.into(),
            iter: 0,
        }
    }

    pub fn current_iter(&self) -> u32 {
        self.iter
    }

    /// Write one export. Returns the directory written.
    pub fn export(
        &mut self,
        recon: &Reconstruction,
        tag: ExportTag,
    ) -> Result<PathBuf, ModelError> {
        let dir = self.ply_root.join(tag.dir_name(self.iter));
        std::fs::create_dir_all(&dir)?;
        recon.write_ply(&dir.join("reconstruction.ply"))?;
        recon.write_text(&dir)?;
        info!(dir = %dir.display(), "exported reconstruction");
        if tag == ExportTag::Plain {
            self.iter += 1;
        }
        Ok(dir)
    }
}

/// The most recent export directory under `ply_root`, judged by iteration
/// number and within-iteration rank.
pub fn latest_export_dir(ply_root: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(ply_root).ok()?;
    let mut best: Option<(u32, u8, PathBuf)> = None;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some((iter, suffix)) = parse_dir_name(&name) else {
            continue;
        };
        let rank = ExportTag::rank(&suffix);
        let candidate = (iter, rank, entry.path());
        match &best {
            Some((best_iter, best_rank, _))
                if (*best_iter, *best_rank) >= (iter, rank) => {}
            _ => best = Some(candidate),
        }
    }
    best.map(|(_, _, path)| path)
}

fn parse_dir_name(name: &str) -> Option<(u32, String)> {
    let rest = name.strip_prefix("iter")?;
    let (digits, suffix) = match rest.find('-') {
        Some(pos) => (&rest[..pos], rest[pos + 1..].to_string()),
        None => (rest, String::new()),
    };
    digits.parse().ok().map(|iter| (iter, suffix))
}

#[cfg(test)]
#[path = "exporter_tests.rs"]
mod tests;
