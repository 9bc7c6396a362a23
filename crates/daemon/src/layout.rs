// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk layout of one scene.
//!
//! ```text
//! <data_dir>/images/<scene>/<image>.jpg
//! <data_dir>/outputs/<scene>/
//!   pairs-sfm.txt  pairs-sfm_new.txt  features.h5  matches.h5
//!   reconstruction/{database.db, 0/}
//!   PLY/iter<N>[-<Stage>|-Check]/
//! ```
//!
//! The frontend writes only into the image directory; everything under
//! outputs/ belongs to the worker.

use plx_core::ImageName;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SceneLayout {
    data_dir: PathBuf,
    scene: String,
}

impl SceneLayout {
    pub fn new(data_dir: impl Into<PathBuf>, scene: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            scene: scene.into(),
        }
    }

    pub fn scene(&self) -> &str {
        &self.scene
    }

    pub fn image_dir(&self) -> PathBuf {
        self.data_dir.join("images").join(&self.scene)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.data_dir.join("outputs").join(&self.scene)
    }

    pub fn pairs_file(&self) -> PathBuf {
        self.output_dir().join("pairs-sfm.txt")
    }

    pub fn new_pairs_file(&self) -> PathBuf {
        self.output_dir().join("pairs-sfm_new.txt")
    }

    pub fn features_file(&self) -> PathBuf {
        self.output_dir().join("features.h5")
    }

    pub fn matches_file(&self) -> PathBuf {
        self.output_dir().join("matches.h5")
    }

    pub fn recon_dir(&self) -> PathBuf {
        self.output_dir().join("reconstruction")
    }

    pub fn database_path(&self) -> PathBuf {
        self.recon_dir().join("database.db")
    }

    /// Directory of the primary on-disk model. Its absence between
    /// requests tells the worker the model was wiped and the bootstrap
    /// must rerun.
    pub fn model_dir(&self) -> PathBuf {
        self.recon_dir().join("0")
    }

    pub fn ply_root(&self) -> PathBuf {
        self.output_dir().join("PLY")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.output_dir().join("snapshots")
    }

    /// Create the image and output directories.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.image_dir())?;
        std::fs::create_dir_all(self.recon_dir())?;
        std::fs::create_dir_all(self.ply_root())?;
        Ok(())
    }

    /// Number of regular files in the image directory.
    pub fn count_images(&self) -> std::io::Result<usize> {
        Ok(self.list_images()?.len())
    }

    /// Image filenames, sorted by name.
    pub fn list_images(&self) -> std::io::Result<Vec<ImageName>> {
        let dir = self.image_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(ImageName::new(entry.file_name().to_string_lossy().into_owned()));
            }
        }
        names.sort();
        Ok(names)
    }

    /// Where an uploaded file of the given (client-supplied) name lands.
    /// Path components are stripped so uploads cannot escape the image
    /// directory.
    pub fn image_path(&self, raw_name: &str) -> Option<(ImageName, PathBuf)> {
        let file_name = Path::new(raw_name).file_name()?.to_string_lossy().into_owned();
        if file_name.is_empty() || file_name == "." || file_name == ".." {
            return None;
        }
        let path = self.image_dir().join(&file_name);
        Some((ImageName::new(file_name), path))
    }
}

#[cfg(test)]
#[path = "layout_tests.rs"]
mod tests;
