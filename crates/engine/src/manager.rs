// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Holder for the reconstruction models of one session.
//!
//! The server is single-session: outside of a mapping run the manager
//! holds at most one model, and every handler asserts that before
//! exporting. During a run the mapper may add a trial sub-model and
//! delete it again when initialization fails.

use crate::reconstruction::{ModelError, Reconstruction};
use std::fs;
use std::path::Path;

#[derive(Debug, Default)]
pub struct ReconstructionManager {
    models: Vec<Reconstruction>,
}

impl ReconstructionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an empty model and return its index.
    pub fn add(&mut self) -> usize {
        self.models.push(Reconstruction::new());
        self.models.len() - 1
    }

    /// Append an existing model and return its index.
    pub fn push(&mut self, recon: Reconstruction) -> usize {
        self.models.push(recon);
        self.models.len() - 1
    }

    pub fn get(&self, idx: usize) -> Option<&Reconstruction> {
        self.models.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Reconstruction> {
        self.models.get_mut(idx)
    }

    /// Remove the model at `idx`; later indices shift down.
    pub fn delete(&mut self, idx: usize) {
        if idx < self.models.len() {
            self.models.remove(idx);
        }
    }

    pub fn size(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn clear(&mut self) {
        self.models.clear();
    }

    /// Write every model to `<dir>/<index>/` in text form.
    pub fn write(&self, dir: &Path) -> Result<(), ModelError> {
        for (idx, model) in self.models.iter().enumerate() {
            model.write_text(&dir.join(idx.to_string()))?;
        }
        Ok(())
    }

    /// Read models back from numeric subdirectories of `dir`, in index
    /// order starting at 0. Stops at the first missing index.
    pub fn read(dir: &Path) -> Result<Self, ModelError> {
        let mut manager = Self::new();
        for idx in 0.. {
            let model_dir = dir.join(idx.to_string());
            if !model_dir.is_dir() {
                break;
            }
            manager.push(Reconstruction::read_text(&model_dir)?);
        }
        Ok(manager)
    }

    /// Remove the on-disk form of model `idx` (used after `delete` when
    /// the model had been written).
    pub fn remove_on_disk(dir: &Path, idx: usize) -> std::io::Result<()> {
        let model_dir = dir.join(idx.to_string());
        if model_dir.exists() {
            fs::remove_dir_all(model_dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
