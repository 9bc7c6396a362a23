// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tuning knobs for the incremental mapper.

use crate::ImageId;
use std::path::PathBuf;

/// Candidates tried before an under-sized sub-model is abandoned.
pub const MIN_NUM_INITIAL_REG_TRIALS: usize = 30;

/// Options driving one mapping run.
///
/// Defaults follow the conventional incremental-SfM values. The two
/// `init_min_*` thresholds are the ones relaxed (halved) when a run fails
/// to produce any model.
#[derive(Debug, Clone)]
pub struct MapperOptions {
    /// Minimum two-view inliers for an acceptable initial pair.
    pub init_min_num_inliers: u32,
    /// Minimum triangulation angle (degrees) for the initial pair.
    pub init_min_tri_angle: f64,
    /// Caller-provided initial pair, if any.
    pub init_image_id1: Option<ImageId>,
    pub init_image_id2: Option<ImageId>,
    /// Sub-model attempts per reconstruct pass.
    pub init_num_trials: usize,
    /// Below this registered-image count a sub-model is under-sized.
    pub min_model_size: usize,
    /// Stop a sub-model once this many registered images are shared
    /// with other sub-models.
    pub max_model_overlap: usize,
    /// Allow more than one sub-model per run.
    pub multiple_models: bool,
    /// Upper bound on concurrent sub-models when `multiple_models` is on.
    pub max_num_models: usize,
    /// Read per-point RGB from the source image after registration.
    pub extract_colors: bool,
    /// Write a timestamped model snapshot every N newly registered
    /// images; 0 disables snapshotting.
    pub snapshot_images_freq: usize,
    /// Where timestamped snapshots go.
    pub snapshot_path: Option<PathBuf>,
    /// Local bundle-adjustment refinement iterations.
    pub ba_local_max_refinements: u32,
    /// Global bundle-adjustment refinement iterations.
    pub ba_global_max_refinements: u32,
}

impl Default for MapperOptions {
    fn default() -> Self {
        Self {
            init_min_num_inliers: 100,
            init_min_tri_angle: 16.0,
            init_image_id1: None,
            init_image_id2: None,
            init_num_trials: 2,
            min_model_size: 10,
            max_model_overlap: 20,
            multiple_models: false,
            max_num_models: 50,
            extract_colors: true,
            snapshot_images_freq: 0,
            snapshot_path: None,
            ba_local_max_refinements: 2,
            ba_global_max_refinements: 5,
        }
    }
}

impl MapperOptions {
    /// Whether the caller pinned the initial pair.
    pub fn is_initial_pair_provided(&self) -> bool {
        self.init_image_id1.is_some() && self.init_image_id2.is_some()
    }

    /// First relaxation: halve the inlier threshold.
    pub fn relax_min_num_inliers(&mut self) {
        self.init_min_num_inliers /= 2;
    }

    /// Second relaxation: halve the triangulation-angle threshold.
    pub fn relax_min_tri_angle(&mut self) {
        self.init_min_tri_angle /= 2.0;
    }
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;
