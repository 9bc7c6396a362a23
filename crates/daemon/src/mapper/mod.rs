// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The interactive incremental mapper.
//!
//! This loop grows the reconstruction image by image, pausing between
//! stages to consult the client through a [`StagePrompter`]. One
//! registration round walks `IMAGE_REGISTRATION → TRIANGULATION →
//! LOCAL_BA → GLOBAL_BA`; each performed stage exports a tagged snapshot.
//! The outer layers add sub-model bookkeeping (trial models, discard
//! rules) and the two-step relaxation of the initialization constraints
//! when a whole pass produces no model.
//!
//! Stage-transition bookkeeping lives in `plx_core::Stage`; this module
//! only raises events and drives the engine from the resulting stage.

use crate::exporter::{ArtifactExporter, ExportTag};
use plx_core::{
    ImageId, MapperOptions, MapperStatus, SessionState, Stage, StageEvent,
    MIN_NUM_INITIAL_REG_TRIALS,
};
use plx_engine::backend::{EngineError, MapperBackend};
use plx_engine::reconstruction::{ModelError, Reconstruction};
use plx_engine::ReconstructionManager;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from a mapping run.
#[derive(Debug, Error)]
pub enum MapperError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Model(#[from] ModelError),

    /// The manager held more than one model at resume time.
    #[error("can only resume from a single reconstruction, but {0} are held")]
    MultipleModels(usize),
}

/// Who answers the per-stage skip question.
///
/// The session implementation blocks on the client rendezvous; the
/// autopilot answers without blocking and is used for the bootstrap
/// reconstruction (and non-interactive tests).
pub trait StagePrompter: Sync {
    /// Returns whether to skip the stage.
    fn decide(&self, stage: Stage, recommended: bool) -> bool;

    /// Publish a free-text note ahead of the next prompt.
    fn announce(&self, note: &str);
}

/// Performs exactly the recommended stages; never blocks.
pub struct AutoPilot;

impl StagePrompter for AutoPilot {
    fn decide(&self, _stage: Stage, recommended: bool) -> bool {
        !recommended
    }

    fn announce(&self, _note: &str) {}
}

impl StagePrompter for SessionState {
    fn decide(&self, stage: Stage, recommended: bool) -> bool {
        self.stage_prompt(stage, recommended)
    }

    fn announce(&self, note: &str) {
        self.append_message(note);
    }
}

/// One mapping run over a target image set.
pub struct MapperRun<'a> {
    pub backend: &'a mut dyn MapperBackend,
    pub exporter: &'a mut ArtifactExporter,
    pub prompter: &'a dyn StagePrompter,
    pub image_dir: &'a Path,
    /// Filter the target set through the engine's preferred order each
    /// round instead of keeping caller order.
    pub let_engine_choose_order: bool,
}

impl MapperRun<'_> {
    /// Run mapping to completion, relaxing the initialization
    /// constraints up to twice if no model emerges.
    pub fn run(
        &mut self,
        manager: &mut ReconstructionManager,
        targets: &[ImageId],
        options: &MapperOptions,
    ) -> Result<(), MapperError> {
        let mut options = options.clone();
        self.reconstruct(manager, targets, &options)?;

        if manager.is_empty() {
            info!("relaxing the initialization constraints (inliers)");
            options.relax_min_num_inliers();
            self.reconstruct(manager, targets, &options)?;
        }
        if manager.is_empty() {
            info!("relaxing the initialization constraints (triangulation angle)");
            options.relax_min_tri_angle();
            self.reconstruct(manager, targets, &options)?;
        }
        Ok(())
    }

    /// One pass: try up to `init_num_trials` sub-models and keep what
    /// the discard rules allow.
    fn reconstruct(
        &mut self,
        manager: &mut ReconstructionManager,
        targets: &[ImageId],
        options: &MapperOptions,
    ) -> Result<(), MapperError> {
        let initial_given = manager.size() > 0;
        if manager.size() > 1 {
            return Err(MapperError::MultipleModels(manager.size()));
        }

        for trial in 0..options.init_num_trials {
            let idx = if !initial_given || trial > 0 {
                manager.add()
            } else {
                0
            };
            let Some(recon) = manager.get_mut(idx) else {
                break;
            };
            let status = self.reconstruct_sub_model(recon, targets, options)?;
            debug!(?status, trial, "sub-model finished");

            match status {
                MapperStatus::Interrupted => {
                    self.backend.end_reconstruction(false);
                }
                MapperStatus::NoInitialPair | MapperStatus::BadInitialPair => {
                    self.backend.end_reconstruction(true);
                    manager.delete(idx);
                    if options.is_initial_pair_provided() {
                        return Ok(());
                    }
                }
                MapperStatus::Success => {
                    let total_reg = self.backend.num_total_reg_images();
                    let num_db_images = self.backend.num_images();
                    let min_model_size = options
                        .min_model_size
                        .min((0.8 * num_db_images as f64) as usize);
                    let reg_images = manager
                        .get(idx)
                        .map(Reconstruction::num_reg_images)
                        .unwrap_or(0);

                    if options.multiple_models
                        && manager.size() > 1
                        && (reg_images < min_model_size || reg_images == 0)
                    {
                        self.backend.end_reconstruction(true);
                        manager.delete(idx);
                    } else {
                        self.backend.end_reconstruction(false);
                    }

                    if initial_given
                        || !options.multiple_models
                        || manager.size() >= options.max_num_models
                        || total_reg >= num_db_images.saturating_sub(1)
                    {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    /// The per-sub-model stage loop.
    fn reconstruct_sub_model(
        &mut self,
        recon: &mut Reconstruction,
        targets: &[ImageId],
        options: &MapperOptions,
    ) -> Result<MapperStatus, MapperError> {
        self.backend.begin_reconstruction(recon);
        if recon.num_reg_images() == 0 {
            let status = self.initialize(recon, options)?;
            if status != MapperStatus::Success {
                return Ok(status);
            }
        }

        let mut snapshot_prev_num_reg_images = recon.num_reg_images();
        let mut ba_prev_num_reg_images = recon.num_reg_images();
        let mut ba_prev_num_points = recon.num_points3d();
        let mut reg_next_success = true;
        let mut prev_reg_next_success = true;
        let mut pending: Vec<ImageId> = targets
            .iter()
            .copied()
            .filter(|&id| !recon.is_registered(id))
            .collect();
        debug!(?pending, "images to register");

        loop {
            let mut stage = Stage::Wait.advance(StageEvent::Begin);
            if !(reg_next_success || prev_reg_next_success) {
                break;
            }
            prev_reg_next_success = reg_next_success;
            reg_next_success = false;

            if self.let_engine_choose_order {
                let preferred = self.backend.next_images(recon, options);
                pending = preferred
                    .into_iter()
                    .filter(|id| pending.contains(id))
                    .collect();
                debug!(?pending, "pending set reordered by engine");
            }
            if pending.is_empty() {
                break;
            }

            let mut registered: Option<(usize, ImageId)> = None;
            for (trial, &candidate) in pending.iter().enumerate() {
                info!(
                    image = %candidate,
                    position = recon.num_reg_images() + 1,
                    "registering image"
                );
                info!(
                    visible = self.backend.num_visible_points3d(recon, candidate),
                    observations = self.backend.num_observations(candidate),
                    "candidate visibility"
                );
                if self.backend.register_next_image(recon, options, candidate) {
                    reg_next_success = true;
                    registered = Some((trial, candidate));
                    break;
                }
                info!("could not register, trying another image");
                // A stuck initialization is abandoned rather than ground
                // through every remaining candidate.
                if trial >= MIN_NUM_INITIAL_REG_TRIALS
                    && recon.num_reg_images() < options.min_model_size
                {
                    stage = stage.advance(StageEvent::Abandoned);
                    break;
                }
            }

            if let Some((trial_idx, image_id)) = registered {
                pending.remove(trial_idx);
                self.exporter
                    .export(recon, ExportTag::Stage(Stage::ImageRegistration))?;
                stage = stage.advance(StageEvent::Registered);
                info!(summary = %recon.summary(), "reconstruction after registering image");

                // TRIANGULATION
                let skip = self.prompter.decide(stage, true);
                if skip {
                    info!("skipping triangulation");
                } else {
                    let added = self.backend.triangulate_image(recon, options, image_id);
                    self.exporter.export(recon, ExportTag::Stage(stage))?;
                    info!(added, summary = %recon.summary(), "reconstruction after triangulation");
                }
                stage = stage.advance(if skip {
                    StageEvent::Skipped
                } else {
                    StageEvent::Performed
                });

                // LOCAL_BA
                let skip = self.prompter.decide(stage, true);
                if skip {
                    info!("skipped local bundle adjustment, continuing with global");
                } else {
                    self.backend.local_refine(recon, options, image_id)?;
                    self.exporter.export(recon, ExportTag::Stage(stage))?;
                    info!(summary = %recon.summary(), "reconstruction after local bundle adjustment");
                }
                stage = stage.advance(if skip {
                    StageEvent::Skipped
                } else {
                    StageEvent::Performed
                });

                // GLOBAL_BA
                let recommended = self.backend.check_run_global_refinement(
                    recon,
                    ba_prev_num_reg_images,
                    ba_prev_num_points,
                );
                let skip = self.prompter.decide(stage, recommended);
                if skip {
                    info!("skipping global bundle adjustment");
                } else {
                    self.global_refinement(recon, options)?;
                    ba_prev_num_points = recon.num_points3d();
                    ba_prev_num_reg_images = recon.num_reg_images();
                    info!(summary = %recon.summary(), "reconstruction after global bundle adjustment");
                }
                stage = stage.advance(if skip {
                    StageEvent::Skipped
                } else {
                    StageEvent::Performed
                });
                debug!(%stage, "round complete");

                if options.extract_colors {
                    self.backend.extract_colors(self.image_dir, image_id, recon);
                }
                if options.snapshot_images_freq > 0
                    && recon.num_reg_images()
                        >= options.snapshot_images_freq + snapshot_prev_num_reg_images
                {
                    snapshot_prev_num_reg_images = recon.num_reg_images();
                    self.write_snapshot(recon, options)?;
                }
            }

            if self.backend.num_shared_reg_images() >= options.max_model_overlap {
                break;
            }
            if !reg_next_success && prev_reg_next_success {
                self.prompter.announce(
                    "Suggesting GLOBAL_BA because the last image registration failed.\n",
                );
                let skip = self.prompter.decide(Stage::GlobalBa, true);
                if !skip {
                    self.global_refinement(recon, options)?;
                    ba_prev_num_points = recon.num_points3d();
                    ba_prev_num_reg_images = recon.num_reg_images();
                    info!(summary = %recon.summary(), "reconstruction after global bundle adjustment");
                }
            }
        }

        // Final pass: refine once more when the model changed since the
        // last bundle adjustment.
        if recon.num_reg_images() >= 2
            && (recon.num_reg_images() != ba_prev_num_reg_images
                || recon.num_points3d() != ba_prev_num_points)
        {
            self.prompter
                .announce("Suggesting GLOBAL_BA because the reconstruction has changed.\n");
            let skip = self.prompter.decide(Stage::GlobalBa, true);
            if !skip {
                self.global_refinement(recon, options)?;
                info!(summary = %recon.summary(), "reconstruction after final global bundle adjustment");
            }
        }
        Ok(MapperStatus::Success)
    }

    /// Seed the model from an initial pair.
    fn initialize(
        &mut self,
        recon: &mut Reconstruction,
        options: &MapperOptions,
    ) -> Result<MapperStatus, MapperError> {
        let (id1, id2, geometry) = match (options.init_image_id1, options.init_image_id2) {
            (Some(id1), Some(id2)) => {
                if !self.backend.exists_image(id1) || !self.backend.exists_image(id2) {
                    info!(%id1, %id2, "provided initial pair does not exist");
                    return Ok(MapperStatus::BadInitialPair);
                }
                match self.backend.estimate_two_view(options, id1, id2) {
                    Some(geometry) => (id1, id2, geometry),
                    None => {
                        info!("provided pair is unsuitable for initialization");
                        return Ok(MapperStatus::BadInitialPair);
                    }
                }
            }
            _ => {
                info!("finding good initial image pair");
                match self.backend.find_initial_pair(recon, options) {
                    Some(found) => found,
                    None => {
                        info!("no good initial image pair found");
                        return Ok(MapperStatus::NoInitialPair);
                    }
                }
            }
        };

        info!(%id1, %id2, "initializing with image pair");
        self.backend
            .register_initial_pair(recon, options, &geometry, id1, id2)?;

        info!("global bundle adjustment");
        self.backend.global_refine(recon, options)?;
        recon.normalize();
        self.backend.filter_points(recon, options);
        self.backend.filter_images(recon, options);

        if recon.num_reg_images() == 0 || recon.num_points3d() == 0 {
            return Ok(MapperStatus::BadInitialPair);
        }
        if options.extract_colors {
            self.backend.extract_colors(self.image_dir, id1, recon);
        }
        Ok(MapperStatus::Success)
    }

    /// Global refinement plus the image filtering and snapshot export
    /// that always accompany it.
    fn global_refinement(
        &mut self,
        recon: &mut Reconstruction,
        options: &MapperOptions,
    ) -> Result<(), MapperError> {
        info!("retriangulation and global bundle adjustment");
        self.backend.global_refine(recon, options)?;
        self.backend.filter_images(recon, options);
        self.exporter
            .export(recon, ExportTag::Stage(Stage::GlobalBa))?;
        Ok(())
    }

    /// Timestamped full-model snapshot.
    fn write_snapshot(
        &self,
        recon: &Reconstruction,
        options: &MapperOptions,
    ) -> Result<(), MapperError> {
        let Some(root) = options.snapshot_path.as_ref() else {
            return Ok(());
        };
        let stamp = chrono::Utc::now().timestamp_millis();
        let dir = root.join(format!("{stamp:013}"));
        info!(dir = %dir.display(), "writing snapshot");
        recon.write_text(&dir)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "../mapper_tests.rs"]
mod tests;
