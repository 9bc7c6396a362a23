// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The reconstruction worker.
//!
//! One long-lived thread owns the reconstruction, the export counter, and
//! the processed/deregistered bookkeeping. It parks on the session
//! condvar until the frontend posts a task, dispatches the handler, and
//! always finishes the rendezvous — success or failure — so the client is
//! never left waiting.
//!
//! Bootstrap runs once at least two images exist: exhaustive pairs,
//! feature extraction, matching, database import, and a non-interactive
//! mapping pass. If the on-disk model directory disappears between
//! requests, the whole bootstrap reruns.

use crate::exporter::{ArtifactExporter, ExportTag};
use crate::layout::SceneLayout;
use crate::mapper::{AutoPilot, MapperError, MapperRun};
use plx_core::{
    Accepted, ImageId, ImageName, MapperOptions, SessionState, Task, HELP_TEXT,
};
use plx_engine::backend::{EngineError, SfmEngine};
use plx_engine::database::DatabaseError;
use plx_engine::reconstruction::{ModelError, Reconstruction};
use plx_engine::{import, pairs, Database, ReconstructionManager};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Errors from task handlers. All of them are reported to the client
/// through the rendezvous; none of them stop the worker.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error(transparent)]
    Mapper(#[from] MapperError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Validation(String),

    #[error("Reconstruction failed.")]
    ReconstructionFailed,
}

fn validation(message: impl Into<String>) -> ControllerError {
    ControllerError::Validation(message.into())
}

/// What a handler tells the worker loop to do next.
enum Flow {
    Message(String),
    Quit,
}

/// The worker.
pub struct PipelineController {
    session: Arc<SessionState>,
    engine: Arc<dyn SfmEngine>,
    layout: SceneLayout,
    options: MapperOptions,
    exporter: ArtifactExporter,
    manager: ReconstructionManager,
    processed_images: BTreeSet<ImageName>,
    de_reg_images: Vec<ImageId>,
    shutdown: CancellationToken,
}

impl PipelineController {
    pub fn new(
        session: Arc<SessionState>,
        engine: Arc<dyn SfmEngine>,
        layout: SceneLayout,
        options: MapperOptions,
        shutdown: CancellationToken,
    ) -> Self {
        let exporter = ArtifactExporter::new(layout.ply_root());
        Self {
            session,
            engine,
            layout,
            options,
            exporter,
            manager: ReconstructionManager::new(),
            processed_images: BTreeSet::new(),
            de_reg_images: Vec::new(),
            shutdown,
        }
    }

    /// Thread entry point. Returns when the client sends `q` or a fatal
    /// startup condition is hit.
    pub fn run(mut self) {
        info!(scene = self.layout.scene(), "reconstruction worker started");
        if !self.layout.image_dir().is_dir() {
            error!(
                dir = %self.layout.image_dir().display(),
                "image directory missing, refusing to start"
            );
            self.session.mark_worker_exited();
            self.shutdown.cancel();
            return;
        }

        info!("waiting for sufficient images");
        self.session.wait_for_images(2);
        self.bootstrap();

        loop {
            debug!("waiting for new request");
            let accepted = self.session.wait_request();

            if !self.layout.model_dir().is_dir() {
                debug!(
                    dir = %self.layout.model_dir().display(),
                    "could not find reconstruction on disk"
                );
                info!("making reconstruction from scratch");
                self.bootstrap();
                continue;
            }

            let Some(task) = accepted.task.clone() else {
                self.session.complete("Please specify your next action.", None);
                continue;
            };

            match self.dispatch(task, &accepted) {
                Ok(Flow::Quit) => {
                    self.session.complete("Shutting down.", None);
                    break;
                }
                Ok(Flow::Message(message)) => {
                    self.session.complete(
                        &format!("{message}\nPlease specify your next action."),
                        None,
                    );
                }
                Err(err) => {
                    error!(error = %err, "task failed");
                    let description = err.to_string();
                    self.session.complete(&description, Some(description.clone()));
                }
            }
        }

        info!("reconstruction worker stopped");
        self.session.mark_worker_exited();
        self.shutdown.cancel();
    }

    /// Initial reconstruction plus its rendezvous completion.
    fn bootstrap(&mut self) {
        match self.initial_step() {
            Ok(()) => {
                self.session
                    .complete("Your initial reconstruction is ready.", None);
            }
            Err(err) => {
                error!(error = %err, "initial reconstruction failed");
                self.session
                    .complete("Reconstruction failed.", Some(err.to_string()));
            }
        }
    }

    /// Exhaustive pairs → features → matches → database → full mapping.
    fn initial_step(&mut self) -> Result<(), ControllerError> {
        let references = self.layout.list_images()?;
        info!(images = references.len(), "starting initial reconstruction");
        self.layout.ensure_dirs()?;
        self.processed_images = references.iter().cloned().collect();

        let pair_list = pairs::exhaustive_pairs(&references);
        pairs::write_pairs(&self.layout.pairs_file(), &pair_list)?;
        self.engine.extract_features(
            &self.layout.image_dir(),
            &references,
            &self.layout.features_file(),
        )?;
        self.engine.match_features(
            &self.layout.pairs_file(),
            &self.layout.features_file(),
            &self.layout.matches_file(),
            false,
        )?;
        import::initial_import(
            self.engine.as_ref(),
            &self.layout.database_path(),
            &self.layout.image_dir(),
            &references,
            &self.layout.pairs_file(),
            &self.layout.features_file(),
            &self.layout.matches_file(),
        )?;

        self.manager.clear();
        self.de_reg_images.clear();
        let targets: Vec<ImageId> = {
            let db = Database::open(&self.layout.database_path())?;
            db.image_ids()?.values().copied().collect()
        };
        {
            let mut backend = self
                .engine
                .open_mapper(&self.layout.database_path(), &self.layout.image_dir())?;
            let image_dir = self.layout.image_dir();
            let mut run = MapperRun {
                backend: backend.as_mut(),
                exporter: &mut self.exporter,
                prompter: &AutoPilot,
                image_dir: &image_dir,
                let_engine_choose_order: false,
            };
            run.run(&mut self.manager, &targets, &self.options)?;
        }
        if self.manager.is_empty() {
            return Err(ControllerError::ReconstructionFailed);
        }

        self.manager.write(&self.layout.recon_dir())?;
        self.export_current(ExportTag::Plain)?;
        if let Some(recon) = self.manager.get(0) {
            info!(summary = %recon.summary(), "reconstruction statistics");
        }
        Ok(())
    }

    fn dispatch(&mut self, task: Task, accepted: &Accepted) -> Result<Flow, ControllerError> {
        match task {
            Task::NewImages => self.handle_new_images(accepted).map(Flow::Message),
            Task::Deregister(names) => self.handle_deregister(&names).map(Flow::Message),
            Task::Reregister(names) => {
                self.handle_reregister(&names, accepted).map(Flow::Message)
            }
            Task::Export => self.handle_export().map(Flow::Message),
            Task::Dense => Ok(Flow::Message(
                "Dense reconstruction is not implemented.".to_string(),
            )),
            Task::Quit => {
                info!("quit requested");
                Ok(Flow::Quit)
            }
            Task::Help => Ok(Flow::Message(HELP_TEXT.to_string())),
            Task::Invalid(raw) => {
                warn!(input = %raw, "invalid command");
                Ok(Flow::Message(format!(
                    "Invalid command {raw:?}. Send 'h' for help.\n{HELP_TEXT}"
                )))
            }
        }
    }

    /// `n`: splice newly uploaded images into the database and register
    /// them interactively.
    fn handle_new_images(&mut self, accepted: &Accepted) -> Result<String, ControllerError> {
        info!("adding new images");
        let references = self.layout.list_images()?;
        let new_images: Vec<ImageName> = references
            .iter()
            .filter(|name| !self.processed_images.contains(*name))
            .cloned()
            .collect();
        if new_images.is_empty() {
            return Ok("No new images found in the image directory.".to_string());
        }
        info!(?new_images, "resuming from existing pairs file");

        let new_pair_list = pairs::new_image_pairs(&new_images, &references);
        pairs::write_pairs(&self.layout.new_pairs_file(), &new_pair_list)?;
        pairs::append_pairs(&self.layout.pairs_file(), &self.layout.new_pairs_file())?;

        // Extraction runs over every image; per-image idempotence makes
        // this a no-op for the ones already extracted.
        self.engine.extract_features(
            &self.layout.image_dir(),
            &references,
            &self.layout.features_file(),
        )?;
        self.engine.match_features(
            &self.layout.new_pairs_file(),
            &self.layout.features_file(),
            &self.layout.matches_file(),
            true,
        )?;
        import::incremental_import(
            self.engine.as_ref(),
            &self.layout.database_path(),
            &self.layout.image_dir(),
            &new_images,
            &self.layout.new_pairs_file(),
            &self.layout.features_file(),
            &self.layout.matches_file(),
        )?;

        let ids = {
            let db = Database::open(&self.layout.database_path())?;
            db.image_ids()?
        };
        let mut targets = Vec::with_capacity(new_images.len());
        for name in &new_images {
            let id = ids
                .get(name)
                .copied()
                .ok_or_else(|| validation(format!("image {name} missing from database")))?;
            targets.push(id);
        }

        self.run_interactive_mapper(&targets, accepted)?;
        self.processed_images.extend(new_images.iter().cloned());
        self.persist_and_export()?;

        Ok(format!(
            "Added {} new image(s).\n{}",
            new_images.len(),
            self.current_summary()
        ))
    }

    /// `r <names…>`: drop images from the model.
    fn handle_deregister(&mut self, names: &[ImageName]) -> Result<String, ControllerError> {
        info!("removing specified images");
        if names.is_empty() {
            return Err(validation("no image names given; usage: r <names…>"));
        }
        let (targets, warning) = self.resolve_names(names)?;
        for id in &targets {
            if self.de_reg_images.contains(id) {
                return Err(validation(format!("image id {id} is already deregistered")));
            }
        }

        {
            let recon = self
                .manager
                .get_mut(0)
                .ok_or_else(|| validation("no active reconstruction"))?;
            for id in &targets {
                info!(image = %id, "deregistering image");
                recon.deregister(*id);
                self.de_reg_images.push(*id);
            }
        }
        self.persist_and_export()?;

        Ok(format!(
            "{warning}Deregistered {} image(s).\n{}",
            targets.len(),
            self.current_summary()
        ))
    }

    /// `a <names…>`: re-register previously deregistered images.
    fn handle_reregister(
        &mut self,
        names: &[ImageName],
        accepted: &Accepted,
    ) -> Result<String, ControllerError> {
        info!("re-registering specified images");
        if names.is_empty() {
            return Err(validation("no image names given; usage: a <names…>"));
        }
        let (targets, warning) = self.resolve_names(names)?;
        for id in &targets {
            if !self.de_reg_images.contains(id) {
                return Err(validation(format!("image id {id} is not deregistered")));
            }
        }
        self.de_reg_images.retain(|id| !targets.contains(id));

        self.run_interactive_mapper(&targets, accepted)?;

        // The engine may have restarted from scratch and registered
        // images the caller did not name; trust its registered set, not
        // our bookkeeping.
        let registered: HashSet<ImageId> = self
            .manager
            .get(0)
            .map(|recon| recon.reg_image_ids().into_iter().collect())
            .unwrap_or_default();
        let ids = {
            let db = Database::open(&self.layout.database_path())?;
            db.image_ids()?
        };
        self.de_reg_images = ids
            .values()
            .filter(|id| !registered.contains(id))
            .copied()
            .collect();
        debug!(de_reg = ?self.de_reg_images, "deregistered set after reconciliation");

        self.persist_and_export()?;
        Ok(format!(
            "{warning}Re-registered {} image(s).\n{}",
            targets.len(),
            self.current_summary()
        ))
    }

    /// `e`: checkpoint export; the main counter stays put.
    fn handle_export(&mut self) -> Result<String, ControllerError> {
        info!("exporting checkpoint");
        self.export_current(ExportTag::Check)?;
        Ok("Checkpoint exported.".to_string())
    }

    /// Map names to ids, dropping unknown ones with a client-visible
    /// warning.
    fn resolve_names(
        &self,
        names: &[ImageName],
    ) -> Result<(Vec<ImageId>, String), ControllerError> {
        let ids = {
            let db = Database::open(&self.layout.database_path())?;
            db.image_ids()?
        };
        let mut targets = Vec::new();
        let mut unknown = Vec::new();
        for name in names {
            match ids.get(name) {
                Some(&id) => targets.push(id),
                None => unknown.push(name.to_string()),
            }
        }
        let warning = if unknown.is_empty() {
            String::new()
        } else {
            warn!(?unknown, "some image names were invalid and have been excluded");
            format!("Warning: unknown image name(s): {}.\n", unknown.join(", "))
        };
        if targets.is_empty() {
            return Err(validation("none of the given image names exist"));
        }
        Ok((targets, warning))
    }

    /// Run the interactive mapper over `targets` with the client's
    /// per-request flags.
    fn run_interactive_mapper(
        &mut self,
        targets: &[ImageId],
        accepted: &Accepted,
    ) -> Result<(), ControllerError> {
        let mut backend = self
            .engine
            .open_mapper(&self.layout.database_path(), &self.layout.image_dir())?;
        let image_dir = self.layout.image_dir();
        let mut run = MapperRun {
            backend: backend.as_mut(),
            exporter: &mut self.exporter,
            prompter: self.session.as_ref(),
            image_dir: &image_dir,
            let_engine_choose_order: accepted.let_engine_choose_order,
        };
        run.run(&mut self.manager, targets, &self.options)?;
        if self.manager.is_empty() {
            return Err(ControllerError::ReconstructionFailed);
        }
        Ok(())
    }

    /// Persist the model directory and write the end-of-task export.
    fn persist_and_export(&mut self) -> Result<(), ControllerError> {
        self.manager.write(&self.layout.recon_dir())?;
        self.export_current(ExportTag::Plain)
    }

    /// Export the single active model; more than one is a handler-boundary
    /// violation.
    fn export_current(&mut self, tag: ExportTag) -> Result<(), ControllerError> {
        if self.manager.size() > 1 {
            return Err(validation(format!(
                "expected at most one reconstruction, found {}",
                self.manager.size()
            )));
        }
        let recon = self
            .manager
            .get(0)
            .ok_or_else(|| validation("no active reconstruction"))?;
        self.exporter.export(recon, tag)?;
        Ok(())
    }

    fn current_summary(&self) -> String {
        self.manager
            .get(0)
            .map(Reconstruction::summary)
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "../controller_tests.rs"]
mod tests;
