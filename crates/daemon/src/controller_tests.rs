// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::exporter::latest_export_dir;
use plx_core::{RequestOutcome, Submission};
use plx_engine::synthetic::SyntheticEngine;
use std::thread::JoinHandle;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    layout: SceneLayout,
    session: Arc<SessionState>,
    shutdown: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl Harness {
    /// Seed the image directory and start a worker over a SyntheticEngine.
    fn start(images: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let layout = SceneLayout::new(dir.path(), "test");
        layout.ensure_dirs().unwrap();
        for name in images {
            std::fs::write(layout.image_dir().join(name), b"jpegdata").unwrap();
        }

        let session = Arc::new(SessionState::new(images.len()));
        let shutdown = CancellationToken::new();
        let controller = PipelineController::new(
            Arc::clone(&session),
            Arc::new(SyntheticEngine::new()),
            layout.clone(),
            MapperOptions::default(),
            shutdown.clone(),
        );
        let worker = std::thread::spawn(move || controller.run());
        Self {
            _dir: dir,
            layout,
            session,
            shutdown,
            worker: Some(worker),
        }
    }

    fn add_image(&self, name: &str) {
        std::fs::write(self.layout.image_dir().join(name), b"jpegdata").unwrap();
    }

    fn request(&self, task: Option<&str>, full_pipeline: bool, skip: bool) -> RequestOutcome {
        self.session.post_request(Submission {
            task: task.map(Task::parse),
            full_pipeline,
            skip,
            let_engine_choose_order: false,
            num_images: Some(self.layout.count_images().unwrap()),
        });
        self.session.wait_outcome()
    }

    fn completed_message(&self, task: Option<&str>, full_pipeline: bool, skip: bool) -> String {
        match self.request(task, full_pipeline, skip) {
            RequestOutcome::Completed {
                user_message,
                error,
            } => {
                assert!(error.is_none(), "unexpected error: {error:?}");
                user_message
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    fn current_model(&self) -> Reconstruction {
        Reconstruction::read_text(&self.layout.model_dir()).unwrap()
    }

    fn quit(&mut self) {
        let message = self.completed_message(Some("q"), false, false);
        assert!(message.contains("Shutting down"));
        if let Some(worker) = self.worker.take() {
            worker.join().unwrap();
        }
        assert!(self.shutdown.is_cancelled());
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if self.worker.is_some() && !self.session.worker_exited() {
            let _ = self.request(Some("q"), false, false);
        }
    }
}

#[test]
fn bootstrap_builds_initial_model() {
    let harness = Harness::start(&["image01.jpg", "image02.jpg"]);

    // The worker boots on its own once two images exist; the pending
    // response carries the bootstrap message.
    match harness.session.wait_outcome() {
        RequestOutcome::Completed {
            user_message,
            error,
        } => {
            assert!(
                user_message.contains("initial reconstruction is ready"),
                "message: {user_message}"
            );
            assert!(error.is_none());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert!(harness.layout.model_dir().is_dir());
    assert!(harness.layout.database_path().exists());
    let latest = latest_export_dir(&harness.layout.ply_root()).unwrap();
    assert!(latest.ends_with("iter0"));
    assert!(latest.join("reconstruction.ply").exists());

    let model = harness.current_model();
    assert_eq!(model.num_reg_images(), 2);
}

#[test]
fn new_image_full_pipeline_registers_it() {
    let harness = Harness::start(&["image01.jpg", "image02.jpg"]);
    let _ = harness.session.wait_outcome();

    harness.add_image("image03.jpg");
    let message = harness.completed_message(Some("n"), true, false);
    assert!(message.contains("Added 1 new image(s)"), "message: {message}");
    // Full pipeline: no stage prompt was exchanged.
    assert!(!message.contains("skip this stage"));

    let db = Database::open(&harness.layout.database_path()).unwrap();
    assert_eq!(db.num_images().unwrap(), 3);

    let model = harness.current_model();
    assert_eq!(model.num_reg_images(), 3);
    let latest = latest_export_dir(&harness.layout.ply_root()).unwrap();
    assert!(latest.ends_with("iter1"));
}

#[test]
fn stage_by_stage_follows_client_verdicts() {
    let harness = Harness::start(&["image01.jpg", "image02.jpg"]);
    let _ = harness.session.wait_outcome();

    harness.add_image("image03.jpg");

    // The n task pauses at the triangulation prompt.
    let prompt = harness.completed_message(Some("n"), false, false);
    assert!(prompt.contains("TRIANGULATION"), "prompt: {prompt}");

    // Perform triangulation → local BA prompt.
    let prompt = harness.completed_message(None, false, false);
    assert!(prompt.contains("LOCAL_BA"), "prompt: {prompt}");

    // Skip local BA → global BA prompt.
    let prompt = harness.completed_message(None, false, true);
    assert!(prompt.contains("GLOBAL_BA"), "prompt: {prompt}");

    // Perform global BA → task completes.
    let done = harness.completed_message(None, false, false);
    assert!(done.contains("Added 1 new image(s)"), "message: {done}");

    let ply = harness.layout.ply_root();
    for tag in ["iter1-IMAGE_REGISTRATION", "iter1-TRIANGULATION", "iter1-GLOBAL_BA"] {
        assert!(ply.join(tag).is_dir(), "{tag} missing");
    }
    assert!(
        !ply.join("iter1-LOCAL_BA").exists(),
        "skipped stage must not export"
    );
}

#[test]
fn deregister_then_reregister_restores_the_model() {
    let harness = Harness::start(&["image01.jpg", "image02.jpg", "image03.jpg"]);
    let _ = harness.session.wait_outcome();
    assert_eq!(harness.current_model().num_reg_images(), 3);

    let message = harness.completed_message(Some("r image02.jpg"), false, false);
    assert!(message.contains("Deregistered 1 image(s)"), "message: {message}");
    assert_eq!(harness.current_model().num_reg_images(), 2);

    // Deregistering it again is a validation error, not a crash.
    match harness.request(Some("r image02.jpg"), false, false) {
        RequestOutcome::Completed { error, .. } => {
            let error = error.unwrap();
            assert!(error.contains("already deregistered"), "error: {error}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let message = harness.completed_message(Some("a image02.jpg"), true, false);
    assert!(message.contains("Re-registered 1 image(s)"), "message: {message}");
    let model = harness.current_model();
    assert_eq!(model.num_reg_images(), 3);

    // Reconciliation emptied the deregistered set, so a second `a` for
    // the same image reports it as not deregistered.
    match harness.request(Some("a image02.jpg"), true, false) {
        RequestOutcome::Completed { error, .. } => {
            let error = error.unwrap();
            assert!(error.contains("is not deregistered"), "error: {error}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn unknown_names_are_dropped_with_a_warning() {
    let harness = Harness::start(&["image01.jpg", "image02.jpg", "image03.jpg"]);
    let _ = harness.session.wait_outcome();

    let message = harness.completed_message(Some("r nope.jpg image03.jpg"), false, false);
    assert!(message.contains("unknown image name(s): nope.jpg"), "message: {message}");
    assert!(message.contains("Deregistered 1 image(s)"));
    assert_eq!(harness.current_model().num_reg_images(), 2);
}

#[test]
fn invalid_command_leaves_state_unchanged() {
    let harness = Harness::start(&["image01.jpg", "image02.jpg"]);
    let _ = harness.session.wait_outcome();
    let before = harness.current_model().num_reg_images();

    let message = harness.completed_message(Some("unknown"), false, false);
    assert!(message.contains("Invalid command"), "message: {message}");
    assert_eq!(harness.current_model().num_reg_images(), before);
}

#[test]
fn export_checkpoint_does_not_advance_the_counter() {
    let harness = Harness::start(&["image01.jpg", "image02.jpg"]);
    let _ = harness.session.wait_outcome();

    let message = harness.completed_message(Some("e"), false, false);
    assert!(message.contains("Checkpoint exported"), "message: {message}");
    let ply = harness.layout.ply_root();
    assert!(ply.join("iter1-Check").is_dir());
    assert!(!ply.join("iter2").exists());

    // A later plain export still lands on iter1.
    harness.add_image("image03.jpg");
    let _ = harness.completed_message(Some("n"), true, false);
    assert!(ply.join("iter1").is_dir());
}

#[test]
fn dense_reports_not_implemented() {
    let harness = Harness::start(&["image01.jpg", "image02.jpg"]);
    let _ = harness.session.wait_outcome();
    let message = harness.completed_message(Some("d"), false, false);
    assert!(message.contains("not implemented"), "message: {message}");
}

#[test]
fn missing_model_directory_triggers_rebootstrap() {
    let harness = Harness::start(&["image01.jpg", "image02.jpg"]);
    let _ = harness.session.wait_outcome();

    std::fs::remove_dir_all(harness.layout.model_dir()).unwrap();
    let message = harness.completed_message(Some("e"), false, false);
    assert!(
        message.contains("initial reconstruction is ready"),
        "message: {message}"
    );
    assert!(harness.layout.model_dir().is_dir());
}

#[test]
fn quit_stops_the_worker_and_wakes_late_requests() {
    let mut harness = Harness::start(&["image01.jpg", "image02.jpg"]);
    let _ = harness.session.wait_outcome();
    harness.quit();

    assert_eq!(
        harness.request(Some("h"), false, false),
        RequestOutcome::WorkerStopped
    );
}

#[test]
fn processed_set_grows_monotonically() {
    let harness = Harness::start(&["image01.jpg", "image02.jpg"]);
    let _ = harness.session.wait_outcome();

    harness.add_image("image03.jpg");
    let _ = harness.completed_message(Some("n"), true, false);
    harness.add_image("image04.jpg");
    let message = harness.completed_message(Some("n"), true, false);
    assert!(message.contains("Added 1 new image(s)"), "message: {message}");

    let db = Database::open(&harness.layout.database_path()).unwrap();
    assert_eq!(db.num_images().unwrap(), 4);
    assert_eq!(harness.current_model().num_reg_images(), 4);

    // Every registered or deregistered id exists in the database.
    let ids: std::collections::HashSet<ImageId> =
        db.image_ids().unwrap().values().copied().collect();
    for id in harness.current_model().reg_image_ids() {
        assert!(ids.contains(&id));
    }
}
