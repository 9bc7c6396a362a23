// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::Arc;
use std::thread;

fn submission(task: Option<Task>) -> Submission {
    Submission {
        task,
        ..Submission::default()
    }
}

#[test]
fn request_completes_after_worker_answers() {
    let session = Arc::new(SessionState::new(2));

    let worker = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            let accepted = session.wait_request();
            assert_eq!(accepted.task, Some(Task::Export));
            session.complete("export done", None);
        })
    };

    session.post_request(submission(Some(Task::Export)));
    let outcome = session.wait_outcome();
    match outcome {
        RequestOutcome::Completed {
            user_message,
            error,
        } => {
            assert!(user_message.contains("export done"));
            assert!(error.is_none());
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    worker.join().unwrap();
}

#[test]
fn too_few_images_short_circuits_without_worker() {
    let session = SessionState::new(1);
    session.post_request(submission(None));
    assert_eq!(
        session.wait_outcome(),
        RequestOutcome::NeedMoreImages { num_images: 1 }
    );
}

#[test]
fn wait_for_images_unblocks_on_upload() {
    let session = Arc::new(SessionState::new(1));

    let worker = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.wait_for_images(2))
    };

    let mut sub = submission(None);
    sub.num_images = Some(2);
    session.post_request(sub);
    assert_eq!(worker.join().unwrap(), 2);
}

#[test]
fn full_pipeline_answers_prompts_without_round_trip() {
    let session = SessionState::new(2);
    let mut sub = submission(Some(Task::NewImages));
    sub.full_pipeline = true;
    session.post_request(sub);
    let accepted = session.wait_request();
    assert!(accepted.full_pipeline);

    // Recommended stage is performed, unrecommended stage is skipped;
    // neither blocks on the client.
    assert!(!session.stage_prompt(Stage::Triangulation, true));
    assert!(session.stage_prompt(Stage::GlobalBa, false));
}

#[test]
fn interactive_prompt_round_trip_carries_verdict() {
    let session = Arc::new(SessionState::new(2));

    let worker = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            let _accepted = session.wait_request();
            let skip = session.stage_prompt(Stage::Triangulation, true);
            session.complete("round finished", None);
            skip
        })
    };

    session.post_request(submission(Some(Task::NewImages)));

    // First response is the stage prompt.
    match session.wait_outcome() {
        RequestOutcome::Completed { user_message, .. } => {
            assert!(user_message.contains("TRIANGULATION"));
            assert!(user_message.contains("skip this stage"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    // Second request carries the verdict.
    let mut verdict = submission(None);
    verdict.skip = true;
    session.post_request(verdict);

    match session.wait_outcome() {
        RequestOutcome::Completed { user_message, .. } => {
            assert!(user_message.contains("round finished"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert!(worker.join().unwrap(), "worker should observe skip=true");
}

#[test]
fn accepted_task_is_taken_out_of_the_slot() {
    let session = Arc::new(SessionState::new(2));
    session.post_request(submission(Some(Task::Help)));
    let first = session.wait_request();
    assert_eq!(first.task, Some(Task::Help));

    // A verdict-only follow-up must not re-deliver the task.
    session.post_request(submission(None));
    let second = session.wait_request();
    assert_eq!(second.task, None);
}

#[test]
fn worker_exit_wakes_pending_frontend() {
    let session = Arc::new(SessionState::new(2));

    let frontend = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            session.post_request(submission(Some(Task::NewImages)));
            session.wait_outcome()
        })
    };

    // Simulate the worker shutting down instead of answering.
    let _ = session.wait_request();
    session.mark_worker_exited();

    assert_eq!(frontend.join().unwrap(), RequestOutcome::WorkerStopped);
    assert!(session.worker_exited());
}

#[test]
fn error_is_surfaced_once() {
    let session = Arc::new(SessionState::new(2));

    let worker = {
        let session = Arc::clone(&session);
        thread::spawn(move || {
            let _ = session.wait_request();
            session.complete("bad input", Some("unknown image".to_string()));
        })
    };

    session.post_request(submission(Some(Task::Deregister(vec!["x.jpg".into()]))));
    match session.wait_outcome() {
        RequestOutcome::Completed { error, .. } => {
            assert_eq!(error.as_deref(), Some("unknown image"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    worker.join().unwrap();

    // Consumed: the next round starts clean.
    session.post_request(submission(Some(Task::Help)));
    let _ = session.wait_request();
    session.complete("ok", None);
    match session.wait_outcome() {
        RequestOutcome::Completed { error, .. } => assert!(error.is_none()),
        other => panic!("unexpected outcome: {:?}", other),
    }
}
