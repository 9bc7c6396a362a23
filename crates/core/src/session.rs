// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared session state and the frontend ↔ worker rendezvous.
//!
//! Exactly one [`SessionState`] exists per process. The HTTP frontend and
//! the reconstruction worker meet here: the frontend publishes a task and
//! blocks until the worker reports completion; the worker blocks between
//! tasks — and, in interactive mode, between pipeline stages — until the
//! frontend publishes again. All fields live behind a single mutex and
//! every observable transition of `new_request` / `recon_done` is
//! broadcast on the condition variable, so each waiter revalidates its
//! predicate after every wake.
//!
//! There are deliberately no timeouts: the protocol assumes a cooperative
//! client. A client that disappears mid-sequence leaves the worker parked
//! on the condvar until the process is restarted.

use crate::{Stage, Task};
use parking_lot::{Condvar, Mutex};

/// Fields carried by one `POST /process` request.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    /// Parsed task command; `None` for stage-verdict-only requests.
    pub task: Option<Task>,
    /// Perform every recommended stage without prompting.
    pub full_pipeline: bool,
    /// Verdict for the previously announced stage.
    pub skip: bool,
    /// Filter the caller's image set through the engine's preferred order.
    pub let_engine_choose_order: bool,
    /// Refreshed image-directory count, when an upload landed.
    pub num_images: Option<usize>,
}

/// The worker's view of an accepted request.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub task: Option<Task>,
    pub full_pipeline: bool,
    pub skip: bool,
    pub let_engine_choose_order: bool,
}

/// What the frontend observes once its wait predicate fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The worker finished the task (or published a stage prompt).
    Completed {
        user_message: String,
        error: Option<String>,
    },
    /// Fewer than two images on disk; the worker was never consulted.
    NeedMoreImages { num_images: usize },
    /// The worker loop has terminated (task `q`).
    WorkerStopped,
}

#[derive(Debug, Default)]
struct Shared {
    num_images: usize,
    new_request: bool,
    recon_done: bool,
    task: Option<Task>,
    full_pipeline: bool,
    skip: bool,
    let_engine_choose_order: bool,
    user_message: String,
    error: Option<String>,
    worker_exited: bool,
}

/// The process-wide rendezvous record.
pub struct SessionState {
    shared: Mutex<Shared>,
    cond: Condvar,
}

impl SessionState {
    pub fn new(num_images: usize) -> Self {
        Self {
            shared: Mutex::new(Shared {
                num_images,
                ..Shared::default()
            }),
            cond: Condvar::new(),
        }
    }

    /// Current image-directory count.
    pub fn num_images(&self) -> usize {
        self.shared.lock().num_images
    }

    // ----- frontend side -----

    /// Publish one request and wake the worker.
    pub fn post_request(&self, submission: Submission) {
        let mut shared = self.shared.lock();
        if submission.task.is_some() {
            shared.task = submission.task;
        }
        shared.full_pipeline = submission.full_pipeline;
        shared.skip = submission.skip;
        shared.let_engine_choose_order = submission.let_engine_choose_order;
        if let Some(count) = submission.num_images {
            shared.num_images = count;
        }
        shared.new_request = true;
        shared.recon_done = false;
        self.cond.notify_all();
    }

    /// Block until the worker answers, or until the short-circuit
    /// (`num_images < 2`) or worker shutdown applies.
    pub fn wait_outcome(&self) -> RequestOutcome {
        let mut shared = self.shared.lock();
        while !(shared.recon_done || shared.num_images < 2 || shared.worker_exited) {
            self.cond.wait(&mut shared);
        }
        if shared.recon_done {
            shared.recon_done = false;
            RequestOutcome::Completed {
                user_message: std::mem::take(&mut shared.user_message),
                error: shared.error.take(),
            }
        } else if shared.worker_exited {
            RequestOutcome::WorkerStopped
        } else {
            RequestOutcome::NeedMoreImages {
                num_images: shared.num_images,
            }
        }
    }

    // ----- worker side -----

    /// Park until at least `min` images are on disk. Returns the count.
    pub fn wait_for_images(&self, min: usize) -> usize {
        let mut shared = self.shared.lock();
        while shared.num_images < min {
            self.cond.wait(&mut shared);
        }
        shared.num_images
    }

    /// Park until the frontend posts a request, then accept it.
    ///
    /// Accepting clears `new_request` and takes the task out of the slot
    /// so a later stage-verdict round cannot re-deliver it.
    pub fn wait_request(&self) -> Accepted {
        let mut shared = self.shared.lock();
        while !shared.new_request {
            self.cond.wait(&mut shared);
        }
        shared.new_request = false;
        Accepted {
            task: shared.task.take(),
            full_pipeline: shared.full_pipeline,
            skip: shared.skip,
            let_engine_choose_order: shared.let_engine_choose_order,
        }
    }

    /// Announce a stage to the client and collect the skip verdict.
    ///
    /// With `full_pipeline` set there is no round trip: the stage is
    /// performed exactly when the engine recommends it, and only a note is
    /// appended. Otherwise the prompt is published as a completed
    /// response, and the worker parks until the next request arrives; that
    /// request's `skip` field is the verdict.
    pub fn stage_prompt(&self, stage: Stage, recommended: bool) -> bool {
        let mut shared = self.shared.lock();
        if shared.full_pipeline {
            shared.user_message.push_str(&format!(
                "Proceeding with {} (full pipeline requested).\n",
                stage
            ));
            return !recommended;
        }

        let prompt = if recommended {
            format!(
                "The mapper suggests performing {}.\nDo you want to skip this stage? (y/n)\n",
                stage
            )
        } else {
            format!(
                "The mapper suggests SKIPPING {}.\nDo you want to skip this stage? (y/n)\n",
                stage
            )
        };
        shared.user_message.push_str(&prompt);
        shared.recon_done = true;
        shared.new_request = false;
        self.cond.notify_all();

        while !shared.new_request {
            self.cond.wait(&mut shared);
        }
        shared.new_request = false;
        shared.skip
    }

    /// Append free text to the message buffer without completing.
    pub fn append_message(&self, message: &str) {
        let mut shared = self.shared.lock();
        shared.user_message.push_str(message);
    }

    /// Finish the current task: publish the message, set the ack bits,
    /// and wake the frontend.
    pub fn complete(&self, message: &str, error: Option<String>) {
        let mut shared = self.shared.lock();
        if !message.is_empty() {
            shared.user_message.push_str(message);
            if !message.ends_with('\n') {
                shared.user_message.push('\n');
            }
        }
        shared.error = error;
        shared.recon_done = true;
        shared.new_request = false;
        self.cond.notify_all();
    }

    /// Mark the worker loop as terminated and wake any waiters.
    pub fn mark_worker_exited(&self) {
        let mut shared = self.shared.lock();
        shared.worker_exited = true;
        self.cond.notify_all();
    }

    /// Whether the worker loop has terminated.
    pub fn worker_exited(&self) -> bool {
        self.shared.lock().worker_exited
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
