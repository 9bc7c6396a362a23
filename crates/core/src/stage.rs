// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline stage state machine.
//!
//! One registration round of the incremental mapper moves through the
//! stages `ImageRegistration → Triangulation → LocalBa → GlobalBa → Wait`.
//! The transition logic is a pure function so the mapper can drive the
//! engine from its outputs while the bookkeeping stays independently
//! testable: the mapper raises a [`StageEvent`] and [`Stage::advance`]
//! yields the next stage.

use std::fmt;

/// A stage of one registration round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Between rounds; nothing in flight.
    Wait,
    /// Picking and registering the next image.
    ImageRegistration,
    /// Generating new 3D points from the freshly registered image.
    Triangulation,
    /// Bundle adjustment over the neighborhood of the new image.
    LocalBa,
    /// Bundle adjustment over the whole model.
    GlobalBa,
}

/// What just happened, as reported by the mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    /// A new registration round begins.
    Begin,
    /// An image was registered successfully.
    Registered,
    /// The candidate pool was exhausted or the sub-model was abandoned.
    Abandoned,
    /// The current stage ran to completion.
    Performed,
    /// The client (or the recommendation) skipped the current stage.
    Skipped,
}

impl Stage {
    /// Stage label used in prompts and export directory tags.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Wait => "WAIT",
            Stage::ImageRegistration => "IMAGE_REGISTRATION",
            Stage::Triangulation => "TRIANGULATION",
            Stage::LocalBa => "LOCAL_BA",
            Stage::GlobalBa => "GLOBAL_BA",
        }
    }

    /// Advance the state machine.
    ///
    /// `Performed` and `Skipped` both move to the next stage in the round:
    /// skipping triangulation still offers local BA, and skipping local BA
    /// still offers global BA. Events that make no sense in the current
    /// stage leave it unchanged.
    pub fn advance(self, event: StageEvent) -> Stage {
        use Stage::*;
        use StageEvent::*;
        match (self, event) {
            (Wait, Begin) => ImageRegistration,
            (ImageRegistration, Registered) => Triangulation,
            (ImageRegistration, Abandoned) => Wait,
            (Triangulation, Performed | Skipped) => LocalBa,
            (LocalBa, Performed | Skipped) => GlobalBa,
            (GlobalBa, Performed | Skipped) => Wait,
            (stage, _) => stage,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal status of one sub-model reconstruction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperStatus {
    /// The sub-model finished; keep it unless it is under-sized.
    Success,
    /// The run was interrupted; keep the partial model.
    Interrupted,
    /// No acceptable initial image pair was found.
    NoInitialPair,
    /// The provided or chosen initial pair failed to initialize a model.
    BadInitialPair,
}

impl MapperStatus {
    /// Whether the attempt failed during initialization.
    pub fn is_init_failure(self) -> bool {
        matches!(self, MapperStatus::NoInitialPair | MapperStatus::BadInitialPair)
    }
}

#[cfg(test)]
#[path = "stage_tests.rs"]
mod tests;
