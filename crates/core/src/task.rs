// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client task command grammar.
//!
//! A task is a short command string submitted in request metadata:
//! `n` (map newly uploaded images), `r <names…>` (deregister images),
//! `a <names…>` (re-register images), `e` (export a checkpoint), `d`
//! (dense reconstruction, reserved), `q` (quit), `h` (help). Anything
//! else parses to [`Task::Invalid`] and is answered with a diagnostic
//! rather than an error — bad input never wedges the worker.

use crate::ImageName;
use std::fmt;

/// Help text returned for the `h` command and after invalid input.
pub const HELP_TEXT: &str = "\
Commands:
  n            map the newly uploaded image(s)
  r <names…>   deregister the named images from the model
  a <names…>   re-register previously deregistered images
  e            export the current model to a checkpoint directory
  d            dense reconstruction (not implemented)
  q            stop the reconstruction worker
  h            show this help
";

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// `n` — splice newly uploaded images into the model.
    NewImages,
    /// `r <names…>` — deregister the named images.
    Deregister(Vec<ImageName>),
    /// `a <names…>` — re-register the named images.
    Reregister(Vec<ImageName>),
    /// `e` — export a checkpoint without advancing the export counter.
    Export,
    /// `d` — reserved for dense reconstruction.
    Dense,
    /// `q` — terminate the worker loop.
    Quit,
    /// `h` — help.
    Help,
    /// Anything unrecognized; carries the raw input for the diagnostic.
    Invalid(String),
}

impl Task {
    /// Parse the wire form of a command.
    ///
    /// The leading word selects the command; `r` and `a` take the rest of
    /// the line as whitespace-separated image names. An empty name list is
    /// accepted here and rejected by the handler, which owns the
    /// validation message.
    pub fn parse(input: &str) -> Task {
        let trimmed = input.trim();
        let mut words = trimmed.split_whitespace();
        let head = words.next().unwrap_or("");
        let names = || words.clone().map(ImageName::from).collect::<Vec<_>>();
        match head {
            "n" => Task::NewImages,
            "r" => Task::Deregister(names()),
            "a" => Task::Reregister(names()),
            "e" => Task::Export,
            "d" => Task::Dense,
            "q" => Task::Quit,
            "h" => Task::Help,
            _ => Task::Invalid(trimmed.to_string()),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::NewImages => write!(f, "n"),
            Task::Deregister(names) => {
                write!(f, "r")?;
                for name in names {
                    write!(f, " {}", name)?;
                }
                Ok(())
            }
            Task::Reregister(names) => {
                write!(f, "a")?;
                for name in names {
                    write!(f, " {}", name)?;
                }
                Ok(())
            }
            Task::Export => write!(f, "e"),
            Task::Dense => write!(f, "d"),
            Task::Quit => write!(f, "q"),
            Task::Help => write!(f, "h"),
            Task::Invalid(raw) => write!(f, "{}", raw),
        }
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
