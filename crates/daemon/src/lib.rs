// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parallax daemon library
//!
//! Exposes the server's building blocks — scene layout, artifact
//! exporter, HTTP frontend, pipeline controller, incremental mapper —
//! for embedding and for the workspace-level scenario tests. The `plxd`
//! binary wires them together.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod controller;
pub mod env;
pub mod exporter;
pub mod frontend;
pub mod layout;
pub mod lifecycle;
pub mod mapper;

pub use controller::{ControllerError, PipelineController};
pub use exporter::{latest_export_dir, ArtifactExporter, ExportTag, RESPONSE_FILES};
pub use frontend::{router, FrontendCtx, Metadata};
pub use layout::SceneLayout;
pub use mapper::{AutoPilot, MapperError, MapperRun, StagePrompter};
