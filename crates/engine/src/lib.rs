// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! plx-engine: the SfM engine seam and its on-disk companions.
//!
//! Computer vision is out of scope for this workspace; this crate defines
//! the trait boundary the daemon drives ([`SfmEngine`], [`MapperBackend`])
//! together with the pieces the server owns outright: the SQLite
//! reconstruction database, the pairs-file codec, the in-memory
//! [`Reconstruction`] model with its export formats, the model manager,
//! and the import workflows that splice images into the database.
//!
//! [`synthetic::SyntheticEngine`] is a deterministic built-in engine: it
//! exercises every seam end-to-end without any computer vision, and is
//! what `plxd` runs until a real engine binding is configured. Tests use
//! it for the same reason.

pub mod backend;
pub mod database;
pub mod import;
pub mod manager;
pub mod pairs;
pub mod reconstruction;
pub mod synthetic;

pub use backend::{
    camera_model, CameraInfo, EngineError, Keypoint, MapperBackend, SfmEngine, TwoViewGeometry,
};
pub use database::{pair_id, Database, DatabaseError, MAX_IMAGE_ID};
pub use manager::ReconstructionManager;
pub use reconstruction::{Camera, ModelError, Point3d, Pose, Reconstruction, RegImage};
