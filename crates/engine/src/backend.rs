// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The engine seam.
//!
//! Everything computer-vision-shaped sits behind two traits. [`SfmEngine`]
//! covers the batch operations on opaque on-disk stores: feature
//! extraction, descriptor matching, geometric verification, camera
//! inference, and read-through access to keypoints and matches during
//! database import. [`MapperBackend`] covers the per-model operations the
//! incremental mapper drives: initial-pair search, image registration,
//! triangulation, refinement, filtering, and its recommendation queries.
//!
//! The server never interprets feature or match data — it only moves it
//! between stores and the database — so the traits stay object-safe and
//! the daemon holds an `Arc<dyn SfmEngine>`.

use crate::Reconstruction;
use plx_core::{ImageId, ImageName, MapperOptions};
use std::path::Path;
use thiserror::Error;

/// Errors from engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("database error: {0}")]
    Database(#[from] crate::database::DatabaseError),

    #[error("store error: {0}")]
    Store(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Camera intrinsics inferred from an image file.
///
/// `model` is the conventional numeric camera-model code; `params` is the
/// model-specific parameter vector (focal length first).
#[derive(Debug, Clone, PartialEq)]
pub struct CameraInfo {
    pub model: i64,
    pub width: u32,
    pub height: u32,
    pub params: Vec<f64>,
    pub prior_focal_length: bool,
}

/// Conventional numeric camera-model codes.
pub mod camera_model {
    pub const SIMPLE_PINHOLE: i64 = 0;
    pub const PINHOLE: i64 = 1;
    pub const SIMPLE_RADIAL: i64 = 2;
    pub const RADIAL: i64 = 3;
    pub const OPENCV: i64 = 4;

    /// Text-export name for a model code.
    pub fn name(model: i64) -> &'static str {
        match model {
            SIMPLE_PINHOLE => "SIMPLE_PINHOLE",
            PINHOLE => "PINHOLE",
            SIMPLE_RADIAL => "SIMPLE_RADIAL",
            RADIAL => "RADIAL",
            OPENCV => "OPENCV",
            _ => "UNKNOWN",
        }
    }
}

/// A detected feature location in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
}

/// Result of two-view geometry estimation for a candidate initial pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwoViewGeometry {
    pub num_inliers: u32,
    pub tri_angle: f64,
}

/// Batch operations on the opaque feature/match stores.
pub trait SfmEngine: Send + Sync {
    /// Extract features for `images`, writing into the `features` store.
    /// Must be idempotent per image: re-running over already-extracted
    /// images is a no-op for them.
    fn extract_features(
        &self,
        image_dir: &Path,
        images: &[ImageName],
        features: &Path,
    ) -> Result<(), EngineError>;

    /// Match the pairs listed in `pairs`, writing into the `matches`
    /// store. With `overwrite`, existing entries for those pairs are
    /// replaced.
    fn match_features(
        &self,
        pairs: &Path,
        features: &Path,
        matches: &Path,
        overwrite: bool,
    ) -> Result<(), EngineError>;

    /// Run geometric verification over the listed pairs, recording the
    /// verified matches in the database.
    fn verify_matches(&self, database: &Path, pairs: &Path) -> Result<(), EngineError>;

    /// Infer camera intrinsics from an image file (treated as a prior).
    fn infer_camera(&self, image: &Path) -> Result<CameraInfo, EngineError>;

    /// Read the keypoints of one image from the features store.
    fn keypoints(&self, features: &Path, image: &ImageName) -> Result<Vec<Keypoint>, EngineError>;

    /// Read the correspondences of one pair from the matches store.
    fn pair_matches(
        &self,
        matches: &Path,
        left: &ImageName,
        right: &ImageName,
    ) -> Result<Vec<(u32, u32)>, EngineError>;

    /// Open a mapping backend over the given database.
    fn open_mapper(
        &self,
        database: &Path,
        image_dir: &Path,
    ) -> Result<Box<dyn MapperBackend>, EngineError>;
}

/// Per-model operations driven by the incremental mapper.
///
/// The backend keeps its own caches (visibility, correspondence graph);
/// the reconstruction itself is threaded through explicitly so ownership
/// stays with the controller.
pub trait MapperBackend: Send {
    /// Attach to a (possibly empty) model before a sub-model run.
    fn begin_reconstruction(&mut self, recon: &Reconstruction);

    /// Detach from the current model. With `discard`, the model's images
    /// do not count toward the total registered set.
    fn end_reconstruction(&mut self, discard: bool);

    /// Whether the database knows this image id.
    fn exists_image(&self, id: ImageId) -> bool;

    /// Number of images in the database.
    fn num_images(&self) -> usize;

    /// Search for a good initial pair.
    fn find_initial_pair(
        &mut self,
        recon: &Reconstruction,
        options: &MapperOptions,
    ) -> Option<(ImageId, ImageId, TwoViewGeometry)>;

    /// Estimate two-view geometry for a caller-provided pair.
    fn estimate_two_view(
        &mut self,
        options: &MapperOptions,
        id1: ImageId,
        id2: ImageId,
    ) -> Option<TwoViewGeometry>;

    /// Register the initial pair and create the seed points.
    fn register_initial_pair(
        &mut self,
        recon: &mut Reconstruction,
        options: &MapperOptions,
        geometry: &TwoViewGeometry,
        id1: ImageId,
        id2: ImageId,
    ) -> Result<(), EngineError>;

    /// Try to register one more image. Returns false when the pose could
    /// not be estimated; the caller moves on to the next candidate.
    fn register_next_image(
        &mut self,
        recon: &mut Reconstruction,
        options: &MapperOptions,
        id: ImageId,
    ) -> bool;

    /// Triangulate new points seen by the given image. Returns the number
    /// of points added.
    fn triangulate_image(
        &mut self,
        recon: &mut Reconstruction,
        options: &MapperOptions,
        id: ImageId,
    ) -> usize;

    /// Bundle adjustment over the neighborhood of the given image.
    fn local_refine(
        &mut self,
        recon: &mut Reconstruction,
        options: &MapperOptions,
        id: ImageId,
    ) -> Result<(), EngineError>;

    /// Bundle adjustment (with retriangulation) over the whole model.
    fn global_refine(
        &mut self,
        recon: &mut Reconstruction,
        options: &MapperOptions,
    ) -> Result<(), EngineError>;

    /// Drop outlier points. Returns the number removed.
    fn filter_points(&mut self, recon: &mut Reconstruction, options: &MapperOptions) -> usize;

    /// Drop degenerate images. Returns the number removed.
    fn filter_images(&mut self, recon: &mut Reconstruction, options: &MapperOptions) -> usize;

    /// The engine's preferred next-image order, best candidate first.
    fn next_images(&self, recon: &Reconstruction, options: &MapperOptions) -> Vec<ImageId>;

    /// How many already-triangulated points this image observes.
    fn num_visible_points3d(&self, recon: &Reconstruction, id: ImageId) -> usize;

    /// Total keypoint observations of this image.
    fn num_observations(&self, id: ImageId) -> usize;

    /// Registered images shared with previously ended sub-models.
    fn num_shared_reg_images(&self) -> usize;

    /// Images registered across all kept sub-models.
    fn num_total_reg_images(&self) -> usize;

    /// Whether the model changed enough since the last global bundle
    /// adjustment to recommend another one.
    fn check_run_global_refinement(
        &self,
        recon: &Reconstruction,
        prev_num_reg_images: usize,
        prev_num_points: usize,
    ) -> bool;

    /// Read per-point colors for a newly registered image. Returns false
    /// when the source image could not be read.
    fn extract_colors(
        &self,
        image_dir: &Path,
        id: ImageId,
        recon: &mut Reconstruction,
    ) -> bool;
}
