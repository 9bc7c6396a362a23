// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Database import workflows.
//!
//! Two entry points: [`initial_import`] builds a fresh database for the
//! first reconstruction, and [`incremental_import`] splices newly arrived
//! images into an existing one without touching rows that are already
//! there. Both read keypoints and matches back through the engine's
//! store read-through and finish with geometric verification over the
//! pair list they were given.
//!
//! Database handles are scoped to each step so the engine sees a closed
//! file when verification runs.

use crate::backend::{EngineError, SfmEngine};
use crate::database::Database;
use crate::pairs;
use plx_core::ImageName;
use std::path::Path;
use tracing::{debug, info, warn};

/// Keypoint coordinate shift from corner-origin to pixel-center origin.
const ORIGIN_SHIFT: f32 = 0.5;

/// Create an empty database (schema only).
pub fn create_empty_database(database: &Path) -> Result<(), EngineError> {
    Database::create(database)?;
    Ok(())
}

/// Add a (camera, image) row pair for each named image.
///
/// The camera is inferred per image from the file itself and recorded as
/// a prior.
pub fn import_images(
    engine: &dyn SfmEngine,
    db: &Database,
    image_dir: &Path,
    names: &[ImageName],
) -> Result<(), EngineError> {
    for name in names {
        let camera = engine.infer_camera(&image_dir.join(name.as_str()))?;
        let camera_id = db.add_camera(
            camera.model,
            camera.width,
            camera.height,
            &camera.params,
            camera.prior_focal_length,
        )?;
        let image_id = db.add_image(name, camera_id)?;
        debug!(image = %name, id = %image_id, "imported image");
    }
    Ok(())
}

/// Import keypoints for the named images from the features store.
pub fn import_keypoints(
    engine: &dyn SfmEngine,
    db: &Database,
    features: &Path,
    names: &[ImageName],
) -> Result<(), EngineError> {
    let ids = db.image_ids()?;
    for name in names {
        let id = ids
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::ImageNotFound(name.to_string()))?;
        let mut keypoints = engine.keypoints(features, name)?;
        for kp in &mut keypoints {
            kp.x += ORIGIN_SHIFT;
            kp.y += ORIGIN_SHIFT;
        }
        db.add_keypoints(id, &keypoints)?;
    }
    Ok(())
}

/// Import matches for the given pairs from the matches store.
pub fn import_matches(
    engine: &dyn SfmEngine,
    db: &Database,
    matches: &Path,
    pair_list: &[(ImageName, ImageName)],
) -> Result<(), EngineError> {
    let ids = db.image_ids()?;
    for (left, right) in pair_list {
        let left_id = ids
            .get(left)
            .copied()
            .ok_or_else(|| EngineError::ImageNotFound(left.to_string()))?;
        let right_id = ids
            .get(right)
            .copied()
            .ok_or_else(|| EngineError::ImageNotFound(right.to_string()))?;
        let correspondences = engine.pair_matches(matches, left, right)?;
        db.add_matches(left_id, right_id, &correspondences)?;
    }
    Ok(())
}

/// Build a fresh database: images, keypoints, matches, verification.
///
/// An existing database file is replaced; the initial import always
/// starts from an empty schema.
pub fn initial_import(
    engine: &dyn SfmEngine,
    database: &Path,
    image_dir: &Path,
    names: &[ImageName],
    pairs_file: &Path,
    features: &Path,
    matches: &Path,
) -> Result<(), EngineError> {
    info!(images = names.len(), "importing initial database");
    if database.exists() {
        warn!(path = %database.display(), "database already exists, replacing it");
        std::fs::remove_file(database)?;
    }
    let pair_list = pairs::read_pairs(pairs_file)?;
    {
        let db = Database::create(database)?;
        import_images(engine, &db, image_dir, names)?;
        import_keypoints(engine, &db, features, names)?;
        import_matches(engine, &db, matches, &pair_list)?;
    }
    engine.verify_matches(database, pairs_file)?;
    Ok(())
}

/// Splice newly arrived images into an existing database.
///
/// Only the new names get (camera, image) rows and keypoints; matches and
/// verification are restricted to the appended pairs.
pub fn incremental_import(
    engine: &dyn SfmEngine,
    database: &Path,
    image_dir: &Path,
    new_names: &[ImageName],
    new_pairs_file: &Path,
    features: &Path,
    matches: &Path,
) -> Result<(), EngineError> {
    info!(images = new_names.len(), "splicing new images into database");
    let pair_list = pairs::read_pairs(new_pairs_file)?;
    {
        let db = Database::create(database)?;
        import_images(engine, &db, image_dir, new_names)?;
        import_keypoints(engine, &db, features, new_names)?;
        import_matches(engine, &db, matches, &pair_list)?;
    }
    engine.verify_matches(database, new_pairs_file)?;
    Ok(())
}

#[cfg(test)]
#[path = "import_tests.rs"]
mod tests;
