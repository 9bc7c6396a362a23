// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk reconstruction database.
//!
//! `database.db` records cameras, images, keypoints, raw matches, and
//! geometrically verified matches in the conventional SQLite shape used by
//! incremental-SfM toolchains. Pairs collapse into a single integer key:
//! `pair_id = id1 * MAX_IMAGE_ID + id2` with `id1 < id2` after swapping
//! (and a column swap on the match rows, so the stored correspondences
//! always read left-to-right in id order).
//!
//! Connections are scoped: each workflow call opens, mutates inside a
//! transaction, and drops the handle on every exit path.

use plx_core::{ImageId, ImageName};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::backend::Keypoint;

/// Largest image id, and the multiplier folding a pair into one key.
pub const MAX_IMAGE_ID: i64 = 2_147_483_647;

/// Errors from database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("image already in database: {0}")]
    DuplicateImage(String),

    #[error("unknown image: {0}")]
    UnknownImage(String),
}

/// Fold an image-id pair into the canonical pair key.
///
/// Returns the key and whether the ids were swapped to canonical order.
pub fn pair_id(id1: ImageId, id2: ImageId) -> (i64, bool) {
    let (a, b, swapped) = if id1.0 > id2.0 {
        (id2.0, id1.0, true)
    } else {
        (id1.0, id2.0, false)
    };
    (i64::from(a) * MAX_IMAGE_ID + i64::from(b), swapped)
}

/// Open handle on the reconstruction database.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create the schema at `path`, leaving any existing rows in place.
    pub fn create(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cameras (
                 camera_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                 model INTEGER NOT NULL,
                 width INTEGER NOT NULL,
                 height INTEGER NOT NULL,
                 params BLOB,
                 prior_focal_length INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS images (
                 image_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                 name TEXT NOT NULL UNIQUE,
                 camera_id INTEGER NOT NULL,
                 FOREIGN KEY(camera_id) REFERENCES cameras(camera_id)
             );
             CREATE TABLE IF NOT EXISTS keypoints (
                 image_id INTEGER PRIMARY KEY NOT NULL,
                 rows INTEGER NOT NULL,
                 cols INTEGER NOT NULL,
                 data BLOB,
                 FOREIGN KEY(image_id) REFERENCES images(image_id) ON DELETE CASCADE
             );
             CREATE TABLE IF NOT EXISTS matches (
                 pair_id INTEGER PRIMARY KEY NOT NULL,
                 rows INTEGER NOT NULL,
                 cols INTEGER NOT NULL,
                 data BLOB
             );
             CREATE TABLE IF NOT EXISTS two_view_geometries (
                 pair_id INTEGER PRIMARY KEY NOT NULL,
                 rows INTEGER NOT NULL,
                 cols INTEGER NOT NULL,
                 data BLOB,
                 config INTEGER NOT NULL
             );",
        )?;
        Ok(Self { conn })
    }

    /// Open an existing database.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    /// Add a camera row and return its id.
    pub fn add_camera(
        &self,
        model: i64,
        width: u32,
        height: u32,
        params: &[f64],
        prior_focal_length: bool,
    ) -> Result<i64, DatabaseError> {
        let blob: Vec<u8> = params.iter().flat_map(|p| p.to_le_bytes()).collect();
        self.conn.execute(
            "INSERT INTO cameras (model, width, height, params, prior_focal_length)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![model, width, height, blob, prior_focal_length as i64],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Add an image row referencing a camera, and return its id.
    pub fn add_image(&self, name: &ImageName, camera_id: i64) -> Result<ImageId, DatabaseError> {
        if self.exists_image(name)? {
            return Err(DatabaseError::DuplicateImage(name.to_string()));
        }
        self.conn.execute(
            "INSERT INTO images (name, camera_id) VALUES (?1, ?2)",
            params![name.as_str(), camera_id],
        )?;
        Ok(ImageId(self.conn.last_insert_rowid() as u32))
    }

    /// Map of image name to image id, for every image in the database.
    pub fn image_ids(&self) -> Result<BTreeMap<ImageName, ImageId>, DatabaseError> {
        let mut stmt = self.conn.prepare("SELECT name, image_id FROM images")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                ImageName::new(row.get::<_, String>(0)?),
                ImageId(row.get::<_, i64>(1)? as u32),
            ))
        })?;
        let mut map = BTreeMap::new();
        for row in rows {
            let (name, id) = row?;
            map.insert(name, id);
        }
        Ok(map)
    }

    /// Whether an image with this name exists.
    pub fn exists_image(&self, name: &ImageName) -> Result<bool, DatabaseError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT image_id FROM images WHERE name = ?1",
                params![name.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Number of images in the database.
    pub fn num_images(&self) -> Result<usize, DatabaseError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Store the keypoints of one image as a row-major f32 blob.
    pub fn add_keypoints(
        &self,
        image_id: ImageId,
        keypoints: &[Keypoint],
    ) -> Result<(), DatabaseError> {
        let blob: Vec<u8> = keypoints
            .iter()
            .flat_map(|kp| [kp.x.to_le_bytes(), kp.y.to_le_bytes()])
            .flatten()
            .collect();
        self.conn.execute(
            "INSERT OR REPLACE INTO keypoints (image_id, rows, cols, data)
             VALUES (?1, ?2, 2, ?3)",
            params![image_id.0, keypoints.len() as i64, blob],
        )?;
        Ok(())
    }

    /// Number of stored keypoints for an image; 0 when none were imported.
    pub fn num_keypoints(&self, image_id: ImageId) -> Result<usize, DatabaseError> {
        let rows: Option<i64> = self
            .conn
            .query_row(
                "SELECT rows FROM keypoints WHERE image_id = ?1",
                params![image_id.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(rows.unwrap_or(0) as usize)
    }

    /// Store raw matches for a pair, swapping columns into canonical order.
    pub fn add_matches(
        &self,
        id1: ImageId,
        id2: ImageId,
        matches: &[(u32, u32)],
    ) -> Result<(), DatabaseError> {
        let (pair, swapped) = pair_id(id1, id2);
        let blob = match_blob(matches, swapped);
        self.conn.execute(
            "INSERT OR REPLACE INTO matches (pair_id, rows, cols, data)
             VALUES (?1, ?2, 2, ?3)",
            params![pair, matches.len() as i64, blob],
        )?;
        Ok(())
    }

    /// Store verified matches for a pair.
    pub fn add_two_view_geometry(
        &self,
        id1: ImageId,
        id2: ImageId,
        matches: &[(u32, u32)],
        config: i64,
    ) -> Result<(), DatabaseError> {
        let (pair, swapped) = pair_id(id1, id2);
        let blob = match_blob(matches, swapped);
        self.conn.execute(
            "INSERT OR REPLACE INTO two_view_geometries (pair_id, rows, cols, data, config)
             VALUES (?1, ?2, 2, ?3, ?4)",
            params![pair, matches.len() as i64, blob, config],
        )?;
        Ok(())
    }

    /// Number of stored raw matches for a pair.
    pub fn num_matches(&self, id1: ImageId, id2: ImageId) -> Result<usize, DatabaseError> {
        let (pair, _) = pair_id(id1, id2);
        let rows: Option<i64> = self
            .conn
            .query_row(
                "SELECT rows FROM matches WHERE pair_id = ?1",
                params![pair],
                |row| row.get(0),
            )
            .optional()?;
        Ok(rows.unwrap_or(0) as usize)
    }

    /// Every image row: id, name, camera id.
    pub fn list_images(&self) -> Result<Vec<(ImageId, ImageName, i64)>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT image_id, name, camera_id FROM images ORDER BY image_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                ImageId(row.get::<_, i64>(0)? as u32),
                ImageName::new(row.get::<_, String>(1)?),
                row.get::<_, i64>(2)?,
            ))
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Camera row by id: model, width, height, params.
    pub fn camera(&self, camera_id: i64) -> Result<Option<(i64, u32, u32, Vec<f64>)>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                "SELECT model, width, height, params FROM cameras WHERE camera_id = ?1",
                params![camera_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)? as u32,
                        row.get::<_, i64>(2)? as u32,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(model, width, height, blob)| {
            let params = blob
                .chunks_exact(8)
                .map(|chunk| {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(chunk);
                    f64::from_le_bytes(bytes)
                })
                .collect();
            (model, width, height, params)
        }))
    }

    /// Every geometrically verified pair, decoded from the pair keys.
    pub fn verified_pairs(&self) -> Result<Vec<(ImageId, ImageId)>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT pair_id FROM two_view_geometries WHERE rows > 0 ORDER BY pair_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut pairs = Vec::new();
        for row in rows {
            let pair = row?;
            pairs.push((
                ImageId((pair / MAX_IMAGE_ID) as u32),
                ImageId((pair % MAX_IMAGE_ID) as u32),
            ));
        }
        Ok(pairs)
    }

    /// Number of stored verified matches for a pair.
    pub fn num_verified_matches(&self, id1: ImageId, id2: ImageId) -> Result<usize, DatabaseError> {
        let (pair, _) = pair_id(id1, id2);
        let rows: Option<i64> = self
            .conn
            .query_row(
                "SELECT rows FROM two_view_geometries WHERE pair_id = ?1",
                params![pair],
                |row| row.get(0),
            )
            .optional()?;
        Ok(rows.unwrap_or(0) as usize)
    }
}

fn match_blob(matches: &[(u32, u32)], swapped: bool) -> Vec<u8> {
    matches
        .iter()
        .flat_map(|&(a, b)| {
            let (a, b) = if swapped { (b, a) } else { (a, b) };
            [a.to_le_bytes(), b.to_le_bytes()]
        })
        .flatten()
        .collect()
}

#[cfg(test)]
#[path = "database_tests.rs"]
mod tests;
