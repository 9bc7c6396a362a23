// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory reconstruction model.
//!
//! A reconstruction is the persistent output of the mapping pipeline:
//! cameras, registered images with poses, and 3D points with color and a
//! track of observing images. It is mutated only by the worker; the
//! frontend reads exported artifacts from disk instead.
//!
//! Text export/import follows the conventional three-file layout
//! (`cameras.txt`, `images.txt`, `points3D.txt`), which doubles as the
//! model's on-disk persistence format; PLY export is ASCII.

use crate::backend::camera_model;
use plx_core::{ImageId, ImageName};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors from model persistence.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed {file}: {detail}")]
    Malformed { file: &'static str, detail: String },
}

/// Camera intrinsics owned by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub model: i64,
    pub width: u32,
    pub height: u32,
    pub params: Vec<f64>,
}

/// Pose of a registered image: rotation quaternion and translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub qvec: [f64; 4],
    pub tvec: [f64; 3],
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            qvec: [1.0, 0.0, 0.0, 0.0],
            tvec: [0.0, 0.0, 0.0],
        }
    }
}

/// A registered image.
#[derive(Debug, Clone, PartialEq)]
pub struct RegImage {
    pub name: ImageName,
    pub camera_id: i64,
    pub pose: Pose,
    pub num_observations: usize,
}

/// A triangulated point.
#[derive(Debug, Clone, PartialEq)]
pub struct Point3d {
    pub xyz: [f64; 3],
    pub color: [u8; 3],
    pub error: f64,
    /// Ids of the registered images observing this point.
    pub track: Vec<ImageId>,
}

/// The reconstruction model.
#[derive(Debug, Clone, Default)]
pub struct Reconstruction {
    cameras: BTreeMap<i64, Camera>,
    images: BTreeMap<ImageId, RegImage>,
    points: BTreeMap<u64, Point3d>,
    next_point_id: u64,
}

impl Reconstruction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a camera.
    pub fn add_camera(&mut self, camera_id: i64, camera: Camera) {
        self.cameras.insert(camera_id, camera);
    }

    pub fn camera(&self, camera_id: i64) -> Option<&Camera> {
        self.cameras.get(&camera_id)
    }

    /// Register an image. Replaces an existing registration of the same id.
    pub fn register(&mut self, id: ImageId, image: RegImage) {
        self.images.insert(id, image);
    }

    /// Deregister an image: drop its pose and every point whose track
    /// falls below two observing images without it.
    ///
    /// Unknown ids are a no-op so callers can validate against the
    /// database rather than the model.
    pub fn deregister(&mut self, id: ImageId) {
        if self.images.remove(&id).is_none() {
            return;
        }
        self.points.retain(|_, point| {
            point.track.retain(|&observer| observer != id);
            point.track.len() >= 2
        });
    }

    pub fn is_registered(&self, id: ImageId) -> bool {
        self.images.contains_key(&id)
    }

    pub fn num_reg_images(&self) -> usize {
        self.images.len()
    }

    pub fn num_points3d(&self) -> usize {
        self.points.len()
    }

    /// Registered image ids in ascending order.
    pub fn reg_image_ids(&self) -> Vec<ImageId> {
        self.images.keys().copied().collect()
    }

    pub fn image(&self, id: ImageId) -> Option<&RegImage> {
        self.images.get(&id)
    }

    pub fn image_mut(&mut self, id: ImageId) -> Option<&mut RegImage> {
        self.images.get_mut(&id)
    }

    /// Add a point and return its id.
    pub fn add_point(&mut self, xyz: [f64; 3], color: [u8; 3], track: Vec<ImageId>) -> u64 {
        self.next_point_id += 1;
        let id = self.next_point_id;
        self.points.insert(
            id,
            Point3d {
                xyz,
                color,
                error: 1.0,
                track,
            },
        );
        id
    }

    pub fn points(&self) -> impl Iterator<Item = (&u64, &Point3d)> {
        self.points.iter()
    }

    pub fn points_mut(&mut self) -> impl Iterator<Item = (&u64, &mut Point3d)> {
        self.points.iter_mut()
    }

    /// Drop points for which `keep` returns false. Returns the number
    /// removed.
    pub fn retain_points(&mut self, mut keep: impl FnMut(&Point3d) -> bool) -> usize {
        let before = self.points.len();
        self.points.retain(|_, point| keep(point));
        before - self.points.len()
    }

    /// Human-readable statistics block.
    pub fn summary(&self) -> String {
        let num_obs: usize = self.points.values().map(|p| p.track.len()).sum();
        let mean_track = if self.points.is_empty() {
            0.0
        } else {
            num_obs as f64 / self.points.len() as f64
        };
        let mut out = String::new();
        let _ = writeln!(out, "Registered images: {}", self.images.len());
        let _ = writeln!(out, "Points: {}", self.points.len());
        let _ = writeln!(out, "Observations: {}", num_obs);
        let _ = write!(out, "Mean track length: {:.2}", mean_track);
        out
    }

    /// Recenter on the point centroid and rescale to a fixed extent.
    pub fn normalize(&mut self) {
        if self.points.is_empty() {
            return;
        }
        let n = self.points.len() as f64;
        let mut centroid = [0.0f64; 3];
        for point in self.points.values() {
            for axis in 0..3 {
                centroid[axis] += point.xyz[axis] / n;
            }
        }
        let mut max_extent = 0.0f64;
        for point in self.points.values() {
            for axis in 0..3 {
                max_extent = max_extent.max((point.xyz[axis] - centroid[axis]).abs());
            }
        }
        let scale = if max_extent > 0.0 { 10.0 / max_extent } else { 1.0 };
        for point in self.points.values_mut() {
            for axis in 0..3 {
                point.xyz[axis] = (point.xyz[axis] - centroid[axis]) * scale;
            }
        }
        for image in self.images.values_mut() {
            for axis in 0..3 {
                image.pose.tvec[axis] = (image.pose.tvec[axis] - centroid[axis]) * scale;
            }
        }
    }

    /// Write the point cloud as ASCII PLY.
    pub fn write_ply(&self, path: &Path) -> Result<(), ModelError> {
        let mut body = String::new();
        let _ = writeln!(body, "ply");
        let _ = writeln!(body, "format ascii 1.0");
        let _ = writeln!(body, "element vertex {}", self.points.len());
        for axis in ["x", "y", "z"] {
            let _ = writeln!(body, "property float {}", axis);
        }
        for channel in ["red", "green", "blue"] {
            let _ = writeln!(body, "property uchar {}", channel);
        }
        let _ = writeln!(body, "end_header");
        for point in self.points.values() {
            let _ = writeln!(
                body,
                "{} {} {} {} {} {}",
                point.xyz[0], point.xyz[1], point.xyz[2],
                point.color[0], point.color[1], point.color[2],
            );
        }
        fs::write(path, body)?;
        Ok(())
    }

    /// Write the three-file text form into `dir`.
    pub fn write_text(&self, dir: &Path) -> Result<(), ModelError> {
        fs::create_dir_all(dir)?;

        let mut cameras = String::new();
        let _ = writeln!(cameras, "# Camera list with one line of data per camera:");
        let _ = writeln!(cameras, "#   CAMERA_ID, MODEL, WIDTH, HEIGHT, PARAMS[]");
        let _ = writeln!(cameras, "# Number of cameras: {}", self.cameras.len());
        for (id, camera) in &self.cameras {
            let _ = write!(
                cameras,
                "{} {} {} {}",
                id,
                camera_model::name(camera.model),
                camera.width,
                camera.height
            );
            for param in &camera.params {
                let _ = write!(cameras, " {}", param);
            }
            let _ = writeln!(cameras);
        }
        fs::write(dir.join("cameras.txt"), cameras)?;

        let mut images = String::new();
        let _ = writeln!(images, "# Image list with two lines of data per image:");
        let _ = writeln!(
            images,
            "#   IMAGE_ID, QW, QX, QY, QZ, TX, TY, TZ, CAMERA_ID, NAME"
        );
        let _ = writeln!(images, "#   POINTS2D[] as (X, Y, POINT3D_ID)");
        let _ = writeln!(images, "# Number of images: {}", self.images.len());
        for (id, image) in &self.images {
            let q = image.pose.qvec;
            let t = image.pose.tvec;
            let _ = writeln!(
                images,
                "{} {} {} {} {} {} {} {} {} {}",
                id, q[0], q[1], q[2], q[3], t[0], t[1], t[2], image.camera_id, image.name
            );
            let _ = writeln!(images);
        }
        fs::write(dir.join("images.txt"), images)?;

        let mut points = String::new();
        let _ = writeln!(points, "# 3D point list with one line of data per point:");
        let _ = writeln!(
            points,
            "#   POINT3D_ID, X, Y, Z, R, G, B, ERROR, TRACK[] as (IMAGE_ID, POINT2D_IDX)"
        );
        let _ = writeln!(points, "# Number of points: {}", self.points.len());
        for (id, point) in &self.points {
            let _ = write!(
                points,
                "{} {} {} {} {} {} {} {}",
                id,
                point.xyz[0], point.xyz[1], point.xyz[2],
                point.color[0], point.color[1], point.color[2],
                point.error
            );
            for observer in &point.track {
                let _ = write!(points, " {} 0", observer);
            }
            let _ = writeln!(points);
        }
        fs::write(dir.join("points3D.txt"), points)?;
        Ok(())
    }

    /// Read a model back from its three-file text form.
    pub fn read_text(dir: &Path) -> Result<Self, ModelError> {
        let mut recon = Reconstruction::new();

        let cameras = fs::read_to_string(dir.join("cameras.txt"))?;
        for line in data_lines(&cameras) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return Err(malformed("cameras.txt", line));
            }
            let id: i64 = parse(fields[0], "cameras.txt", line)?;
            let model = camera_model_code(fields[1]);
            let width: u32 = parse(fields[2], "cameras.txt", line)?;
            let height: u32 = parse(fields[3], "cameras.txt", line)?;
            let params = fields[4..]
                .iter()
                .map(|f| parse::<f64>(f, "cameras.txt", line))
                .collect::<Result<Vec<_>, _>>()?;
            recon.add_camera(id, Camera { model, width, height, params });
        }

        let images = fs::read_to_string(dir.join("images.txt"))?;
        let mut expect_points_line = false;
        for line in data_lines_allow_blank(&images) {
            if expect_points_line {
                // Second line per image: observations, unused here.
                expect_points_line = false;
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                return Err(malformed("images.txt", line));
            }
            let id = ImageId(parse(fields[0], "images.txt", line)?);
            let qvec = [
                parse(fields[1], "images.txt", line)?,
                parse(fields[2], "images.txt", line)?,
                parse(fields[3], "images.txt", line)?,
                parse(fields[4], "images.txt", line)?,
            ];
            let tvec = [
                parse(fields[5], "images.txt", line)?,
                parse(fields[6], "images.txt", line)?,
                parse(fields[7], "images.txt", line)?,
            ];
            let camera_id: i64 = parse(fields[8], "images.txt", line)?;
            let name = ImageName::from(fields[9]);
            recon.register(
                id,
                RegImage {
                    name,
                    camera_id,
                    pose: Pose { qvec, tvec },
                    num_observations: 0,
                },
            );
            expect_points_line = true;
        }

        let points = fs::read_to_string(dir.join("points3D.txt"))?;
        for line in data_lines(&points) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 8 {
                return Err(malformed("points3D.txt", line));
            }
            let id: u64 = parse(fields[0], "points3D.txt", line)?;
            let xyz = [
                parse(fields[1], "points3D.txt", line)?,
                parse(fields[2], "points3D.txt", line)?,
                parse(fields[3], "points3D.txt", line)?,
            ];
            let color = [
                parse(fields[4], "points3D.txt", line)?,
                parse(fields[5], "points3D.txt", line)?,
                parse(fields[6], "points3D.txt", line)?,
            ];
            let error: f64 = parse(fields[7], "points3D.txt", line)?;
            let track = fields[8..]
                .chunks(2)
                .map(|chunk| Ok(ImageId(parse(chunk[0], "points3D.txt", line)?)))
                .collect::<Result<Vec<_>, ModelError>>()?;
            recon.points.insert(id, Point3d { xyz, color, error, track });
            recon.next_point_id = recon.next_point_id.max(id);
        }

        Ok(recon)
    }
}

fn data_lines(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
}

fn data_lines_allow_blank(content: &str) -> impl Iterator<Item = &str> {
    content.lines().filter(|line| !line.starts_with('#'))
}

fn malformed(file: &'static str, line: &str) -> ModelError {
    ModelError::Malformed {
        file,
        detail: format!("bad line: {line}"),
    }
}

fn parse<T: std::str::FromStr>(field: &str, file: &'static str, line: &str) -> Result<T, ModelError> {
    field.parse().map_err(|_| malformed(file, line))
}

fn camera_model_code(name: &str) -> i64 {
    match name {
        "SIMPLE_PINHOLE" => camera_model::SIMPLE_PINHOLE,
        "PINHOLE" => camera_model::PINHOLE,
        "SIMPLE_RADIAL" => camera_model::SIMPLE_RADIAL,
        "RADIAL" => camera_model::RADIAL,
        "OPENCV" => camera_model::OPENCV,
        _ => -1,
    }
}

#[cfg(test)]
#[path = "reconstruction_tests.rs"]
mod tests;
