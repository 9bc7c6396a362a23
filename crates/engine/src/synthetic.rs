// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic built-in engine.
//!
//! `SyntheticEngine` stands in for a real SfM toolchain: features and
//! matches live in JSON stores keyed by image name, keypoint counts and
//! point positions are derived from name hashes, and registration always
//! produces the same poses. It exercises every seam of the server with
//! no computer vision attached, which makes it the default engine for
//! development deployments and the only engine the test suites need.
//!
//! Failure injection covers the two paths the mapper must handle:
//! initial-pair search failing (drives the relaxation loop) and
//! individual images refusing to register (drives the retry/abandon
//! loop). Every operation is recorded so tests can assert stage
//! sequences.

use crate::backend::{
    camera_model, CameraInfo, EngineError, Keypoint, MapperBackend, SfmEngine, TwoViewGeometry,
};
use crate::database::Database;
use crate::pairs;
use crate::reconstruction::{Camera, Pose, Reconstruction, RegImage};
use parking_lot::Mutex;
use plx_core::{ImageId, ImageName, MapperOptions};
use std::collections::{BTreeMap, HashSet};
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

type FeatureStore = BTreeMap<String, Vec<(f32, f32)>>;
type MatchStore = BTreeMap<String, Vec<(u32, u32)>>;

#[derive(Default)]
struct SyntheticShared {
    fail_initial_pairs: Mutex<usize>,
    refuse_register: Mutex<HashSet<ImageId>>,
    calls: Mutex<Vec<String>>,
}

impl SyntheticShared {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

/// Deterministic engine standing in for a real SfM toolchain.
#[derive(Clone, Default)]
pub struct SyntheticEngine {
    shared: Arc<SyntheticShared>,
}

impl SyntheticEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` initial-pair searches fail.
    pub fn fail_initial_pairs(&self, count: usize) {
        *self.shared.fail_initial_pairs.lock() = count;
    }

    /// Make registration of the given image fail until cleared.
    pub fn refuse_register(&self, id: ImageId) {
        self.shared.refuse_register.lock().insert(id);
    }

    pub fn allow_register(&self, id: ImageId) {
        self.shared.refuse_register.lock().remove(&id);
    }

    /// Operations recorded so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.shared.calls.lock().clone()
    }

    fn keypoints_for(name: &ImageName) -> Vec<(f32, f32)> {
        let mut hasher = DefaultHasher::new();
        name.as_str().hash(&mut hasher);
        let count = 64 + (hasher.finish() % 64) as usize;
        (0..count)
            .map(|i| (((i * 37) % 640) as f32, ((i * 53) % 480) as f32))
            .collect()
    }

    fn pair_key(left: &ImageName, right: &ImageName) -> String {
        format!("{}|{}", left, right)
    }
}

fn read_store<T: Default + serde::de::DeserializeOwned>(path: &Path) -> Result<T, EngineError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| EngineError::Store(e.to_string()))
}

fn write_store<T: serde::Serialize>(path: &Path, store: &T) -> Result<(), EngineError> {
    let content = serde_json::to_string(store).map_err(|e| EngineError::Store(e.to_string()))?;
    fs::write(path, content)?;
    Ok(())
}

impl SfmEngine for SyntheticEngine {
    fn extract_features(
        &self,
        image_dir: &Path,
        images: &[ImageName],
        features: &Path,
    ) -> Result<(), EngineError> {
        self.shared.record(format!("extract_features:{}", images.len()));
        let mut store: FeatureStore = read_store(features)?;
        for name in images {
            if !image_dir.join(name.as_str()).exists() {
                return Err(EngineError::ImageNotFound(name.to_string()));
            }
            // Idempotent per image: existing entries are left alone.
            store
                .entry(name.to_string())
                .or_insert_with(|| Self::keypoints_for(name));
        }
        write_store(features, &store)
    }

    fn match_features(
        &self,
        pairs_file: &Path,
        features: &Path,
        matches: &Path,
        overwrite: bool,
    ) -> Result<(), EngineError> {
        let pair_list = pairs::read_pairs(pairs_file)?;
        self.shared.record(format!("match_features:{}", pair_list.len()));
        let feature_store: FeatureStore = read_store(features)?;
        let mut match_store: MatchStore = read_store(matches)?;
        for (left, right) in &pair_list {
            let key = Self::pair_key(left, right);
            if !overwrite && match_store.contains_key(&key) {
                continue;
            }
            let num_left = feature_store
                .get(left.as_str())
                .ok_or_else(|| EngineError::Store(format!("no features for {left}")))?
                .len();
            let num_right = feature_store
                .get(right.as_str())
                .ok_or_else(|| EngineError::Store(format!("no features for {right}")))?
                .len();
            let count = num_left.min(num_right) / 2;
            match_store.insert(key, (0..count as u32).map(|i| (i, i)).collect());
        }
        write_store(matches, &match_store)
    }

    fn verify_matches(&self, database: &Path, pairs_file: &Path) -> Result<(), EngineError> {
        let pair_list = pairs::read_pairs(pairs_file)?;
        self.shared.record(format!("verify_matches:{}", pair_list.len()));
        let db = Database::open(database)?;
        let ids = db.image_ids()?;
        for (left, right) in &pair_list {
            let (Some(&left_id), Some(&right_id)) = (ids.get(left), ids.get(right)) else {
                continue;
            };
            let raw = db.num_matches(left_id, right_id)?;
            if raw == 0 {
                continue;
            }
            // Keep the first 80% as geometrically verified.
            let kept = (raw * 4) / 5;
            let verified: Vec<(u32, u32)> = (0..kept as u32).map(|i| (i, i)).collect();
            db.add_two_view_geometry(left_id, right_id, &verified, 2)?;
        }
        Ok(())
    }

    fn infer_camera(&self, image: &Path) -> Result<CameraInfo, EngineError> {
        if !image.exists() {
            return Err(EngineError::ImageNotFound(image.display().to_string()));
        }
        Ok(CameraInfo {
            model: camera_model::SIMPLE_RADIAL,
            width: 640,
            height: 480,
            params: vec![525.0, 320.0, 240.0, 0.0],
            prior_focal_length: true,
        })
    }

    fn keypoints(&self, features: &Path, image: &ImageName) -> Result<Vec<Keypoint>, EngineError> {
        let store: FeatureStore = read_store(features)?;
        let entries = store
            .get(image.as_str())
            .ok_or_else(|| EngineError::Store(format!("no features for {image}")))?;
        Ok(entries
            .iter()
            .map(|&(x, y)| Keypoint { x, y })
            .collect())
    }

    fn pair_matches(
        &self,
        matches: &Path,
        left: &ImageName,
        right: &ImageName,
    ) -> Result<Vec<(u32, u32)>, EngineError> {
        let store: MatchStore = read_store(matches)?;
        store
            .get(&Self::pair_key(left, right))
            .or_else(|| store.get(&Self::pair_key(right, left)))
            .cloned()
            .ok_or_else(|| EngineError::Store(format!("no matches for {left} {right}")))
    }

    fn open_mapper(
        &self,
        database: &Path,
        _image_dir: &Path,
    ) -> Result<Box<dyn MapperBackend>, EngineError> {
        self.shared.record("open_mapper");
        let db = Database::open(database)?;
        let mut images = BTreeMap::new();
        let mut cameras = BTreeMap::new();
        let mut observations = BTreeMap::new();
        for (id, name, camera_id) in db.list_images()? {
            if let Some((model, width, height, params)) = db.camera(camera_id)? {
                cameras.insert(camera_id, Camera { model, width, height, params });
            }
            observations.insert(id, db.num_keypoints(id)?);
            images.insert(id, (name, camera_id));
        }
        let verified: HashSet<(ImageId, ImageId)> = db.verified_pairs()?.into_iter().collect();
        Ok(Box::new(SyntheticMapper {
            shared: Arc::clone(&self.shared),
            images,
            cameras,
            observations,
            verified,
            total_reg: HashSet::new(),
            current_reg: HashSet::new(),
        }))
    }
}

/// Mapper backed by the database snapshot taken at open time.
pub struct SyntheticMapper {
    shared: Arc<SyntheticShared>,
    images: BTreeMap<ImageId, (ImageName, i64)>,
    cameras: BTreeMap<i64, Camera>,
    observations: BTreeMap<ImageId, usize>,
    verified: HashSet<(ImageId, ImageId)>,
    total_reg: HashSet<ImageId>,
    current_reg: HashSet<ImageId>,
}

impl SyntheticMapper {
    fn has_verified_pair(&self, id1: ImageId, id2: ImageId) -> bool {
        self.verified.contains(&(id1, id2)) || self.verified.contains(&(id2, id1))
    }

    fn seed_points(&self, recon: &mut Reconstruction, id1: ImageId, id2: ImageId) {
        for i in 0..100u32 {
            let spread = f64::from(i);
            recon.add_point(
                [spread * 0.1, (spread * 0.07) % 3.0, (spread * 0.05) % 2.0],
                [128, 128, 128],
                vec![id1, id2],
            );
        }
    }

    fn register_image(&mut self, recon: &mut Reconstruction, id: ImageId) -> bool {
        let Some((name, camera_id)) = self.images.get(&id).cloned() else {
            return false;
        };
        if let Some(camera) = self.cameras.get(&camera_id) {
            recon.add_camera(camera_id, camera.clone());
        }
        recon.register(
            id,
            RegImage {
                name,
                camera_id,
                pose: Pose {
                    qvec: [1.0, 0.0, 0.0, 0.0],
                    tvec: [f64::from(id.0), 0.0, 0.0],
                },
                num_observations: self.observations.get(&id).copied().unwrap_or(0),
            },
        );
        self.current_reg.insert(id);
        true
    }
}

impl MapperBackend for SyntheticMapper {
    fn begin_reconstruction(&mut self, recon: &Reconstruction) {
        self.shared.record("begin_reconstruction");
        self.current_reg = recon.reg_image_ids().into_iter().collect();
    }

    fn end_reconstruction(&mut self, discard: bool) {
        self.shared.record(format!("end_reconstruction:{discard}"));
        if !discard {
            self.total_reg.extend(self.current_reg.iter().copied());
        }
        self.current_reg.clear();
    }

    fn exists_image(&self, id: ImageId) -> bool {
        self.images.contains_key(&id)
    }

    fn num_images(&self) -> usize {
        self.images.len()
    }

    fn find_initial_pair(
        &mut self,
        recon: &Reconstruction,
        options: &MapperOptions,
    ) -> Option<(ImageId, ImageId, TwoViewGeometry)> {
        self.shared.record("find_initial_pair");
        {
            let mut remaining = self.shared.fail_initial_pairs.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return None;
            }
        }
        let geometry = TwoViewGeometry {
            num_inliers: 150,
            tri_angle: 30.0,
        };
        if geometry.num_inliers < options.init_min_num_inliers
            || geometry.tri_angle < options.init_min_tri_angle
        {
            return None;
        }
        let mut candidates: Vec<(ImageId, ImageId)> = self
            .verified
            .iter()
            .copied()
            .filter(|&(a, b)| !recon.is_registered(a) && !recon.is_registered(b))
            .collect();
        candidates.sort();
        candidates.first().map(|&(a, b)| (a, b, geometry))
    }

    fn estimate_two_view(
        &mut self,
        options: &MapperOptions,
        id1: ImageId,
        id2: ImageId,
    ) -> Option<TwoViewGeometry> {
        self.shared.record(format!("estimate_two_view:{id1},{id2}"));
        if !self.has_verified_pair(id1, id2) {
            return None;
        }
        let geometry = TwoViewGeometry {
            num_inliers: 150,
            tri_angle: 30.0,
        };
        (geometry.num_inliers >= options.init_min_num_inliers
            && geometry.tri_angle >= options.init_min_tri_angle)
            .then_some(geometry)
    }

    fn register_initial_pair(
        &mut self,
        recon: &mut Reconstruction,
        _options: &MapperOptions,
        _geometry: &TwoViewGeometry,
        id1: ImageId,
        id2: ImageId,
    ) -> Result<(), EngineError> {
        self.shared.record(format!("register_initial_pair:{id1},{id2}"));
        self.register_image(recon, id1);
        self.register_image(recon, id2);
        self.seed_points(recon, id1, id2);
        Ok(())
    }

    fn register_next_image(
        &mut self,
        recon: &mut Reconstruction,
        _options: &MapperOptions,
        id: ImageId,
    ) -> bool {
        self.shared.record(format!("register_next_image:{id}"));
        if self.shared.refuse_register.lock().contains(&id) {
            return false;
        }
        self.register_image(recon, id)
    }

    fn triangulate_image(
        &mut self,
        recon: &mut Reconstruction,
        _options: &MapperOptions,
        id: ImageId,
    ) -> usize {
        self.shared.record(format!("triangulate:{id}"));
        let Some(partner) = recon.reg_image_ids().into_iter().find(|&other| other != id) else {
            return 0;
        };
        let added: u32 = 40;
        for i in 0..added {
            let spread = f64::from(id.0) + f64::from(i) * 0.02;
            recon.add_point(
                [spread, spread * 0.5, spread * 0.25],
                [128, 128, 128],
                vec![id, partner],
            );
        }
        added as usize
    }

    fn local_refine(
        &mut self,
        recon: &mut Reconstruction,
        _options: &MapperOptions,
        id: ImageId,
    ) -> Result<(), EngineError> {
        self.shared.record(format!("local_refine:{id}"));
        for (_, point) in recon.points_mut() {
            if point.track.contains(&id) {
                point.error *= 0.9;
            }
        }
        Ok(())
    }

    fn global_refine(
        &mut self,
        recon: &mut Reconstruction,
        _options: &MapperOptions,
    ) -> Result<(), EngineError> {
        self.shared.record("global_refine");
        for (_, point) in recon.points_mut() {
            point.error *= 0.8;
        }
        Ok(())
    }

    fn filter_points(&mut self, recon: &mut Reconstruction, _options: &MapperOptions) -> usize {
        recon.retain_points(|point| point.error <= 4.0)
    }

    fn filter_images(&mut self, _recon: &mut Reconstruction, _options: &MapperOptions) -> usize {
        0
    }

    fn next_images(&self, recon: &Reconstruction, _options: &MapperOptions) -> Vec<ImageId> {
        let mut candidates: Vec<ImageId> = self
            .images
            .keys()
            .copied()
            .filter(|&id| !recon.is_registered(id))
            .collect();
        // Best-observed first, id as tie breaker.
        candidates.sort_by(|a, b| {
            let obs_a = self.observations.get(a).copied().unwrap_or(0);
            let obs_b = self.observations.get(b).copied().unwrap_or(0);
            obs_b.cmp(&obs_a).then(a.cmp(b))
        });
        candidates
    }

    fn num_visible_points3d(&self, recon: &Reconstruction, id: ImageId) -> usize {
        recon
            .points()
            .filter(|(_, point)| {
                point
                    .track
                    .iter()
                    .any(|&observer| self.has_verified_pair(observer, id))
            })
            .count()
    }

    fn num_observations(&self, id: ImageId) -> usize {
        self.observations.get(&id).copied().unwrap_or(0)
    }

    fn num_shared_reg_images(&self) -> usize {
        self.current_reg.intersection(&self.total_reg).count()
    }

    fn num_total_reg_images(&self) -> usize {
        self.total_reg.union(&self.current_reg).count()
    }

    fn check_run_global_refinement(
        &self,
        recon: &Reconstruction,
        prev_num_reg_images: usize,
        prev_num_points: usize,
    ) -> bool {
        recon.num_reg_images() != prev_num_reg_images
            || recon.num_points3d() != prev_num_points
    }

    fn extract_colors(
        &self,
        image_dir: &Path,
        id: ImageId,
        recon: &mut Reconstruction,
    ) -> bool {
        let Some((name, _)) = self.images.get(&id) else {
            return false;
        };
        if !image_dir.join(name.as_str()).exists() {
            return false;
        }
        let tint = ((id.0 * 40) % 256) as u8;
        for (_, point) in recon.points_mut() {
            if point.track.contains(&id) {
                point.color = [tint, 80, 160];
            }
        }
        true
    }
}

#[cfg(test)]
#[path = "synthetic_tests.rs"]
mod tests;
