// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::synthetic::SyntheticEngine;
use crate::pairs::{exhaustive_pairs, new_image_pairs, write_pairs};
use tempfile::TempDir;

struct Scene {
    dir: TempDir,
}

impl Scene {
    fn new(images: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        for name in images {
            std::fs::write(dir.path().join("images").join(name), b"jpegdata").unwrap();
        }
        Self { dir }
    }

    fn image_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("images")
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }
}

fn prime_stores(engine: &SyntheticEngine, scene: &Scene, names: &[ImageName], pairs_file: &str) {
    engine
        .extract_features(&scene.image_dir(), names, &scene.path("features.h5"))
        .unwrap();
    engine
        .match_features(
            &scene.path(pairs_file),
            &scene.path("features.h5"),
            &scene.path("matches.h5"),
            true,
        )
        .unwrap();
}

#[test]
fn initial_import_builds_complete_database() {
    let scene = Scene::new(&["a.jpg", "b.jpg"]);
    let engine = SyntheticEngine::new();
    let names: Vec<ImageName> = vec!["a.jpg".into(), "b.jpg".into()];

    let pair_list = exhaustive_pairs(&names);
    write_pairs(&scene.path("pairs-sfm.txt"), &pair_list).unwrap();
    prime_stores(&engine, &scene, &names, "pairs-sfm.txt");

    initial_import(
        &engine,
        &scene.path("database.db"),
        &scene.image_dir(),
        &names,
        &scene.path("pairs-sfm.txt"),
        &scene.path("features.h5"),
        &scene.path("matches.h5"),
    )
    .unwrap();

    let db = Database::open(&scene.path("database.db")).unwrap();
    let ids = db.image_ids().unwrap();
    assert_eq!(ids.len(), 2);
    let id_a = ids[&ImageName::new("a.jpg")];
    let id_b = ids[&ImageName::new("b.jpg")];
    assert!(db.num_keypoints(id_a).unwrap() >= 64);
    assert!(db.num_matches(id_a, id_b).unwrap() > 0);
    // Verification ran over the same pair list.
    assert!(db.num_verified_matches(id_a, id_b).unwrap() > 0);
}

#[test]
fn incremental_import_splices_only_new_rows() {
    let scene = Scene::new(&["a.jpg", "b.jpg"]);
    let engine = SyntheticEngine::new();
    let initial: Vec<ImageName> = vec!["a.jpg".into(), "b.jpg".into()];

    write_pairs(&scene.path("pairs-sfm.txt"), &exhaustive_pairs(&initial)).unwrap();
    prime_stores(&engine, &scene, &initial, "pairs-sfm.txt");
    initial_import(
        &engine,
        &scene.path("database.db"),
        &scene.image_dir(),
        &initial,
        &scene.path("pairs-sfm.txt"),
        &scene.path("features.h5"),
        &scene.path("matches.h5"),
    )
    .unwrap();

    // A third image arrives.
    std::fs::write(scene.image_dir().join("c.jpg"), b"jpegdata").unwrap();
    let references: Vec<ImageName> = vec!["a.jpg".into(), "b.jpg".into(), "c.jpg".into()];
    let new_names: Vec<ImageName> = vec!["c.jpg".into()];
    let new_pairs = new_image_pairs(&new_names, &references);
    write_pairs(&scene.path("pairs-sfm_new.txt"), &new_pairs).unwrap();
    prime_stores(&engine, &scene, &references, "pairs-sfm_new.txt");

    incremental_import(
        &engine,
        &scene.path("database.db"),
        &scene.image_dir(),
        &new_names,
        &scene.path("pairs-sfm_new.txt"),
        &scene.path("features.h5"),
        &scene.path("matches.h5"),
    )
    .unwrap();

    let db = Database::open(&scene.path("database.db")).unwrap();
    let ids = db.image_ids().unwrap();
    assert_eq!(ids.len(), 3);
    let id_a = ids[&ImageName::new("a.jpg")];
    let id_c = ids[&ImageName::new("c.jpg")];
    assert!(db.num_keypoints(id_c).unwrap() > 0);
    assert!(db.num_matches(id_c, id_a).unwrap() > 0);
    assert!(db.num_verified_matches(id_c, id_a).unwrap() > 0);
}

#[test]
fn incremental_import_rejects_duplicate_names() {
    let scene = Scene::new(&["a.jpg", "b.jpg"]);
    let engine = SyntheticEngine::new();
    let names: Vec<ImageName> = vec!["a.jpg".into(), "b.jpg".into()];

    write_pairs(&scene.path("pairs-sfm.txt"), &exhaustive_pairs(&names)).unwrap();
    prime_stores(&engine, &scene, &names, "pairs-sfm.txt");
    initial_import(
        &engine,
        &scene.path("database.db"),
        &scene.image_dir(),
        &names,
        &scene.path("pairs-sfm.txt"),
        &scene.path("features.h5"),
        &scene.path("matches.h5"),
    )
    .unwrap();

    // Re-importing an existing name must fail loudly, not corrupt rows.
    let err = incremental_import(
        &engine,
        &scene.path("database.db"),
        &scene.image_dir(),
        &names[..1],
        &scene.path("pairs-sfm.txt"),
        &scene.path("features.h5"),
        &scene.path("matches.h5"),
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::Database(_)));
}
