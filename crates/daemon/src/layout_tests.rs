// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::TempDir;
use yare::parameterized;

#[test]
fn paths_follow_scene_layout() {
    let layout = SceneLayout::new("/data", "garden");
    assert_eq!(layout.image_dir(), Path::new("/data/images/garden"));
    assert_eq!(layout.output_dir(), Path::new("/data/outputs/garden"));
    assert_eq!(
        layout.pairs_file(),
        Path::new("/data/outputs/garden/pairs-sfm.txt")
    );
    assert_eq!(
        layout.database_path(),
        Path::new("/data/outputs/garden/reconstruction/database.db")
    );
    assert_eq!(
        layout.model_dir(),
        Path::new("/data/outputs/garden/reconstruction/0")
    );
}

#[test]
fn list_images_is_sorted_and_files_only() {
    let dir = TempDir::new().unwrap();
    let layout = SceneLayout::new(dir.path(), "s");
    layout.ensure_dirs().unwrap();
    std::fs::write(layout.image_dir().join("b.jpg"), b"x").unwrap();
    std::fs::write(layout.image_dir().join("a.jpg"), b"x").unwrap();
    std::fs::create_dir(layout.image_dir().join("subdir")).unwrap();

    assert_eq!(
        layout.list_images().unwrap(),
        vec![ImageName::new("a.jpg"), ImageName::new("b.jpg")]
    );
    assert_eq!(layout.count_images().unwrap(), 2);
}

#[test]
fn list_images_on_missing_dir_is_empty() {
    let layout = SceneLayout::new("/nonexistent", "s");
    assert!(layout.list_images().unwrap().is_empty());
}

#[parameterized(
    plain = { "image01.jpg", Some("image01.jpg") },
    nested = { "../../etc/passwd", Some("passwd") },
    absolute = { "/tmp/evil.jpg", Some("evil.jpg") },
    dot_dot = { "..", None },
)]
fn image_path_strips_directories(raw: &str, expected: Option<&str>) {
    let layout = SceneLayout::new("/data", "s");
    let result = layout.image_path(raw);
    match expected {
        Some(name) => {
            let (image_name, path) = result.unwrap();
            assert_eq!(image_name.as_str(), name);
            assert_eq!(path, layout.image_dir().join(name));
        }
        None => assert!(result.is_none()),
    }
}
