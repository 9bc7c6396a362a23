// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pairs-file codec.
//!
//! A pairs file is a newline-separated list of `name1 name2` lines naming
//! the image pairs the matcher should consider. The working file
//! (`pairs-sfm.txt`) only ever grows: new-image pairs are written to a
//! side file and appended, so every pair recorded by an earlier request
//! stays present.

use plx_core::ImageName;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;

/// All unordered pairs over `names`, in list order.
pub fn exhaustive_pairs(names: &[ImageName]) -> Vec<(ImageName, ImageName)> {
    let mut pairs = Vec::new();
    for (i, left) in names.iter().enumerate() {
        for right in &names[i + 1..] {
            pairs.push((left.clone(), right.clone()));
        }
    }
    pairs
}

/// Pairs between each new image and every reference image.
///
/// Self-pairs are suppressed (the reference list contains the new images
/// themselves), and so are symmetric duplicates between two new images.
pub fn new_image_pairs(
    new_images: &[ImageName],
    references: &[ImageName],
) -> Vec<(ImageName, ImageName)> {
    let mut pairs = Vec::new();
    let mut seen: HashSet<(ImageName, ImageName)> = HashSet::new();
    for left in new_images {
        for right in references {
            if left == right {
                continue;
            }
            if seen.contains(&(right.clone(), left.clone())) {
                continue;
            }
            seen.insert((left.clone(), right.clone()));
            pairs.push((left.clone(), right.clone()));
        }
    }
    pairs
}

/// Write a pairs file, replacing any existing content.
pub fn write_pairs(path: &Path, pairs: &[(ImageName, ImageName)]) -> std::io::Result<()> {
    let mut body = String::new();
    for (left, right) in pairs {
        body.push_str(left.as_str());
        body.push(' ');
        body.push_str(right.as_str());
        body.push('\n');
    }
    fs::write(path, body)
}

/// Read a pairs file. Blank lines are skipped.
pub fn read_pairs(path: &Path) -> std::io::Result<Vec<(ImageName, ImageName)>> {
    let content = fs::read_to_string(path)?;
    let mut pairs = Vec::new();
    for line in content.lines() {
        let mut words = line.split_whitespace();
        if let (Some(left), Some(right)) = (words.next(), words.next()) {
            pairs.push((ImageName::from(left), ImageName::from(right)));
        }
    }
    Ok(pairs)
}

/// Append the contents of `new_pairs_file` to the working pairs file.
///
/// Guarantees a newline between the old tail and the appended block.
/// Returns the number of appended pairs.
pub fn append_pairs(working: &Path, new_pairs_file: &Path) -> std::io::Result<usize> {
    let appended = read_pairs(new_pairs_file)?;
    let mut existing = if working.exists() {
        fs::read_to_string(working)?
    } else {
        String::new()
    };
    if !existing.is_empty() && !existing.ends_with('\n') {
        existing.push('\n');
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(working)?;
    file.write_all(existing.as_bytes())?;
    for (left, right) in &appended {
        writeln!(file, "{} {}", left, right)?;
    }
    Ok(appended.len())
}

#[cfg(test)]
#[path = "pairs_tests.rs"]
mod tests;
