// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Image identifier types.
//!
//! `ImageId` is the database-assigned numeric id of an image; `ImageName`
//! is the on-disk filename through which clients refer to it. The name is
//! the stable key across requests — ids only exist once the image has been
//! imported into the database.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Database-assigned numeric identifier for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(pub u32);

impl ImageId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ImageId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Filename of an image, relative to the scene's image directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageName(pub String);

impl ImageName {
    /// Create a new ImageName from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the string value of this ImageName.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ImageName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ImageName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl PartialEq<str> for ImageName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ImageName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl Borrow<str> for ImageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[path = "image_tests.rs"]
mod tests;
