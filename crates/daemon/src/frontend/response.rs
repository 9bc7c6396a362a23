// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Response packaging: artifact ZIP and the multipart/mixed body.

use crate::exporter::RESPONSE_FILES;
use crate::frontend::FrontendError;
use std::io::{Cursor, Write};
use std::path::Path;
use tracing::warn;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Zip whichever response files exist in the export directory.
///
/// Returns the archive bytes and the names that made it in. A missing
/// directory yields an empty (but valid) archive.
pub fn zip_artifacts(dir: Option<&Path>) -> Result<(Vec<u8>, Vec<String>), FrontendError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut files = Vec::new();

    if let Some(dir) = dir {
        for name in RESPONSE_FILES {
            let path = dir.join(name);
            if path.is_file() {
                writer.start_file(name, options)?;
                writer.write_all(&std::fs::read(&path)?)?;
                files.push(name.to_string());
            } else {
                warn!(file = name, dir = %dir.display(), "artifact not found, skipping");
            }
        }
    }

    let cursor = writer.finish()?;
    Ok((cursor.into_inner(), files))
}

/// Assemble the two-part `multipart/mixed` body.
///
/// Returns the `Content-Type` header value (carrying the generated
/// boundary) and the body bytes.
pub fn multipart_mixed(json: &str, zip_bytes: &[u8]) -> (String, Vec<u8>) {
    let boundary = format!("plx-boundary-{}", Uuid::new_v4().simple());
    let mut body = Vec::new();
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json\r\n\r\n{json}\r\n").as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/zip\r\n\
             Content-Disposition: attachment; filename=response_files.zip\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(zip_bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/mixed; boundary={boundary}"), body)
}
