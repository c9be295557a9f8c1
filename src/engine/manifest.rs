// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Informational integrity check of engine artifacts

use crate::error::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;

/// Manifest file name inside the asset directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Declared properties of one artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// `{ "artifacts": { "<relative path>": { "size": .., "sha256": .. } } }`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub artifacts: BTreeMap<String, ArtifactEntry>,
}

/// A mismatch between the manifest and what is on disk.
/// Never fatal; surfaced to the host as a warning event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityWarning {
    pub artifact: String,
    pub message: String,
}

impl Manifest {
    /// Load `<asset_dir>/manifest.json`; `None` when there is none
    pub fn load(asset_dir: &Path) -> Result<Option<Self>> {
        let path = asset_dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Compare declared sizes (and optionally checksums) with the files
    pub fn verify(&self, asset_dir: &Path, verify_checksums: bool) -> Vec<IntegrityWarning> {
        let mut warnings = Vec::new();

        for (name, entry) in &self.artifacts {
            let path = asset_dir.join(name);
            let actual = match fs::metadata(&path) {
                Ok(metadata) => metadata.len(),
                Err(_) => {
                    warnings.push(IntegrityWarning {
                        artifact: name.clone(),
                        message: "artifact listed in manifest is missing".to_string(),
                    });
                    continue;
                }
            };

            if actual != entry.size {
                warnings.push(IntegrityWarning {
                    artifact: name.clone(),
                    message: format!("size mismatch: manifest {} bytes, found {}", entry.size, actual),
                });
                continue;
            }

            if let (true, Some(expected)) = (verify_checksums, &entry.sha256) {
                match sha256_file(&path) {
                    Ok(actual) if actual.eq_ignore_ascii_case(expected) => {}
                    Ok(actual) => warnings.push(IntegrityWarning {
                        artifact: name.clone(),
                        message: format!("checksum mismatch: expected {}, found {}", expected, actual),
                    }),
                    Err(e) => warnings.push(IntegrityWarning {
                        artifact: name.clone(),
                        message: format!("checksum unavailable: {}", e),
                    }),
                }
            }
        }

        warnings
    }
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Verify the asset directory against its manifest.
///
/// A missing manifest is skipped; an unreadable one becomes a warning.
pub fn verify_assets(asset_dir: &Path, verify_checksums: bool) -> Vec<IntegrityWarning> {
    let warnings = match Manifest::load(asset_dir) {
        Ok(Some(manifest)) => manifest.verify(asset_dir, verify_checksums),
        Ok(None) => {
            tracing::debug!("No manifest in {}", asset_dir.display());
            Vec::new()
        }
        Err(e) => vec![IntegrityWarning {
            artifact: MANIFEST_FILE.to_string(),
            message: format!("manifest unreadable: {}", e),
        }],
    };

    for warning in &warnings {
        tracing::warn!("Integrity check: {}: {}", warning.artifact, warning.message);
    }
    warnings
}
